//! Hexane Core Library
//!
//! This crate provides the fundamental types, error handling, configuration
//! model and store contracts shared by every layer of the hexane DHCPv6
//! server.

pub mod config;
pub mod error;
pub mod stats;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::{
    ControlSection, HandlerSection, ListenerSection, PipelineNode, ServerConfig, ServerSection,
    StatisticsSection, WorkerPoolSection,
};
pub use error::{CodecError, Error, HandlerError, Result, StoreError};
pub use stats::{LatencyHistogram, ServerStats, StatsSnapshot};
pub use store::{Allocation, AllocationHints, Denial, Lease, LeaseKind, LeaseStore};
pub use types::{Disposition, DropReason, TransactionId, Transport};
