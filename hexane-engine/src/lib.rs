//! Hexane request-processing engine
//!
//! Turns a decoded DHCPv6 message into a response by running a configured
//! filter/handler pipeline over a per-message transaction bundle. The
//! pipeline is built once from configuration (and rebuilt on reload),
//! runs synchronously on one worker per transaction, and never suspends
//! mid-transaction.

pub mod filter;
pub mod handler;
pub mod handlers;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod transaction;

pub use filter::TransactionFilter;
pub use handler::Handler;
pub use pipeline::{Pipeline, PipelineHandle};
pub use registry::{FactoryContext, FilterRegistry, HandlerRegistry, StoreCache};
pub use store::{MemoryLeaseStore, PoolConfig};
pub use transaction::{ReceiveInfo, TransactionBundle, TransactionState};
