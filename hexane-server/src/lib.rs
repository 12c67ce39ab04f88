//! Hexane server runtime
//!
//! Owns the sockets, the worker pool, the statistics block and the
//! control channel, and wires them around the engine's pipeline. The
//! UDP path is listener -> bounded queue -> worker -> listener; the bulk
//! leasequery TCP path runs the same pipeline inline per connection.

pub mod control;
pub mod listener;
pub mod server;
pub mod tcp;
pub mod worker;

pub use control::ControlCommand;
pub use listener::{Outbound, WorkItem};
pub use server::{determine_server_duid, load_config, ExitStatus, Server};
