//! Handler trait
//!
//! A handler is a named unit of behavior with three lifecycle hooks. All
//! three default to no-ops; a handler implements the hooks that make up
//! its declared phase. Within each phase pass, handlers run in ascending
//! precedence, ties broken by configuration order.

use hexane_core::error::HandlerError;

use crate::transaction::TransactionBundle;

/// Pipeline phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Observe and classify: add marks, validate, drop early
    Pre,
    /// Materialize response options
    Handle,
    /// Finalize: framing, status codes, stripping
    Post,
}

/// A configured unit of behavior executed within the pipeline
pub trait Handler: Send + Sync {
    /// Stable name, used in logs and configuration errors
    fn name(&self) -> &str;

    /// Ordering key within each phase pass; lower runs first
    fn precedence(&self) -> u16 {
        100
    }

    /// Run the post hook even when the transaction was dropped
    fn run_on_drop(&self) -> bool {
        false
    }

    /// Running this handler twice leaves the response unchanged
    fn idempotent(&self) -> bool {
        false
    }

    /// Observe/classify the transaction
    fn pre(&self, _bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Produce or modify response options
    fn handle(&self, _bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Finalize the response
    fn post(&self, _bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        Ok(())
    }
}
