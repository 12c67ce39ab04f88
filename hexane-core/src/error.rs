//! Error types for hexane

use thiserror::Error;

/// Result type alias for hexane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the wire codec.
///
/// Decode-time structural errors inside a known option are usually demoted
/// to an opaque option by the caller; the variants here surface when the
/// whole message is unusable or when an encoder refuses to emit an invalid
/// message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before the announced structure was complete
    #[error("truncated input: needed {needed} more bytes")]
    Truncated { needed: usize },

    /// A length field disagrees with the data it describes
    #[error("bad length in {context}")]
    BadLength { context: &'static str },

    /// Message type octet is not a known message kind
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// A tag or discriminant has no defined meaning
    #[error("bad discriminant in {context}: {value}")]
    BadDiscriminant { context: &'static str, value: u32 },

    /// Nesting exceeded the recursion limit
    #[error("recursion limit exceeded while decoding nested options")]
    RecursionLimit,

    /// An option registered as a singleton appeared more than once
    #[error("duplicate singleton option {code}")]
    DuplicateOption { code: u16 },

    /// A relay message did not carry exactly one relay-message option
    #[error("relay message carries {count} relay-message options, expected exactly one")]
    BadRelayMessage { count: usize },

    /// A value violates a protocol invariant on encode
    #[error("invalid value for {context}: {reason}")]
    InvalidValue {
        context: &'static str,
        reason: &'static str,
    },

    /// An encoded structure would not fit its 16-bit length field
    #[error("{context} too large to encode")]
    Oversize { context: &'static str },
}

/// Errors surfaced by lease and auxiliary stores
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Backend cannot be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Store operation did not finish within the transaction deadline
    #[error("store operation timed out: {0}")]
    Timeout(String),
}

/// Error returned by a handler hook.
///
/// Handler errors never abort a worker: the pipeline catches them, logs them
/// with the transaction id and drops the transaction.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl HandlerError {
    /// Create a handler error with a custom message
    pub fn message<S: Into<String>>(msg: S) -> Self {
        HandlerError::Message(msg.into())
    }
}

/// Main error type for hexane
#[derive(Error, Debug)]
pub enum Error {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire codec error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A handler hook failed
    #[error("handler '{handler}' failed: {source}")]
    Handler {
        handler: String,
        source: HandlerError,
    },

    /// Store backend error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Failure to bind a listener socket
    #[error("cannot bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    /// Server is shutting down
    #[error("shutting down: {0}")]
    ShuttingDown(String),
}

impl Error {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Wrap a handler error with the handler's name
    pub fn handler<S: Into<String>>(handler: S, source: HandlerError) -> Self {
        Error::Handler {
            handler: handler.into(),
            source,
        }
    }
}
