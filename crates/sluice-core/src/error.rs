//! Error types for the sluice engine.
//!
//! Errors follow the taxonomy the engine reacts to:
//!
//! - **Connection** (`Error::Io`): close the affected session or engine role,
//!   never crash the loop.
//! - **Protocol** (`ProtocolError`): logged and ignored, the session stays open.
//! - **Transfer** (`TransferError`): reported to the peer as `ERROR:<reason>`,
//!   only the active transfer is aborted.
//! - **Configuration** (`ConfigError`): rejected before the engine starts.

use std::borrow::Cow;
use std::io;
use thiserror::Error;

/// Result alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level engine error
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Socket or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed or unknown protocol message
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// File transfer failure
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Operation not valid in the current engine state
    #[error("invalid state: {0}")]
    InvalidState(Cow<'static, str>),

    /// Engine control channel closed
    #[error("channel error: {0}")]
    Channel(Cow<'static, str>),
}

impl Error {
    /// Create an invalid state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        Error::InvalidState(Cow::Borrowed(context))
    }

    /// Create a channel error with static context (zero allocation)
    #[must_use]
    pub const fn channel(context: &'static str) -> Self {
        Error::Channel(Cow::Borrowed(context))
    }

    /// Returns true if the error ends the connection it occurred on
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Channel(_))
    }
}

/// Configuration errors, raised before any socket is opened
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Port is not a number in 1..=65535
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// Address could not be parsed or resolved
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Chunk size outside the accepted range
    #[error("chunk size must be between 1 and {max} bytes, got {actual}")]
    InvalidChunkSize {
        /// Largest accepted chunk size
        max: usize,
        /// Configured value
        actual: usize,
    },

    /// Backpressure queue depth of zero
    #[error("max queue depth must be at least 1")]
    InvalidQueueDepth,

    /// Loss probability outside [0, 1]
    #[error("simulated loss must be within 0.0..=1.0")]
    InvalidLossProbability,

    /// Receive window cap below one packet
    #[error("receive window cap must be at least 1")]
    InvalidReceiveWindow,

    /// Initial slow start threshold below one packet
    #[error("slow start threshold must be at least 1")]
    InvalidThreshold,

    /// A timeout, interval or size configured as zero
    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    /// Unrecognized congestion algorithm name
    #[error("unknown congestion algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// Protocol errors: the offending message is dropped, the session survives
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Command name outside the vocabulary
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Required payload field absent
    #[error("{command}: missing {field}")]
    MissingField {
        /// Command name
        command: &'static str,
        /// Name of the missing field
        field: &'static str,
    },

    /// Numeric field failed to parse
    #[error("{command}: invalid number '{value}'")]
    InvalidNumber {
        /// Command name
        command: &'static str,
        /// Raw field text
        value: String,
    },

    /// `ALGORITHM` payload names no known algorithm
    #[error("unknown congestion algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// Transfer errors.
///
/// The `Display` output is the exact payload of the `ERROR:` frame sent to the
/// peer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// Requested file does not exist in storage
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Filename is not a single path component
    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    /// Another transfer is active on this session
    #[error("Transfer in progress")]
    InProgress,

    /// No transfer is armed for the received data
    #[error("No active transfer")]
    NotActive,

    /// Reading or writing the file failed
    #[error("Transfer failed: {0}")]
    Io(String),

    /// A chunk could not be base64-decoded
    #[error("Invalid chunk encoding: {0}")]
    Decode(String),
}

impl From<io::Error> for TransferError {
    fn from(err: io::Error) -> Self {
        TransferError::Io(err.to_string())
    }
}

impl From<base64::DecodeError> for TransferError {
    fn from(err: base64::DecodeError) -> Self {
        TransferError::Decode(err.to_string())
    }
}
