//! # sluice core
//!
//! File exchange over a persistent TCP connection, paced by a simulated
//! transport-control layer.
//!
//! This crate provides:
//! - Line-delimited text framing and the typed command vocabulary
//! - Reno, Tahoe, CUBIC and Vegas congestion window simulation
//! - Per-session transfer state and chunked file sending
//! - A `mio` readiness loop driving the server and client roles
//! - Error types and configuration
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Engine (mio loop)                           │
//! │   (accept, read, write, idle sweep, ping and metrics ticks)     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Sessions                                 │
//! │   (outbound queue, congestion controller, transfer state)       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                          Codec                                   │
//! │   (COMMAND:payload\n frames, base64 file chunks)                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod congestion;
pub mod engine;
pub mod error;
pub mod events;
pub mod message;
pub mod session;
pub mod transfer;

pub use codec::{Command, LineDecoder};
pub use config::{
    ClientConfig, CongestionConfig, DEFAULT_CHUNK_SIZE, DEFAULT_PORT, EngineConfig,
    MAX_WINDOW_SIZE, ServerConfig, TransferConfig, parse_port,
};
pub use congestion::{Algorithm, CongestionController, CongestionSnapshot};
pub use engine::{Client, EngineState, Server, SessionTable};
pub use error::{ConfigError, Error, ProtocolError, Result, TransferError};
pub use events::{CloseReason, EngineEvent, EventSink, SessionId, SessionSnapshot};
pub use message::{Message, RemoteFile, format_size};
pub use session::Session;
pub use transfer::{Direction, TransferSnapshot, TransferState, TransferStatus};
