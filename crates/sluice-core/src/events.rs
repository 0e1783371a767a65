//! Events published by a running engine.
//!
//! The engine never calls into presentation code. Everything a collaborator
//! may want to render is appended to a channel as an [`EngineEvent`] and
//! consumed at the collaborator's own pace.

use crate::congestion::{Algorithm, CongestionSnapshot};
use crate::message::RemoteFile;
use crate::transfer::{Direction, TransferSnapshot};
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Identifier of a session within one engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(pub usize);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<mio::Token> for SessionId {
    fn from(token: mio::Token) -> Self {
        SessionId(token.0)
    }
}

impl From<SessionId> for mio::Token {
    fn from(id: SessionId) -> Self {
        mio::Token(id.0)
    }
}

/// Metrics of one session, as polled by the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// Session identifier
    pub id: SessionId,
    /// Peer label, e.g. `Client-1 (127.0.0.1:50312)`
    pub label: String,
    /// Congestion controller metrics
    pub congestion: CongestionSnapshot,
    /// Frames waiting in the outbound queue
    pub queue_depth: usize,
    /// Current or last transfer
    pub transfer: TransferSnapshot,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The peer closed the connection
    PeerClosed,
    /// A socket error occurred
    Error,
    /// No read activity within the idle timeout
    IdleTimeout,
    /// Closed through the engine's API
    Local,
    /// The engine is stopping
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CloseReason::PeerClosed => "peer closed",
            CloseReason::Error => "connection error",
            CloseReason::IdleTimeout => "idle timeout",
            CloseReason::Local => "closed locally",
            CloseReason::Shutdown => "shutdown",
        })
    }
}

/// State change notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The engine is running
    Started {
        /// Listening address (server) or local address (client)
        local_addr: SocketAddr,
    },
    /// A connection was established
    SessionOpened {
        /// Session identifier
        id: SessionId,
        /// Peer label
        label: String,
    },
    /// A connection ended
    SessionClosed {
        /// Session identifier
        id: SessionId,
        /// Peer label
        label: String,
        /// Cause
        reason: CloseReason,
    },
    /// The server answered `LIST_FILES`
    FileList {
        /// Listed files
        files: Vec<RemoteFile>,
    },
    /// A transfer began on a session
    TransferStarted {
        /// Session identifier
        id: SessionId,
        /// File name
        filename: String,
        /// Direction
        direction: Direction,
        /// Total size in bytes
        size: u64,
    },
    /// A transfer finished
    TransferCompleted {
        /// Session identifier
        id: SessionId,
        /// File name
        filename: String,
        /// Direction
        direction: Direction,
        /// Bytes transferred
        bytes: u64,
        /// Where the file was stored, on the receiving side
        path: Option<PathBuf>,
    },
    /// A transfer was aborted
    TransferFailed {
        /// Session identifier
        id: SessionId,
        /// File name
        filename: String,
        /// Error text, as sent to the peer
        reason: String,
    },
    /// A session switched congestion algorithm
    AlgorithmChanged {
        /// Session identifier
        id: SessionId,
        /// New algorithm
        algorithm: Algorithm,
    },
    /// The peer sent an `ERROR` frame
    PeerError {
        /// Session identifier
        id: SessionId,
        /// Error text
        message: String,
    },
    /// Periodic metrics of every session
    Metrics {
        /// One snapshot per live session
        sessions: Vec<SessionSnapshot>,
    },
    /// The engine stopped
    Stopped,
}

/// Sending half of the event stream.
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<EngineEvent>,
}

impl EventSink {
    /// Create a sink and the receiver collaborators read from
    #[must_use]
    pub fn channel() -> (Self, Receiver<EngineEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    /// Publish an event
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_token_conversion() {
        let id = SessionId::from(mio::Token(7));
        assert_eq!(id, SessionId(7));
        assert_eq!(mio::Token::from(id), mio::Token(7));
        assert_eq!(id.to_string(), "#7");
    }

    #[test]
    fn test_sink_survives_dropped_receiver() {
        let (sink, rx) = EventSink::channel();
        sink.emit(EngineEvent::Stopped);
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Stopped);

        drop(rx);
        sink.emit(EngineEvent::Stopped);
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::IdleTimeout.to_string(), "idle timeout");
        assert_eq!(CloseReason::PeerClosed.to_string(), "peer closed");
    }
}
