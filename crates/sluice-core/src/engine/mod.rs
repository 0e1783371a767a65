//! Readiness-driven network engine.
//!
//! One engine thread per running role owns a `mio::Poll`, the listening (or
//! connected) socket and the session table. Transfers run on short-lived
//! worker threads that only touch their own session.
//!
//! ```text
//! STOPPED -> STARTING -> RUNNING -> STOPPED
//! ```

mod client;
mod event_loop;
mod server;

pub use client::Client;
pub use server::Server;

use crate::error::TransferError;
use crate::events::{EngineEvent, EventSink, SessionId, SessionSnapshot};
use crate::message::Message;
use crate::session::Session;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Lifecycle of an engine role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// Not running
    Stopped,
    /// Sockets are being set up
    Starting,
    /// The event loop is processing events
    Running,
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: EngineState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> EngineState {
        match self.0.load(Ordering::Acquire) {
            1 => EngineState::Starting,
            2 => EngineState::Running,
            _ => EngineState::Stopped,
        }
    }

    pub(crate) fn set(&self, state: EngineState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Messages from API handles into the engine thread
#[derive(Debug)]
pub(crate) enum Control {
    /// Close every session and exit the loop
    Shutdown,
    /// Close one session
    Close(SessionId),
}

/// Recurring timer checked once per loop iteration
#[derive(Debug, Clone)]
pub(crate) struct Interval {
    period: Duration,
    next: Instant,
}

impl Interval {
    pub(crate) fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next: now + period,
        }
    }

    /// True once per elapsed period
    pub(crate) fn tick(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next = now + self.period;
        true
    }

    /// Time until the next tick
    pub(crate) fn remaining(&self, now: Instant) -> Duration {
        self.next.saturating_duration_since(now)
    }
}

/// Live sessions keyed by id.
///
/// Only the engine thread inserts and removes; API handles and workers look
/// sessions up concurrently.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.id(), session);
    }

    pub(crate) fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    /// Look a session up
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// All live sessions, ordered by id
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        sessions.sort_by_key(|s| s.id());
        sessions
    }

    /// Metrics of every live session, ordered by id
    #[must_use]
    pub fn snapshots(&self, now: Instant) -> Vec<SessionSnapshot> {
        self.all().iter().map(|s| s.snapshot(now)).collect()
    }

    /// Remove every session idle for longer than `timeout`.
    ///
    /// The sessions are returned still open; the caller closes them.
    pub fn sweep_idle(&self, now: Instant, timeout: Duration) -> Vec<Arc<Session>> {
        let idle: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_idle(now, timeout))
            .map(|entry| *entry.key())
            .collect();

        idle.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

/// Handle the messages both roles treat alike.
///
/// Returns the message back when it is role-specific.
pub(crate) fn handle_common(
    session: &Arc<Session>,
    message: Message,
    sink: &EventSink,
) -> Option<Message> {
    let now = Instant::now();
    match message {
        Message::Ping(timestamp) => {
            session.send(&Message::Pong(timestamp));
        }
        Message::Pong(timestamp) => session.on_pong(timestamp, now),
        Message::Ack(count) => session.on_ack(count, now),
        Message::Nack(count) => session.on_nack(count, now),
        Message::Algorithm(algorithm) => {
            session.set_algorithm(algorithm);
            sink.emit(EngineEvent::AlgorithmChanged {
                id: session.id(),
                algorithm,
            });
        }
        Message::Error(text) => {
            tracing::warn!("{} reported error: {}", session.label(), text);
            sink.emit(EngineEvent::PeerError {
                id: session.id(),
                message: text.clone(),
            });
            return Some(Message::Error(text));
        }
        other => return Some(other),
    }
    None
}

/// Refuse a request without touching the running transfer
pub(crate) fn reject(session: &Session, err: &TransferError) {
    tracing::warn!("{}: {}", session.label(), err);
    session.send(&Message::Error(err.to_string()));
}

/// The peer reported an error: abort the active transfer, if any, without
/// answering
pub(crate) fn abort_transfer(session: &Session, sink: &EventSink, reason: String) {
    let failed = session.with_transfer(|transfer| {
        if !transfer.is_active() {
            return None;
        }
        transfer.fail(Instant::now());
        Some(transfer.filename().to_string())
    });
    if let Some(filename) = failed {
        tracing::info!("{}: transfer of {} aborted by peer", session.label(), filename);
        sink.emit(EngineEvent::TransferFailed {
            id: session.id(),
            filename,
            reason,
        });
    }
}

/// Abort the active transfer: tell the peer and publish the failure
pub(crate) fn fail_transfer(session: &Session, sink: &EventSink, err: &TransferError) {
    let filename = session.with_transfer(|transfer| {
        transfer.fail(Instant::now());
        transfer.filename().to_string()
    });
    tracing::warn!("{}: transfer of {} failed: {}", session.label(), filename, err);
    session.send(&Message::Error(err.to_string()));
    sink.emit(EngineEvent::TransferFailed {
        id: session.id(),
        filename,
        reason: err.to_string(),
    });
}
