//! Chunked file sender run on a worker thread.
//!
//! Two independent throttles gate every chunk: the session's outbound queue
//! depth (application backpressure) and the simulated congestion window.

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::message::Message;
use crate::session::Session;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::io::{self, Read};
use std::thread;
use std::time::{Duration, Instant};

/// How a send loop ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Every byte was queued
    Completed(u64),
    /// The session closed or the transfer was aborted first
    Cancelled,
}

/// Delay inserted between chunks: a tenth of the smoothed RTT, at least 1 ms
#[must_use]
pub fn pacing_delay(smoothed_rtt: Duration) -> Duration {
    (smoothed_rtt / 10).max(Duration::from_millis(1))
}

/// Stream `reader` to the peer in base64 chunks.
///
/// `data` builds the chunk message (`FILE_DATA` or `UPLOAD_DATA`). The loop
/// polls the session's active flag between chunks, so closing the session
/// stops it at the next chunk boundary.
///
/// # Errors
///
/// Returns `TransferError::Io` if reading the source fails.
pub fn stream_chunks<R: Read>(
    session: &Session,
    mut reader: R,
    config: &TransferConfig,
    data: fn(String) -> Message,
) -> Result<SendOutcome, TransferError> {
    let mut buf = vec![0u8; config.chunk_size];
    let mut sent = 0u64;

    loop {
        if !wait_for_queue(session, config) {
            return Ok(SendOutcome::Cancelled);
        }

        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        if !wait_for_window(session, config) {
            return Ok(SendOutcome::Cancelled);
        }

        session.record_sent(n, Instant::now());
        session.send(&data(STANDARD.encode(&buf[..n])));
        sent += n as u64;

        if config.rtt_pacing {
            thread::sleep(pacing_delay(session.smoothed_rtt()));
        }
    }

    Ok(SendOutcome::Completed(sent))
}

/// Pause while the outbound queue is over its depth limit
fn wait_for_queue(session: &Session, config: &TransferConfig) -> bool {
    loop {
        if !session.is_streaming() {
            return false;
        }
        if session.queue_depth() <= config.max_queue_depth {
            return true;
        }
        thread::sleep(config.backpressure_pause);
    }
}

/// Spin-wait while the congestion window is exhausted.
///
/// Waiting longer than the ack timeout counts as a lost packet, which backs
/// the window off to at least one slot.
fn wait_for_window(session: &Session, config: &TransferConfig) -> bool {
    let mut waiting_since = Instant::now();
    while !session.can_send() {
        if !session.is_streaming() {
            return false;
        }
        if waiting_since.elapsed() >= config.ack_timeout {
            session.on_ack_timeout(Instant::now());
            waiting_since = Instant::now();
            continue;
        }
        thread::sleep(config.window_poll);
    }
    true
}
