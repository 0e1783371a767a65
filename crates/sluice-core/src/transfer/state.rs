//! Per-session transfer bookkeeping.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Send timestamps kept for RTT matching; older entries are dropped
const MAX_IN_FLIGHT: usize = 4096;

/// Transfer direction, named from the client's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// No transfer started yet
    #[default]
    Idle,
    /// Client to server
    Upload,
    /// Server to client
    Download,
}

/// Lifecycle of the current (or last) transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Nothing started
    #[default]
    Idle,
    /// Chunks are flowing
    Active,
    /// Finished successfully
    Completed,
    /// Aborted by an error or a closed session
    Failed,
}

/// Read-only view of a transfer, for metrics reporting
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransferSnapshot {
    /// File being transferred, empty when idle
    pub filename: String,
    /// Direction
    pub direction: Direction,
    /// Status
    pub status: TransferStatus,
    /// Bytes sent or received so far
    pub transferred: u64,
    /// Total size in bytes
    pub total_size: u64,
    /// `transferred / total_size` in 0.0..=1.0
    pub progress: f64,
    /// Seconds since the transfer started
    pub elapsed_secs: f64,
}

/// State of the one transfer a session may run at a time.
///
/// The same type serves both ends: the sending side advances `transferred`
/// through [`record_sent`](Self::record_sent), the receiving side through
/// [`append`](Self::append).
#[derive(Debug, Default)]
pub struct TransferState {
    filename: String,
    total_size: u64,
    transferred: u64,
    direction: Direction,
    status: TransferStatus,
    sequence: u64,
    chunks_received: u64,
    in_flight: VecDeque<(u64, Instant)>,
    buffer: Vec<u8>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

impl TransferState {
    /// Create an idle state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a download of `filename` (`total_size` bytes)
    pub fn start_download(&mut self, filename: impl Into<String>, total_size: u64, now: Instant) {
        self.start(Direction::Download, filename.into(), total_size, now);
    }

    /// Begin an upload of `filename` (`total_size` bytes)
    pub fn start_upload(&mut self, filename: impl Into<String>, total_size: u64, now: Instant) {
        self.start(Direction::Upload, filename.into(), total_size, now);
    }

    fn start(&mut self, direction: Direction, filename: String, total_size: u64, now: Instant) {
        *self = Self {
            filename,
            total_size,
            direction,
            status: TransferStatus::Active,
            buffer: Vec::with_capacity(usize::try_from(total_size.min(1 << 24)).unwrap_or(0)),
            started_at: Some(now),
            ..Self::default()
        };
    }

    /// Receiving side: append a decoded chunk, returning the cumulative
    /// number of chunks received
    pub fn append(&mut self, bytes: &[u8]) -> u64 {
        self.buffer.extend_from_slice(bytes);
        self.transferred += bytes.len() as u64;
        self.chunks_received += 1;
        self.chunks_received
    }

    /// Sending side: a chunk of `bytes` was queued, returning its sequence
    /// number
    pub fn record_sent(&mut self, bytes: usize, now: Instant) -> u64 {
        let seq = self.sequence;
        self.sequence += 1;
        self.transferred += bytes as u64;
        self.in_flight.push_back((seq, now));
        if self.in_flight.len() > MAX_IN_FLIGHT {
            self.in_flight.pop_front();
        }
        seq
    }

    /// Sending side: match a cumulative acknowledgement of `count` chunks.
    ///
    /// Returns the RTT of chunk `count - 1` when its send time is still
    /// known. Older entries are released.
    pub fn acknowledge(&mut self, count: u64, now: Instant) -> Option<Duration> {
        let target = count.checked_sub(1)?;
        while let Some(&(seq, sent_at)) = self.in_flight.front() {
            if seq > target {
                break;
            }
            self.in_flight.pop_front();
            if seq == target {
                return Some(now.saturating_duration_since(sent_at));
            }
        }
        None
    }

    /// True iff an upload is the current transfer and every byte arrived
    #[must_use]
    pub fn is_upload_complete(&self) -> bool {
        self.direction == Direction::Upload && self.transferred >= self.total_size
    }

    /// True while chunks are expected
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TransferStatus::Active
    }

    /// Mark the transfer as successfully finished.
    ///
    /// Send times of unacknowledged chunks are kept so late ACKs still
    /// yield RTT samples; the next start clears them.
    pub fn finish(&mut self, now: Instant) {
        self.status = TransferStatus::Completed;
        self.finished_at = Some(now);
    }

    /// Mark the transfer as failed and drop any buffered data
    pub fn fail(&mut self, now: Instant) {
        self.status = TransferStatus::Failed;
        self.finished_at = Some(now);
        self.in_flight.clear();
        self.buffer = Vec::new();
    }

    /// Take the received bytes, leaving the buffer empty
    pub fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// File name of the current transfer
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Declared total size
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes sent or received so far
    #[must_use]
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Transfer direction
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Transfer status
    #[must_use]
    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Chunks sent so far
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Fraction complete in 0.0..=1.0
    #[must_use]
    pub fn progress(&self) -> f64 {
        match self.status {
            TransferStatus::Idle => 0.0,
            TransferStatus::Completed if self.total_size == 0 => 1.0,
            _ if self.total_size == 0 => 0.0,
            _ => (self.transferred as f64 / self.total_size as f64).min(1.0),
        }
    }

    /// Snapshot for metrics reporting
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> TransferSnapshot {
        let elapsed = match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => now.saturating_duration_since(start),
            _ => Duration::ZERO,
        };
        TransferSnapshot {
            filename: self.filename.clone(),
            direction: self.direction,
            status: self.status,
            transferred: self.transferred,
            total_size: self.total_size,
            progress: self.progress(),
            elapsed_secs: elapsed.as_secs_f64(),
        }
    }
}
