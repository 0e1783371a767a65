//! Per-connection session state.
//!
//! A [`Session`] is shared between the engine thread (reads, writes, acks)
//! and at most a few worker threads driving a transfer (enqueuing chunks,
//! advancing progress). Every mutable field sits behind its own lock and no
//! lock spans two sessions. The only nested acquisition is socket, then
//! outbound queue, while flushing.

use crate::codec::LineDecoder;
use crate::config::{CongestionConfig, TransferConfig};
use crate::congestion::{Algorithm, CongestionController};
use crate::error::TransferError;
use crate::events::{SessionId, SessionSnapshot};
use crate::message::Message;
use crate::transfer::{Direction, TransferState};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use crossbeam_channel::Sender;
use mio::Waker;
use mio::net::TcpStream;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds since the UNIX epoch, as carried by `PING`/`PONG`
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Receives every well-formed message decoded on a session
pub trait CommandHandler: Send + Sync {
    /// Handle one message; runs on the engine thread and must not block
    fn on_message(&self, session: &Arc<Session>, message: Message);
}

/// Tells the engine loop that a session has frames to write
#[derive(Debug, Clone)]
pub(crate) struct WriteNotifier {
    tx: Sender<SessionId>,
    waker: Option<Arc<Waker>>,
}

impl WriteNotifier {
    pub(crate) fn new(tx: Sender<SessionId>, waker: Option<Arc<Waker>>) -> Self {
        Self { tx, waker }
    }

    fn notify(&self, id: SessionId) {
        if self.tx.send(id).is_err() {
            return;
        }
        if let Some(waker) = &self.waker {
            if let Err(e) = waker.wake() {
                tracing::warn!("Failed to wake engine loop: {}", e);
            }
        }
    }
}

#[derive(Debug)]
struct OutboundFrame {
    bytes: Vec<u8>,
    written: usize,
}

/// Result of accepting one data chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkReceipt {
    /// Cumulative chunks received in this transfer
    pub count: u64,
    /// Whether the chunk was answered with `NACK`
    pub lost: bool,
    /// Whether an upload reached its declared size with this chunk
    pub upload_complete: bool,
}

/// One peer connection
pub struct Session {
    id: SessionId,
    label: String,
    stream: Mutex<Option<TcpStream>>,
    decoder: Mutex<LineDecoder>,
    outbound: Mutex<VecDeque<OutboundFrame>>,
    write_pending: AtomicBool,
    congestion: Mutex<CongestionController>,
    transfer: Mutex<TransferState>,
    transfer_config: TransferConfig,
    active: AtomicBool,
    last_activity: Mutex<Instant>,
    notifier: WriteNotifier,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("active", &self.is_active())
            .field("queue_depth", &self.queue_depth())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        label: String,
        stream: Option<TcpStream>,
        congestion: &CongestionConfig,
        transfer_config: TransferConfig,
        notifier: WriteNotifier,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            label,
            stream: Mutex::new(stream),
            decoder: Mutex::new(LineDecoder::new()),
            outbound: Mutex::new(VecDeque::new()),
            write_pending: AtomicBool::new(false),
            congestion: Mutex::new(CongestionController::new(congestion, now)),
            transfer: Mutex::new(TransferState::new()),
            transfer_config,
            active: AtomicBool::new(true),
            last_activity: Mutex::new(now),
            notifier,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Session identifier
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Peer label
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// False once closing has begun
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Transfer pacing parameters of this session
    #[must_use]
    pub fn transfer_config(&self) -> &TransferConfig {
        &self.transfer_config
    }

    /// Feed bytes read from the socket and dispatch the decoded messages.
    ///
    /// Malformed and unknown commands are logged and dropped.
    pub fn on_bytes_received(self: &Arc<Self>, bytes: &[u8], handler: &dyn CommandHandler) {
        if !self.is_active() {
            return;
        }
        self.touch(Instant::now());

        let commands = {
            let mut decoder = self.decoder.lock();
            let discarded = decoder.discarded();
            let commands = decoder.decode(bytes);
            if decoder.discarded() > discarded {
                tracing::warn!("{}: dropped oversized line", self.label);
            }
            commands
        };

        for command in commands {
            if !self.is_active() {
                break;
            }
            match Message::try_from(command) {
                Ok(message) => {
                    tracing::trace!("{} <- {}", self.label, message);
                    handler.on_message(self, message);
                }
                Err(e) => tracing::warn!("{}: ignoring frame: {}", self.label, e),
            }
        }
    }

    /// Encode and queue a message
    pub fn send(&self, message: &Message) -> bool {
        tracing::trace!("{} -> {}", self.label, message);
        self.enqueue_send(message.encode())
    }

    /// Queue an encoded frame and signal write interest.
    ///
    /// Returns false (and drops the frame) once the session is inactive.
    pub fn enqueue_send(&self, frame: Vec<u8>) -> bool {
        if !self.is_active() {
            return false;
        }
        let notify = {
            let mut outbound = self.outbound.lock();
            outbound.push_back(OutboundFrame {
                bytes: frame,
                written: 0,
            });
            !self.write_pending.swap(true, Ordering::AcqRel)
        };
        if notify {
            self.notifier.notify(self.id);
        }
        true
    }

    /// Write queued frames to `writer` until it would block or the queue
    /// empties.
    ///
    /// Returns whether data is still pending. A partially written frame stays
    /// at the head of the queue with its offset.
    ///
    /// # Errors
    ///
    /// Returns any write error other than `WouldBlock`/`Interrupted`.
    pub fn flush_to<W: Write>(&self, writer: &mut W) -> io::Result<bool> {
        let mut outbound = self.outbound.lock();
        while let Some(frame) = outbound.front_mut() {
            match writer.write(&frame.bytes[frame.written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    frame.written += n;
                    if frame.written == frame.bytes.len() {
                        outbound.pop_front();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        self.write_pending.store(false, Ordering::Release);
        Ok(false)
    }

    /// Flush the outbound queue into the session's own socket
    pub(crate) fn flush_writable(&self) -> io::Result<bool> {
        let mut stream = self.stream.lock();
        match stream.as_mut() {
            Some(stream) => self.flush_to(stream),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Read from the session's socket
    pub(crate) fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self.stream.lock();
        match stream.as_mut() {
            Some(stream) => stream.read(buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Run `f` on the socket, if still open
    pub(crate) fn with_stream<R>(&self, f: impl FnOnce(&mut TcpStream) -> R) -> Option<R> {
        self.stream.lock().as_mut().map(f)
    }

    /// Mark inactive, drop pending frames and release the socket.
    ///
    /// A running transfer is marked failed; its worker notices at the next
    /// chunk. Returns false if the session was already closed.
    pub fn close(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.outbound.lock().clear();
        drop(self.stream.lock().take());
        let mut transfer = self.transfer.lock();
        if transfer.is_active() {
            transfer.fail(Instant::now());
        }
        true
    }

    /// Record read activity
    pub fn touch(&self, now: Instant) {
        *self.last_activity.lock() = now;
    }

    /// Time of the last read activity
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Whether no read happened for longer than `timeout` before `now`
    #[must_use]
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity()) > timeout
    }

    /// Frames waiting to be written
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.outbound.lock().len()
    }

    /// Whether the congestion window allows another data packet
    #[must_use]
    pub fn can_send(&self) -> bool {
        self.congestion.lock().can_send()
    }

    /// Smoothed RTT of the congestion controller
    #[must_use]
    pub fn smoothed_rtt(&self) -> Duration {
        self.congestion.lock().smoothed_rtt()
    }

    /// Active congestion algorithm
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.congestion.lock().algorithm()
    }

    /// Switch algorithm, restarting the window from slow start
    pub fn set_algorithm(&self, algorithm: Algorithm) {
        self.congestion.lock().set_algorithm(algorithm);
        tracing::info!("{}: congestion algorithm set to {}", self.label, algorithm);
    }

    /// A data chunk of `bytes` was queued
    pub fn record_sent(&self, bytes: usize, now: Instant) {
        self.congestion.lock().on_data_sent(bytes, now);
        self.transfer.lock().record_sent(bytes, now);
    }

    /// Handle `ACK:<count>`.
    ///
    /// Every ACK returns the window slot of its chunk. Without a matching
    /// send time the smoothed RTT stands in for the sample.
    pub fn on_ack(&self, count: u64, now: Instant) {
        let rtt = self.transfer.lock().acknowledge(count, now);
        let mut congestion = self.congestion.lock();
        let rtt = rtt.unwrap_or_else(|| {
            tracing::trace!("{}: ACK {} without send time", self.label, count);
            congestion.smoothed_rtt()
        });
        congestion.on_ack_received(now, rtt);
    }

    /// Handle `NACK:<count>`
    pub fn on_nack(&self, count: u64, now: Instant) {
        self.transfer.lock().acknowledge(count, now);
        self.congestion.lock().on_packet_loss(now);
        tracing::debug!("{}: packet {} reported lost", self.label, count);
    }

    /// The window stayed exhausted past the ack timeout
    pub fn on_ack_timeout(&self, now: Instant) {
        self.congestion.lock().on_packet_loss(now);
        tracing::debug!("{}: ack timeout, treating as loss", self.label);
    }

    /// Handle `PONG:<timestamp>` as an RTT sample
    pub fn on_pong(&self, timestamp_ms: u64, now: Instant) {
        let rtt = Duration::from_millis(unix_millis().saturating_sub(timestamp_ms));
        self.congestion.lock().on_ack_received(now, rtt);
    }

    /// Start a transfer unless one is already running
    ///
    /// # Errors
    ///
    /// Returns `TransferError::InProgress` while another transfer is active.
    pub fn begin_transfer(
        &self,
        direction: Direction,
        filename: &str,
        size: u64,
        now: Instant,
    ) -> Result<(), TransferError> {
        let mut transfer = self.transfer.lock();
        if transfer.is_active() {
            return Err(TransferError::InProgress);
        }
        match direction {
            Direction::Download => transfer.start_download(filename, size, now),
            Direction::Upload => transfer.start_upload(filename, size, now),
            Direction::Idle => return Err(TransferError::NotActive),
        }
        Ok(())
    }

    /// Whether the session is open and a transfer is running
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.is_active() && self.transfer.lock().is_active()
    }

    /// Decode and store one base64 chunk, answering `ACK` or (with the
    /// configured loss probability) `NACK`
    ///
    /// # Errors
    ///
    /// Returns `TransferError::Decode` for invalid base64 and
    /// `TransferError::NotActive` when no transfer is running.
    pub fn receive_chunk(&self, payload: &str) -> Result<ChunkReceipt, TransferError> {
        let bytes = STANDARD.decode(payload.as_bytes())?;
        let (count, upload_complete) = {
            let mut transfer = self.transfer.lock();
            if !transfer.is_active() {
                return Err(TransferError::NotActive);
            }
            let count = transfer.append(&bytes);
            (count, transfer.is_upload_complete())
        };

        let loss = self.transfer_config.simulated_loss;
        let lost = loss > 0.0 && rand::thread_rng().gen_bool(loss);
        self.send(&if lost {
            Message::Nack(count)
        } else {
            Message::Ack(count)
        });

        Ok(ChunkReceipt {
            count,
            lost,
            upload_complete,
        })
    }

    /// Run `f` with exclusive access to the transfer state
    pub fn with_transfer<R>(&self, f: impl FnOnce(&mut TransferState) -> R) -> R {
        f(&mut self.transfer.lock())
    }

    /// Metrics for the presentation layer
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        let congestion = {
            let mut controller = self.congestion.lock();
            controller.refresh_throughput(now);
            controller.snapshot()
        };
        SessionSnapshot {
            id: self.id,
            label: self.label.clone(),
            congestion,
            queue_depth: self.queue_depth(),
            transfer: self.transfer.lock().snapshot(now),
        }
    }

    /// Run `work` on a named worker thread owned by this session
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn spawn_worker<F>(&self, name: &str, work: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("{}-{}", name, self.id.0))
            .spawn(work)?;
        let mut workers = self.workers.lock();
        workers.retain(|h| !h.is_finished());
        workers.push(handle);
        Ok(())
    }

    /// Whether any worker thread is still running
    #[must_use]
    pub fn has_running_workers(&self) -> bool {
        self.workers.lock().iter().any(|h| !h.is_finished())
    }

    /// Wait for every worker thread to exit
    pub(crate) fn join_workers(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                tracing::warn!("{}: transfer worker panicked", self.label);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::Command;
    use crossbeam_channel::Receiver;

    pub(crate) fn detached(config: &CongestionConfig, transfer: TransferConfig) -> (Arc<Session>, Receiver<SessionId>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let session = Session::new(
            SessionId(2),
            "Client-1 (test)".to_string(),
            None,
            config,
            transfer,
            WriteNotifier::new(tx, None),
        );
        (Arc::new(session), rx)
    }

    fn session() -> (Arc<Session>, Receiver<SessionId>) {
        detached(&CongestionConfig::default(), TransferConfig::default())
    }

    /// Accepts at most `budget` bytes, then reports `WouldBlock`
    struct Throttled {
        written: Vec<u8>,
        budget: usize,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Message>>);

    impl CommandHandler for Recorder {
        fn on_message(&self, _session: &Arc<Session>, message: Message) {
            self.0.lock().push(message);
        }
    }

    #[test]
    fn test_enqueue_notifies_once_until_drained() {
        let (session, rx) = session();

        assert!(session.send(&Message::Ping(1)));
        assert!(session.send(&Message::Ping(2)));
        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(session.queue_depth(), 2);

        let mut out = Vec::new();
        assert!(!session.flush_to(&mut out).unwrap());
        assert_eq!(out, b"PING:1\nPING:2\n");

        session.send(&Message::Ping(3));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_partial_write_keeps_frame_at_head() {
        let (session, _rx) = session();
        session.send(&Message::Download("a.txt".into()));
        session.send(&Message::ListFiles);

        let mut writer = Throttled {
            written: Vec::new(),
            budget: 5,
        };
        assert!(session.flush_to(&mut writer).unwrap());
        assert_eq!(writer.written, b"DOWNL");
        assert_eq!(session.queue_depth(), 2);

        writer.budget = 12;
        assert!(session.flush_to(&mut writer).unwrap());
        assert_eq!(writer.written, b"DOWNLOAD:a.txt\nLI");
        assert_eq!(session.queue_depth(), 1);

        writer.budget = usize::MAX;
        assert!(!session.flush_to(&mut writer).unwrap());
        assert_eq!(writer.written, b"DOWNLOAD:a.txt\nLIST_FILES:\n");
        assert_eq!(session.queue_depth(), 0);
    }

    #[test]
    fn test_close_suppresses_sends() {
        let (session, _rx) = session();
        session.send(&Message::Ping(1));

        assert!(session.close());
        assert!(!session.close());
        assert!(!session.is_active());
        assert_eq!(session.queue_depth(), 0);
        assert!(!session.send(&Message::Ping(2)));
        assert_eq!(session.queue_depth(), 0);
    }

    #[test]
    fn test_on_bytes_received_dispatches_and_skips_bad_frames() {
        let (session, _rx) = session();
        let recorder = Recorder::default();

        session.on_bytes_received(b"LIST_FILES\nBOGUS:1\nPING:abc\nDOWN", &recorder);
        session.on_bytes_received(b"LOAD:a.txt\n", &recorder);

        assert_eq!(
            *recorder.0.lock(),
            vec![Message::ListFiles, Message::Download("a.txt".into())]
        );
    }

    #[test]
    fn test_receive_chunk_acks_and_completes_upload() {
        let (session, _rx) = session();
        session
            .begin_transfer(Direction::Upload, "report.pdf", 6, Instant::now())
            .unwrap();

        let receipt = session.receive_chunk(&STANDARD.encode(b"abc")).unwrap();
        assert_eq!(
            receipt,
            ChunkReceipt {
                count: 1,
                lost: false,
                upload_complete: false
            }
        );
        let receipt = session.receive_chunk(&STANDARD.encode(b"def")).unwrap();
        assert!(receipt.upload_complete);

        let mut out = Vec::new();
        session.flush_to(&mut out).unwrap();
        assert_eq!(out, b"ACK:1\nACK:2\n");
        assert_eq!(session.with_transfer(|t| t.take_buffer()), b"abcdef");
    }

    #[test]
    fn test_receive_chunk_simulated_loss() {
        let transfer = TransferConfig {
            simulated_loss: 1.0,
            ..TransferConfig::default()
        };
        let (session, _rx) = detached(&CongestionConfig::default(), transfer);
        session
            .begin_transfer(Direction::Download, "f", 3, Instant::now())
            .unwrap();

        let receipt = session.receive_chunk(&STANDARD.encode(b"xyz")).unwrap();
        assert!(receipt.lost);

        let mut out = Vec::new();
        session.flush_to(&mut out).unwrap();
        assert_eq!(out, b"NACK:1\n");
        // Data is kept even when the ack is "lost"
        assert_eq!(session.with_transfer(|t| t.transferred()), 3);
    }

    #[test]
    fn test_receive_chunk_errors() {
        let (session, _rx) = session();
        assert_eq!(
            session.receive_chunk(&STANDARD.encode(b"x")),
            Err(TransferError::NotActive)
        );

        session
            .begin_transfer(Direction::Upload, "f", 3, Instant::now())
            .unwrap();
        assert!(matches!(
            session.receive_chunk("not base64!"),
            Err(TransferError::Decode(_))
        ));
    }

    #[test]
    fn test_begin_transfer_rejects_concurrent() {
        let (session, _rx) = session();
        let now = Instant::now();
        session.begin_transfer(Direction::Download, "a", 10, now).unwrap();
        assert_eq!(
            session.begin_transfer(Direction::Upload, "b", 10, now),
            Err(TransferError::InProgress)
        );

        session.with_transfer(|t| t.finish(now));
        assert!(session.begin_transfer(Direction::Upload, "b", 10, now).is_ok());
    }

    #[test]
    fn test_ack_restores_window() {
        let (session, _rx) = session();
        let start = Instant::now();
        session.begin_transfer(Direction::Download, "f", 2048, start).unwrap();

        session.record_sent(1024, start);
        assert!(!session.can_send());

        session.on_ack(1, start + Duration::from_millis(40));
        assert!(session.can_send());
        let snapshot = session.snapshot(start + Duration::from_millis(40));
        assert!((snapshot.congestion.smoothed_rtt_ms - 40.0).abs() < 1e-9);
        assert_eq!(snapshot.transfer.transferred, 1024);
    }

    #[test]
    fn test_late_ack_after_finish_restores_window() {
        let (session, _rx) = session();
        let start = Instant::now();
        session.begin_transfer(Direction::Download, "f", 1024, start).unwrap();
        session.record_sent(1024, start);
        session.with_transfer(|t| t.finish(start));
        assert!(!session.can_send());

        session.on_ack(1, start + Duration::from_millis(20));
        assert!(session.can_send());

        // A second download starts with budget and without a false loss
        session.begin_transfer(Direction::Download, "g", 1024, start).unwrap();
        assert!(session.can_send());
        assert_eq!(session.snapshot(start).congestion.packets_lost, 0);
    }

    #[test]
    fn test_ack_without_send_time_still_restores_window() {
        let (session, _rx) = session();
        let start = Instant::now();
        session.begin_transfer(Direction::Download, "f", 1024, start).unwrap();
        session.record_sent(1024, start);
        session.with_transfer(|t| t.finish(start));
        session.begin_transfer(Direction::Download, "g", 1024, start).unwrap();
        assert!(!session.can_send());

        session.on_ack(1, start);
        assert!(session.can_send());
    }

    #[test]
    fn test_nack_counts_loss() {
        let (session, _rx) = session();
        let now = Instant::now();
        session.begin_transfer(Direction::Download, "f", 1024, now).unwrap();
        session.record_sent(1024, now);
        session.on_nack(1, now);

        let snapshot = session.snapshot(now);
        assert_eq!(snapshot.congestion.packets_lost, 1);
        assert!(session.can_send());
    }

    #[test]
    fn test_close_fails_running_transfer() {
        let (session, _rx) = session();
        session
            .begin_transfer(Direction::Upload, "f", 10, Instant::now())
            .unwrap();
        assert!(session.is_streaming());

        session.close();
        assert!(!session.is_streaming());
        assert_eq!(
            session.with_transfer(|t| t.status()),
            crate::transfer::TransferStatus::Failed
        );
    }

    #[test]
    fn test_idle_detection() {
        let (session, _rx) = session();
        let now = Instant::now();
        session.touch(now);

        assert!(!session.is_idle(now + Duration::from_secs(60), Duration::from_secs(60)));
        assert!(session.is_idle(now + Duration::from_secs(61), Duration::from_secs(60)));
    }

    #[test]
    fn test_spawn_and_join_workers() {
        let (session, _rx) = session();
        let worker_session = Arc::clone(&session);
        session
            .spawn_worker("test", move || {
                worker_session.send(&Message::Pong(9));
            })
            .unwrap();
        session.join_workers();

        let mut out = Vec::new();
        session.flush_to(&mut out).unwrap();
        assert_eq!(Command::parse_line(out.trim_ascii_end()), Some(Command::new("PONG", "9")));
    }
}
