//! Client role: one outbound connection to a server.

use super::event_loop::{EngineHandle, EventLoop};
use super::{EngineState, SessionTable, abort_transfer, fail_transfer, handle_common};
use crate::config::ClientConfig;
use crate::congestion::Algorithm;
use crate::error::{Error, Result, TransferError};
use crate::events::{EngineEvent, EventSink, SessionSnapshot};
use crate::message::Message;
use crate::session::{CommandHandler, Session};
use crate::transfer::{Direction, SendOutcome, Storage, sanitize_filename, stream_chunks};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use socket2::SockRef;
use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Kernel socket buffer size requested for the client connection
const SOCKET_BUFFER_SIZE: usize = 64 * 1024;

struct ClientHandler {
    downloads: Storage,
    sink: EventSink,
    pending_upload: Mutex<Option<(String, PathBuf)>>,
}

impl CommandHandler for ClientHandler {
    fn on_message(&self, session: &Arc<Session>, message: Message) {
        let Some(message) = handle_common(session, message, &self.sink) else {
            return;
        };
        match message {
            Message::FileList(files) => {
                tracing::info!("Server lists {} files", files.len());
                self.sink.emit(EngineEvent::FileList { files });
            }
            Message::DownloadStart { filename, size } => {
                self.on_download_start(session, &filename, size);
            }
            Message::FileData(payload) => self.on_file_data(session, &payload),
            Message::DownloadComplete(_) => self.on_download_complete(session),
            Message::UploadReady(filename) => self.on_upload_ready(session, &filename),
            Message::UploadComplete(filename) => self.on_upload_complete(session, &filename),
            Message::Error(text) => self.on_error(session, text),
            other => tracing::debug!("{}: unexpected {} ignored", session.label(), other.name()),
        }
    }
}

impl ClientHandler {
    fn on_download_start(&self, session: &Session, filename: &str, size: u64) {
        let started = sanitize_filename(filename).and_then(|name| {
            session.begin_transfer(Direction::Download, name, size, Instant::now())
        });
        match started {
            Ok(()) => {
                tracing::info!("Downloading {} ({} bytes)", filename, size);
                self.sink.emit(EngineEvent::TransferStarted {
                    id: session.id(),
                    filename: filename.trim().to_string(),
                    direction: Direction::Download,
                    size,
                });
            }
            Err(e) => {
                tracing::warn!("Refusing download of {}: {}", filename, e);
                session.send(&Message::Error(e.to_string()));
            }
        }
    }

    fn on_file_data(&self, session: &Session, payload: &str) {
        match session.receive_chunk(payload) {
            Ok(_) => {}
            Err(TransferError::NotActive) => {
                tracing::debug!("FILE_DATA outside a transfer dropped");
            }
            Err(e) => fail_transfer(session, &self.sink, &e),
        }
    }

    fn on_download_complete(&self, session: &Arc<Session>) {
        let finished = session.with_transfer(|t| {
            if !t.is_active() || t.direction() != Direction::Download {
                return None;
            }
            t.finish(Instant::now());
            Some((t.filename().to_string(), t.take_buffer(), t.total_size()))
        });
        let Some((name, bytes, expected)) = finished else {
            tracing::debug!("DOWNLOAD_COMPLETE without an active download");
            return;
        };
        if bytes.len() as u64 != expected {
            tracing::warn!(
                "{}: received {} of {} announced bytes",
                name,
                bytes.len(),
                expected
            );
        }

        let worker = Arc::clone(session);
        let downloads = self.downloads.clone();
        let sink = self.sink.clone();
        let spawned = session.spawn_worker("save", move || match downloads.save(&name, &bytes) {
            Ok(path) => {
                tracing::info!("Saved {} to {}", name, path.display());
                sink.emit(EngineEvent::TransferCompleted {
                    id: worker.id(),
                    filename: name,
                    direction: Direction::Download,
                    bytes: bytes.len() as u64,
                    path: Some(path),
                });
            }
            Err(e) => {
                tracing::warn!("Saving {} failed: {}", name, e);
                sink.emit(EngineEvent::TransferFailed {
                    id: worker.id(),
                    filename: name,
                    reason: e.to_string(),
                });
            }
        });
        if let Err(e) = spawned {
            tracing::warn!("Failed to spawn save worker: {}", e);
        }
    }

    fn on_upload_ready(&self, session: &Arc<Session>, filename: &str) {
        let pending = self.pending_upload.lock().take();
        let path = match pending {
            Some((name, path)) if name == filename => path,
            Some(other) => {
                tracing::warn!("UPLOAD_READY for {} while {} is pending", filename, other.0);
                *self.pending_upload.lock() = Some(other);
                return;
            }
            None => {
                tracing::debug!("UPLOAD_READY for {} without a pending upload", filename);
                return;
            }
        };

        let worker = Arc::clone(session);
        let sink = self.sink.clone();
        let spawned = session.spawn_worker("upload", move || {
            let config = worker.transfer_config().clone();
            let sent = File::open(&path)
                .map_err(TransferError::from)
                .and_then(|file| stream_chunks(&worker, file, &config, Message::UploadData));
            match sent {
                Ok(SendOutcome::Completed(bytes)) => {
                    tracing::debug!("Queued {} bytes of {}", bytes, path.display());
                }
                Ok(SendOutcome::Cancelled) => tracing::debug!("Upload of {} cancelled", path.display()),
                Err(e) => fail_transfer(&worker, &sink, &e),
            }
        });
        if let Err(e) = spawned {
            fail_transfer(session, &self.sink, &TransferError::from(e));
        }
    }

    fn on_upload_complete(&self, session: &Session, filename: &str) {
        let finished = session.with_transfer(|t| {
            if !t.is_active() || t.direction() != Direction::Upload {
                return None;
            }
            t.finish(Instant::now());
            Some(t.transferred())
        });
        match finished {
            Some(bytes) => {
                tracing::info!("Upload of {} complete ({} bytes)", filename, bytes);
                self.sink.emit(EngineEvent::TransferCompleted {
                    id: session.id(),
                    filename: filename.to_string(),
                    direction: Direction::Upload,
                    bytes,
                    path: None,
                });
            }
            None => tracing::debug!("UPLOAD_COMPLETE for {} without an active upload", filename),
        }
    }

    /// The server refused a request or aborted the running transfer
    fn on_error(&self, session: &Session, text: String) {
        self.pending_upload.lock().take();
        abort_transfer(session, &self.sink, text);
    }
}

/// A connected client
///
/// Dropping the client disconnects it.
#[derive(Debug)]
pub struct Client {
    handle: EngineHandle,
    session: Arc<Session>,
    handler: Arc<ClientHandler>,
    sink: EventSink,
    events: Receiver<EngineEvent>,
    peer_addr: SocketAddr,
}

impl std::fmt::Debug for ClientHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandler")
            .field("downloads", &self.downloads.root())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Validate `config`, connect and start the engine thread
    ///
    /// # Errors
    ///
    /// Returns a configuration error before any socket is opened, or an I/O
    /// error if the connection cannot be established.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let peer_addr = config.resolve()?;
        let downloads = Storage::open(&config.download_dir)?;

        let stream = std::net::TcpStream::connect_timeout(&peer_addr, config.connect_timeout)?;
        stream.set_nodelay(true)?;
        let socket = SockRef::from(&stream);
        socket.set_keepalive(true)?;
        socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;
        socket.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;
        stream.set_nonblocking(true)?;
        let stream = mio::net::TcpStream::from_std(stream);
        let local_addr = stream.local_addr()?;

        let (sink, events) = EventSink::channel();
        let sessions = Arc::new(SessionTable::new());
        let mut event_loop = EventLoop::new(config.engine.clone(), sessions, sink.clone())?;
        let session = event_loop.add_session(stream, format!("Server ({peer_addr})"))?;

        let handler = Arc::new(ClientHandler {
            downloads,
            sink: sink.clone(),
            pending_upload: Mutex::new(None),
        });
        let handle = event_loop.spawn("sluice-client", Arc::clone(&handler), local_addr)?;
        tracing::info!("Connected to {}", peer_addr);

        Ok(Self {
            handle,
            session,
            handler,
            sink,
            events,
            peer_addr,
        })
    }

    /// Server address
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Local address of the connection
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    /// Engine lifecycle state
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.handle.state()
    }

    /// Whether the connection is still open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_active()
    }

    /// Event stream
    #[must_use]
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    /// Directory downloads are saved into
    #[must_use]
    pub fn download_dir(&self) -> &Path {
        self.handler.downloads.root()
    }

    fn send(&self, message: &Message) -> Result<()> {
        if self.session.send(message) {
            Ok(())
        } else {
            Err(Error::invalid_state("not connected"))
        }
    }

    /// Ask the server for its file listing; the answer arrives as
    /// `EngineEvent::FileList`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` once disconnected.
    pub fn list_files(&self) -> Result<()> {
        self.send(&Message::ListFiles)
    }

    /// Request `filename` from the server
    ///
    /// # Errors
    ///
    /// Returns a transfer error for invalid names or while another transfer
    /// runs, `Error::InvalidState` once disconnected.
    pub fn request_download(&self, filename: &str) -> Result<()> {
        let name = sanitize_filename(filename)?;
        if self.session.with_transfer(|t| t.is_active()) {
            return Err(TransferError::InProgress.into());
        }
        self.send(&Message::Download(name.to_string()))
    }

    /// Announce an upload of the local file at `path`; chunks start flowing
    /// once the server answers `UPLOAD_READY`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be inspected, its name is invalid,
    /// another transfer runs, or the connection is closed.
    pub fn request_upload(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(TransferError::FileNotFound(path.display().to_string()).into());
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidFilename(path.display().to_string()))?;
        let name = sanitize_filename(name)?.to_string();
        let size = metadata.len();

        self.session
            .begin_transfer(Direction::Upload, &name, size, Instant::now())?;
        *self.handler.pending_upload.lock() = Some((name.clone(), path.to_path_buf()));

        tracing::info!("Uploading {} ({} bytes)", name, size);
        self.sink.emit(EngineEvent::TransferStarted {
            id: self.session.id(),
            filename: name.clone(),
            direction: Direction::Upload,
            size,
        });
        self.send(&Message::Upload {
            filename: name,
            size,
        })
    }

    /// Switch the local congestion algorithm and tell the server
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` once disconnected.
    pub fn switch_algorithm(&self, algorithm: Algorithm) -> Result<()> {
        self.session.set_algorithm(algorithm);
        self.sink.emit(EngineEvent::AlgorithmChanged {
            id: self.session.id(),
            algorithm,
        });
        self.send(&Message::Algorithm(algorithm))
    }

    /// Metrics of the connection
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot(Instant::now())
    }

    /// Disconnect and stop the engine thread
    ///
    /// # Errors
    ///
    /// Returns an error if the engine thread panicked.
    pub fn stop(&mut self) -> Result<()> {
        self.handle.stop()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(e) = self.handle.stop() {
            tracing::warn!("Client shutdown failed: {}", e);
        }
    }
}
