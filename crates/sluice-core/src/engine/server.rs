//! Server role: serves a storage directory to any number of clients.

use super::event_loop::{EngineHandle, EventLoop};
use super::{
    Control, EngineState, SessionTable, abort_transfer, fail_transfer, handle_common, reject,
};
use crate::config::ServerConfig;
use crate::congestion::Algorithm;
use crate::error::{Error, Result, TransferError};
use crate::events::{EngineEvent, EventSink, SessionId, SessionSnapshot};
use crate::message::Message;
use crate::session::{CommandHandler, Session};
use crate::transfer::{
    Direction, SendOutcome, Storage, TransferStatus, sanitize_filename, stream_chunks,
};
use crossbeam_channel::Receiver;
use mio::net::TcpListener;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

struct ServerHandler {
    storage: Storage,
    sink: EventSink,
}

impl CommandHandler for ServerHandler {
    fn on_message(&self, session: &Arc<Session>, message: Message) {
        let Some(message) = handle_common(session, message, &self.sink) else {
            return;
        };
        match message {
            Message::ListFiles => self.list_files(session),
            Message::Download(filename) => self.start_download(session, &filename),
            Message::Upload { filename, size } => self.start_upload(session, &filename, size),
            Message::UploadData(payload) => self.receive_upload(session, &payload),
            Message::Error(text) => abort_transfer(session, &self.sink, text),
            other => tracing::debug!("{}: unexpected {} ignored", session.label(), other.name()),
        }
    }
}

impl ServerHandler {
    fn list_files(&self, session: &Session) {
        match self.storage.list() {
            Ok(files) => {
                tracing::debug!("{}: listing {} files", session.label(), files.len());
                session.send(&Message::FileList(files));
            }
            Err(e) => reject(session, &TransferError::from(e)),
        }
    }

    fn start_download(&self, session: &Arc<Session>, filename: &str) {
        let opened = sanitize_filename(filename).and_then(|name| {
            let (file, size) = self.storage.open_file(name)?;
            session.begin_transfer(Direction::Download, name, size, Instant::now())?;
            Ok((name.to_string(), file, size))
        });
        let (name, file, size) = match opened {
            Ok(opened) => opened,
            Err(e) => return reject(session, &e),
        };

        tracing::info!("{}: sending {} ({} bytes)", session.label(), name, size);
        session.send(&Message::DownloadStart {
            filename: name.clone(),
            size,
        });
        self.sink.emit(EngineEvent::TransferStarted {
            id: session.id(),
            filename: name.clone(),
            direction: Direction::Download,
            size,
        });

        let worker = Arc::clone(session);
        let sink = self.sink.clone();
        let spawned = session.spawn_worker("download", move || {
            let config = worker.transfer_config().clone();
            match stream_chunks(&worker, file, &config, Message::FileData) {
                Ok(SendOutcome::Completed(bytes)) => {
                    worker.with_transfer(|t| t.finish(Instant::now()));
                    worker.send(&Message::DownloadComplete(name.clone()));
                    tracing::info!("{}: sent {} ({} bytes)", worker.label(), name, bytes);
                    sink.emit(EngineEvent::TransferCompleted {
                        id: worker.id(),
                        filename: name,
                        direction: Direction::Download,
                        bytes,
                        path: None,
                    });
                }
                Ok(SendOutcome::Cancelled) => {
                    tracing::debug!("{}: download of {} cancelled", worker.label(), name);
                }
                Err(e) => fail_transfer(&worker, &sink, &e),
            }
        });
        if let Err(e) = spawned {
            fail_transfer(session, &self.sink, &TransferError::from(e));
        }
    }

    fn start_upload(&self, session: &Arc<Session>, filename: &str, size: u64) {
        let accepted = sanitize_filename(filename).and_then(|name| {
            session.begin_transfer(Direction::Upload, name, size, Instant::now())?;
            Ok(name.to_string())
        });
        let name = match accepted {
            Ok(name) => name,
            Err(e) => return reject(session, &e),
        };

        tracing::info!("{}: receiving {} ({} bytes)", session.label(), name, size);
        session.send(&Message::UploadReady(name.clone()));
        self.sink.emit(EngineEvent::TransferStarted {
            id: session.id(),
            filename: name,
            direction: Direction::Upload,
            size,
        });

        if size == 0 {
            self.complete_upload(session);
        }
    }

    fn receive_upload(&self, session: &Arc<Session>, payload: &str) {
        match session.receive_chunk(payload) {
            Ok(receipt) if receipt.upload_complete => self.complete_upload(session),
            Ok(_) => {}
            Err(TransferError::NotActive) => {
                tracing::debug!("{}: UPLOAD_DATA outside a transfer", session.label());
            }
            Err(e) => fail_transfer(session, &self.sink, &e),
        }
    }

    /// Store the received bytes off the event loop, then confirm
    fn complete_upload(&self, session: &Arc<Session>) {
        let (name, bytes) = session.with_transfer(|t| {
            t.finish(Instant::now());
            (t.filename().to_string(), t.take_buffer())
        });

        let worker = Arc::clone(session);
        let storage = self.storage.clone();
        let sink = self.sink.clone();
        let spawned = session.spawn_worker("store", move || match storage.save(&name, &bytes) {
            Ok(path) => {
                tracing::info!("{}: stored {} ({} bytes)", worker.label(), name, bytes.len());
                worker.send(&Message::UploadComplete(name.clone()));
                sink.emit(EngineEvent::TransferCompleted {
                    id: worker.id(),
                    filename: name,
                    direction: Direction::Upload,
                    bytes: bytes.len() as u64,
                    path: Some(path),
                });
            }
            Err(e) => fail_stored(&worker, &sink, &name, &e),
        });
        if let Err(e) = spawned {
            fail_transfer(session, &self.sink, &TransferError::from(e));
        }
    }
}

/// Report a failed save of an upload that was already marked complete.
///
/// Leaves a newer transfer on the same session untouched.
fn fail_stored(session: &Session, sink: &EventSink, name: &str, err: &TransferError) {
    session.with_transfer(|t| {
        if t.filename() == name && t.status() == TransferStatus::Completed {
            t.fail(Instant::now());
        }
    });
    tracing::warn!("{}: storing {} failed: {}", session.label(), name, err);
    session.send(&Message::Error(err.to_string()));
    sink.emit(EngineEvent::TransferFailed {
        id: session.id(),
        filename: name.to_string(),
        reason: err.to_string(),
    });
}

/// A running server
///
/// Dropping the server stops it.
#[derive(Debug)]
pub struct Server {
    handle: EngineHandle,
    sessions: Arc<SessionTable>,
    sink: EventSink,
    events: Receiver<EngineEvent>,
}

impl Server {
    /// Validate `config`, bind the listener and start the engine thread
    ///
    /// # Errors
    ///
    /// Returns a configuration error before anything is opened, or an I/O
    /// error if the storage directory or listener cannot be set up.
    pub fn start(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let storage = Storage::open(&config.storage_dir)?;
        let listener = TcpListener::bind(config.listen_addr)?;
        let local_addr = listener.local_addr()?;

        let (sink, events) = EventSink::channel();
        let sessions = Arc::new(SessionTable::new());
        let mut event_loop = EventLoop::new(config.engine.clone(), Arc::clone(&sessions), sink.clone())?;
        event_loop.listen(listener)?;

        let handler = Arc::new(ServerHandler {
            storage,
            sink: sink.clone(),
        });
        let handle = event_loop.spawn("sluice-server", handler, local_addr)?;
        tracing::info!(
            "Server listening on {} (storage: {})",
            local_addr,
            config.storage_dir.display()
        );

        Ok(Self {
            handle,
            sessions,
            sink,
            events,
        })
    }

    /// Bound listening address
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    /// Engine lifecycle state
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.handle.state()
    }

    /// Event stream
    #[must_use]
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    /// Number of connected clients
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Metrics of every connected client
    #[must_use]
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.sessions.snapshots(Instant::now())
    }

    /// Switch the congestion algorithm of one client session
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` if the session does not exist.
    pub fn switch_algorithm(&self, id: SessionId, algorithm: Algorithm) -> Result<()> {
        let session = self
            .sessions
            .get(id)
            .ok_or(Error::invalid_state("no such session"))?;
        session.set_algorithm(algorithm);
        self.sink.emit(EngineEvent::AlgorithmChanged { id, algorithm });
        Ok(())
    }

    /// Close one client session
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is no longer running.
    pub fn disconnect(&self, id: SessionId) -> Result<()> {
        self.handle.control(Control::Close(id))
    }

    /// Close every session and stop the engine thread
    ///
    /// # Errors
    ///
    /// Returns an error if the engine thread panicked.
    pub fn stop(&mut self) -> Result<()> {
        self.handle.stop()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Err(e) = self.handle.stop() {
            tracing::warn!("Server shutdown failed: {}", e);
        }
    }
}
