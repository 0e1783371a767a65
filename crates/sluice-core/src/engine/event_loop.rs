//! The mio event loop shared by both roles.

use super::{Control, EngineState, Interval, SessionTable, StateCell};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::{CloseReason, EngineEvent, EventSink, SessionId};
use crate::message::Message;
use crate::session::{CommandHandler, Session, WriteNotifier, unix_millis};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_SESSION: usize = 2;

#[derive(Debug, Clone, Copy)]
struct Readiness {
    token: Token,
    readable: bool,
    writable: bool,
    closed: bool,
}

/// API-side handle of a spawned event loop
#[derive(Debug)]
pub(crate) struct EngineHandle {
    control: Sender<Control>,
    waker: Arc<Waker>,
    state: Arc<StateCell>,
    thread: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl EngineHandle {
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn state(&self) -> EngineState {
        self.state.get()
    }

    /// Post a control message and wake the loop
    pub(crate) fn control(&self, message: Control) -> Result<()> {
        self.control
            .send(message)
            .map_err(|_| Error::channel("engine control channel closed"))?;
        self.waker.wake()?;
        Ok(())
    }

    /// Shut the loop down and wait for its thread
    pub(crate) fn stop(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        // The loop may already have exited on its own
        let _ = self.control.send(Control::Shutdown);
        let _ = self.waker.wake();
        thread
            .join()
            .map_err(|_| Error::invalid_state("engine thread panicked"))
    }
}

/// Engine state owned by the loop thread
pub(crate) struct EventLoop {
    poll: Poll,
    events: Events,
    ready: Vec<Readiness>,
    waker: Arc<Waker>,
    listener: Option<TcpListener>,
    sessions: Arc<SessionTable>,
    retired: Vec<Arc<Session>>,
    write_interest: HashSet<SessionId>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    writes: Receiver<SessionId>,
    notifier: WriteNotifier,
    sink: EventSink,
    state: Arc<StateCell>,
    config: EngineConfig,
    buffer: Vec<u8>,
    next_token: usize,
    accepted: usize,
    ping: Option<Interval>,
    metrics: Option<Interval>,
    running: bool,
}

impl EventLoop {
    pub(crate) fn new(config: EngineConfig, sessions: Arc<SessionTable>, sink: EventSink) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let (writes_tx, writes) = crossbeam_channel::unbounded();
        let now = Instant::now();

        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            ready: Vec::with_capacity(1024),
            notifier: WriteNotifier::new(writes_tx, Some(Arc::clone(&waker))),
            waker,
            listener: None,
            sessions,
            retired: Vec::new(),
            write_interest: HashSet::new(),
            control_tx,
            control_rx,
            writes,
            sink,
            state: Arc::new(StateCell::new(EngineState::Starting)),
            buffer: vec![0u8; config.read_buffer_size],
            next_token: FIRST_SESSION,
            accepted: 0,
            ping: config.ping_interval.map(|p| Interval::new(p, now)),
            metrics: config.metrics_interval.map(|p| Interval::new(p, now)),
            config,
            running: true,
        })
    }

    /// Accept connections on `listener`
    pub(crate) fn listen(&mut self, mut listener: TcpListener) -> Result<()> {
        self.poll
            .registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        self.listener = Some(listener);
        Ok(())
    }

    /// Register a connected stream as a new session
    pub(crate) fn add_session(&mut self, mut stream: TcpStream, label: String) -> Result<Arc<Session>> {
        let id = SessionId(self.next_token);
        self.next_token += 1;
        self.poll
            .registry()
            .register(&mut stream, id.into(), Interest::READABLE)?;

        let session = Arc::new(Session::new(
            id,
            label,
            Some(stream),
            &self.config.congestion,
            self.config.transfer.clone(),
            self.notifier.clone(),
        ));
        self.sessions.insert(Arc::clone(&session));

        tracing::info!("{} connected", session.label());
        self.sink.emit(EngineEvent::SessionOpened {
            id,
            label: session.label().to_string(),
        });
        Ok(session)
    }

    /// Move the loop onto its own thread
    pub(crate) fn spawn<H>(self, name: &str, handler: Arc<H>, local_addr: SocketAddr) -> Result<EngineHandle>
    where
        H: CommandHandler + 'static,
    {
        let control = self.control_tx.clone();
        let waker = Arc::clone(&self.waker);
        let state = Arc::clone(&self.state);
        state.set(EngineState::Running);

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut this = self;
                this.run(handler.as_ref(), local_addr);
            })
            .inspect_err(|_| state.set(EngineState::Stopped))?;

        Ok(EngineHandle {
            control,
            waker,
            state,
            thread: Some(thread),
            local_addr,
        })
    }

    fn run(&mut self, handler: &dyn CommandHandler, local_addr: SocketAddr) {
        tracing::info!("Engine running on {}", local_addr);
        self.sink.emit(EngineEvent::Started { local_addr });

        while self.running {
            let timeout = self.next_timeout(Instant::now());
            if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::warn!("Poll failed, stopping engine: {}", e);
                break;
            }

            let mut ready = std::mem::take(&mut self.ready);
            ready.extend(self.events.iter().map(|event| Readiness {
                token: event.token(),
                readable: event.is_readable(),
                writable: event.is_writable(),
                closed: event.is_read_closed() || event.is_error(),
            }));
            for readiness in ready.drain(..) {
                match readiness.token {
                    LISTENER => self.accept_all(),
                    WAKER => {}
                    token => self.on_session_ready(SessionId::from(token), readiness, handler),
                }
            }
            self.ready = ready;

            self.drain_writes();
            self.drain_control();

            let now = Instant::now();
            self.sweep_idle(now);
            self.run_timers(now);

            if self.listener.is_none() && self.sessions.is_empty() {
                tracing::debug!("Last session closed, stopping engine");
                self.running = false;
            }
        }

        self.shutdown();
    }

    fn next_timeout(&self, now: Instant) -> std::time::Duration {
        [&self.ping, &self.metrics]
            .into_iter()
            .flatten()
            .map(|interval| interval.remaining(now))
            .fold(self.config.poll_timeout, std::cmp::min)
    }

    fn accept_all(&mut self) {
        loop {
            let accepted = match self.listener.as_ref() {
                Some(listener) => listener.accept(),
                None => return,
            };
            match accepted {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                    }
                    self.accepted += 1;
                    let label = format!("Client-{} ({})", self.accepted, addr);
                    if let Err(e) = self.add_session(stream, label) {
                        tracing::warn!("Failed to register connection from {}: {}", addr, e);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    return;
                }
            }
        }
    }

    fn on_session_ready(&mut self, id: SessionId, readiness: Readiness, handler: &dyn CommandHandler) {
        let Some(session) = self.sessions.get(id) else {
            return;
        };

        if readiness.readable || readiness.closed {
            if let Some(reason) = self.read_session(&session, handler) {
                self.close_session(id, reason);
                return;
            }
        }
        if readiness.writable {
            self.flush_session(&session);
        }
    }

    /// Read until the socket would block; returns why the session must close
    fn read_session(&mut self, session: &Arc<Session>, handler: &dyn CommandHandler) -> Option<CloseReason> {
        loop {
            match session.read(&mut self.buffer) {
                Ok(0) => return Some(CloseReason::PeerClosed),
                Ok(n) => session.on_bytes_received(&self.buffer[..n], handler),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!("Read from {} failed: {}", session.label(), e);
                    return Some(CloseReason::Error);
                }
            }
            if !session.is_active() {
                return Some(CloseReason::Error);
            }
        }
    }

    fn flush_session(&mut self, session: &Arc<Session>) {
        match session.flush_writable() {
            Ok(pending) => self.set_write_interest(session, pending),
            Err(e) => {
                tracing::warn!("Write to {} failed: {}", session.label(), e);
                self.close_session(session.id(), CloseReason::Error);
            }
        }
    }

    fn set_write_interest(&mut self, session: &Session, writable: bool) {
        let id = session.id();
        if writable == self.write_interest.contains(&id) {
            return;
        }
        let interest = if writable {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        let registry = self.poll.registry();
        match session.with_stream(|stream| registry.reregister(stream, id.into(), interest)) {
            Some(Ok(())) => {
                if writable {
                    self.write_interest.insert(id);
                } else {
                    self.write_interest.remove(&id);
                }
            }
            Some(Err(e)) => tracing::warn!("Failed to update interest for {}: {}", session.label(), e),
            None => {}
        }
    }

    fn drain_writes(&mut self) {
        while let Ok(id) = self.writes.try_recv() {
            if let Some(session) = self.sessions.get(id) {
                self.flush_session(&session);
            }
        }
    }

    fn drain_control(&mut self) {
        loop {
            match self.control_rx.try_recv() {
                Ok(Control::Shutdown) => {
                    self.running = false;
                    return;
                }
                Ok(Control::Close(id)) => self.close_session(id, CloseReason::Local),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.running = false;
                    return;
                }
            }
        }
    }

    fn close_session(&mut self, id: SessionId, reason: CloseReason) {
        if let Some(session) = self.sessions.remove(id) {
            self.release(session, reason);
        }
    }

    /// Deregister a session already removed from the table, then retire it
    fn release(&mut self, session: Arc<Session>, reason: CloseReason) {
        let registry = self.poll.registry();
        if let Some(Err(e)) = session.with_stream(|stream| registry.deregister(stream)) {
            tracing::debug!("Failed to deregister {}: {}", session.label(), e);
        }
        self.write_interest.remove(&session.id());
        self.retire(session, reason);
    }

    fn retire(&mut self, session: Arc<Session>, reason: CloseReason) {
        let interrupted = session.is_streaming();
        let filename = session.with_transfer(|t| t.filename().to_string());
        session.close();

        tracing::info!("{} disconnected ({})", session.label(), reason);
        if interrupted {
            self.sink.emit(EngineEvent::TransferFailed {
                id: session.id(),
                filename,
                reason: format!("Connection closed: {reason}"),
            });
        }
        self.sink.emit(EngineEvent::SessionClosed {
            id: session.id(),
            label: session.label().to_string(),
            reason,
        });
        self.retired.push(session);
    }

    fn sweep_idle(&mut self, now: Instant) {
        for session in self.sessions.sweep_idle(now, self.config.idle_timeout) {
            tracing::info!("{} idle for {:?}, closing", session.label(), self.config.idle_timeout);
            self.release(session, CloseReason::IdleTimeout);
        }
        self.retired.retain(|session| session.has_running_workers());
    }

    fn run_timers(&mut self, now: Instant) {
        if self.ping.as_mut().is_some_and(|ping| ping.tick(now)) {
            let timestamp = unix_millis();
            for session in self.sessions.all() {
                session.send(&Message::Ping(timestamp));
            }
            self.drain_writes();
        }
        if self.metrics.as_mut().is_some_and(|metrics| metrics.tick(now)) {
            self.sink.emit(EngineEvent::Metrics {
                sessions: self.sessions.snapshots(now),
            });
        }
    }

    fn shutdown(&mut self) {
        for session in self.sessions.all() {
            self.close_session(session.id(), CloseReason::Shutdown);
        }
        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = self.poll.registry().deregister(&mut listener) {
                tracing::debug!("Failed to deregister listener: {}", e);
            }
        }
        for session in self.retired.drain(..) {
            session.join_workers();
        }

        self.state.set(EngineState::Stopped);
        tracing::info!("Engine stopped");
        self.sink.emit(EngineEvent::Stopped);
    }
}
