//! Remote shell session state machine.
//!
//! Lifecycle:
//!
//!   Created ──connect──▶ Linking ──established──▶ Handshaking ──▶ Active
//!                           │                                       │
//!                           └── timeout / closed ──▶ Closed ◀───────┘
//!                                                  exit, fatal error,
//!                                                  link closed, close()
//!
//! Transport callbacks never touch session state. They push `LinkEvent`s
//! onto the session's inbox and return; a driver task owned by the session
//! consumes the inbox in order, runs the handshake, and turns inbound
//! messages into the output queue the host polls.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use haven_core::config::BridgeConfig;
use haven_core::protocol::{Geometry, ShellMessage};
use haven_core::transport::{
    Channel, DestinationHash, Link, LinkCallbacks, MeshTransport, TransportError,
};

use crate::discovery::SHELL_ASPECT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Linking,
    Handshaking,
    Active,
    Closed,
}

/// Result of polling a session for output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Remote output, in delivery order.
    Data(Bytes),
    /// Nothing arrived within the timeout; the session is still open.
    Empty,
    /// The session is closed and fully drained.
    Disconnected,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no known identity for {0}; resolve a path first")]
    IdentityUnresolved(DestinationHash),
    #[error("link to {0} not established within {1:?}")]
    LinkTimeout(DestinationHash, Duration),
    #[error("link to {0} closed before it was established")]
    LinkClosed(DestinationHash),
    #[error("session {0} was already started")]
    AlreadyStarted(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Per-session tunables, taken from the bridge configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub link_timeout: Duration,
    pub poll_interval: Duration,
    pub term: String,
}

impl SessionSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            link_timeout: config.timeouts.link(),
            poll_interval: config.timeouts.poll_interval(),
            term: config.shell.term.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

enum Output {
    Chunk(Bytes),
    End,
}

enum LinkEvent {
    Established(Arc<dyn Link>),
    Closed,
    Message(ShellMessage),
    Shutdown,
}

/// Forwards link lifecycle callbacks into the session inbox.
struct InboxCallbacks {
    inbox: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkCallbacks for InboxCallbacks {
    fn link_established(&self, link: Arc<dyn Link>) {
        let _ = self.inbox.send(LinkEvent::Established(link));
    }

    fn link_closed(&self) {
        let _ = self.inbox.send(LinkEvent::Closed);
    }
}

/// State shared between the session handle and its driver task.
struct Shared {
    id: String,
    destination: DestinationHash,
    phase: watch::Sender<Phase>,
    connected: AtomicBool,
    established: AtomicBool,
    closed: AtomicBool,
    link: Mutex<Option<Arc<dyn Link>>>,
    channel: Mutex<Option<Arc<dyn Channel>>>,
    geometry: Mutex<Geometry>,
    output: Mutex<Option<mpsc::UnboundedSender<Output>>>,
    inbox: mpsc::UnboundedSender<LinkEvent>,
    suppressed_errors: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn channel(&self) -> Option<Arc<dyn Channel>> {
        lock(&self.channel).clone()
    }

    /// Queue a chunk for the host. Fails once the end sentinel is queued, so
    /// nothing can follow it.
    fn enqueue(&self, data: Bytes) -> bool {
        match lock(&self.output).as_ref() {
            Some(tx) => tx.send(Output::Chunk(data)).is_ok(),
            None => false,
        }
    }

    /// Converge on Closed. Only the first caller does the work; returns
    /// whether this call closed the session.
    fn finish(&self, reason: &str) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.connected.store(false, Ordering::Release);
        self.phase.send_replace(Phase::Closed);
        if let Some(tx) = lock(&self.output).take() {
            let _ = tx.send(Output::End);
        }
        lock(&self.channel).take();

        let link = lock(&self.link).take();
        if let Some(link) = link {
            link.teardown();
        }

        tracing::info!(session = %self.id, destination = %self.destination.short(), reason, "session closed");
        true
    }

    /// Runs once the link is up: derive the channel, hook inbound traffic,
    /// announce our version, then request a login shell. The execute request
    /// carries the geometry; no window-size message may precede it.
    fn handshake(&self, link: &Arc<dyn Link>, term: &str) -> Result<(), TransportError> {
        self.phase.send_replace(Phase::Handshaking);

        let channel = link.channel()?;
        let inbox = self.inbox.clone();
        channel.set_message_handler(Box::new(move |message| {
            let _ = inbox.send(LinkEvent::Message(message));
        }));

        channel.send(ShellMessage::version_info())?;
        let geometry = *lock(&self.geometry);
        channel.send(ShellMessage::login_shell(term, geometry))?;

        *lock(&self.channel) = Some(channel);
        self.established.store(true, Ordering::Release);
        self.connected.store(true, Ordering::Release);
        self.phase.send_replace(Phase::Active);

        tracing::info!(
            session = %self.id,
            destination = %self.destination.short(),
            rows = geometry.rows,
            cols = geometry.cols,
            "shell session active"
        );
        Ok(())
    }

    fn dispatch(&self, message: ShellMessage) {
        if self.is_closed() {
            tracing::trace!(session = %self.id, kind = message.kind(), "message after close dropped");
            return;
        }

        match message {
            ShellMessage::StreamData { data, .. } => {
                if !data.is_empty() && !self.enqueue(data) {
                    tracing::trace!(session = %self.id, "output after close dropped");
                }
            }
            ShellMessage::CommandExited { return_code } => {
                tracing::info!(session = %self.id, return_code, "remote command exited");
                self.finish("command exited");
            }
            ShellMessage::Error { msg, fatal: true } => {
                tracing::warn!(session = %self.id, error = %msg, "fatal remote error");
                self.finish("fatal remote error");
            }
            ShellMessage::Error { msg, fatal: false } => {
                let suppressed = self.suppressed_errors.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(session = %self.id, error = %msg, suppressed, "non-fatal remote error suppressed");
            }
            other => {
                tracing::trace!(session = %self.id, kind = other.kind(), "ignoring message");
            }
        }
    }
}

/// Consume link events in order until the link closes or the session is
/// shut down.
async fn drive(shared: Arc<Shared>, mut inbox: mpsc::UnboundedReceiver<LinkEvent>, term: String) {
    while let Some(event) = inbox.recv().await {
        match event {
            LinkEvent::Established(link) => {
                if shared.is_closed() {
                    // Established after we gave up on it.
                    link.teardown();
                    continue;
                }
                if let Err(e) = shared.handshake(&link, &term) {
                    tracing::warn!(session = %shared.id, error = %e, "handshake failed");
                    shared.finish("handshake failed");
                }
            }
            LinkEvent::Message(message) => shared.dispatch(message),
            LinkEvent::Closed => {
                shared.finish("link closed");
                break;
            }
            LinkEvent::Shutdown => break,
        }
    }
    tracing::trace!(session = %shared.id, "session driver exited");
}

/// One remote shell over one link.
pub struct ShellSession {
    shared: Arc<Shared>,
    transport: Arc<dyn MeshTransport>,
    settings: SessionSettings,
    output_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Output>>,
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
}

impl ShellSession {
    pub fn new(
        transport: Arc<dyn MeshTransport>,
        id: impl Into<String>,
        destination: DestinationHash,
        settings: SessionSettings,
    ) -> Self {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (phase, _) = watch::channel(Phase::Created);

        Self {
            shared: Arc::new(Shared {
                id: id.into(),
                destination,
                phase,
                connected: AtomicBool::new(false),
                established: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                link: Mutex::new(None),
                channel: Mutex::new(None),
                geometry: Mutex::new(Geometry::default()),
                output: Mutex::new(Some(output_tx)),
                inbox: inbox_tx,
                suppressed_errors: AtomicU64::new(0),
            }),
            transport,
            settings,
            output_rx: tokio::sync::Mutex::new(output_rx),
            inbox_rx: Mutex::new(Some(inbox_rx)),
        }
    }

    /// Open the link and wait for the shell handshake to go out.
    ///
    /// Fails fast with `IdentityUnresolved` when the destination's identity
    /// is not known; no link is opened in that case. Must be called from
    /// within a tokio runtime.
    pub async fn connect(&self, rows: u16, cols: u16) -> Result<(), SessionError> {
        let destination = self.shared.destination;
        let identity = self
            .transport
            .recall_identity(&destination)
            .ok_or(SessionError::IdentityUnresolved(destination))?;

        let inbox_rx = lock(&self.inbox_rx)
            .take()
            .ok_or_else(|| SessionError::AlreadyStarted(self.shared.id.clone()))?;

        *lock(&self.shared.geometry) = Geometry::new(rows, cols);
        self.shared.phase.send_replace(Phase::Linking);
        tracing::debug!(session = %self.shared.id, destination = %destination.short(), "opening link");

        let callbacks = Arc::new(InboxCallbacks {
            inbox: self.shared.inbox.clone(),
        });
        let link = match self.transport.open_link(&identity, SHELL_ASPECT, callbacks) {
            Ok(link) => link,
            Err(e) => {
                self.shared.finish("link open failed");
                return Err(e.into());
            }
        };
        *lock(&self.shared.link) = Some(link);

        tokio::spawn(drive(self.shared.clone(), inbox_rx, self.settings.term.clone()));

        let deadline = Instant::now() + self.settings.link_timeout;
        loop {
            match self.phase() {
                Phase::Active => return Ok(()),
                Phase::Closed if self.shared.established.load(Ordering::Acquire) => return Ok(()),
                Phase::Closed => return Err(SessionError::LinkClosed(destination)),
                _ => {}
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    session = %self.shared.id,
                    destination = %destination.short(),
                    "link establishment timed out"
                );
                self.shared.finish("link timeout");
                let _ = self.shared.inbox.send(LinkEvent::Shutdown);
                return Err(SessionError::LinkTimeout(destination, self.settings.link_timeout));
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Next output chunk, waiting at most `timeout`.
    pub async fn read_output(&self, timeout: Duration) -> ReadOutcome {
        let deadline = Instant::now() + timeout;

        let mut rx = match tokio::time::timeout_at(deadline, self.output_rx.lock()).await {
            Ok(rx) => rx,
            Err(_) => return self.idle_outcome(),
        };

        match rx.try_recv() {
            Ok(item) => return item.into_outcome(),
            Err(TryRecvError::Disconnected) => return ReadOutcome::Disconnected,
            Err(TryRecvError::Empty) => {}
        }
        if self.is_closed() {
            return ReadOutcome::Disconnected;
        }

        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(item)) => item.into_outcome(),
            Ok(None) => ReadOutcome::Disconnected,
            Err(_) => self.idle_outcome(),
        }
    }

    /// Send keyboard input. Returns false when the session cannot carry it.
    pub fn send_input(&self, data: &[u8]) -> bool {
        if self.is_closed() {
            return false;
        }
        let Some(channel) = self.shared.channel() else {
            return false;
        };
        match channel.send(ShellMessage::stdin(Bytes::copy_from_slice(data))) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session = %self.shared.id, error = %e, "failed to send input");
                false
            }
        }
    }

    /// Announce a new terminal size. Ignored unless the session is active.
    pub fn resize(&self, cols: u16, rows: u16) {
        if self.is_closed() {
            return;
        }
        let Some(channel) = self.shared.channel() else {
            return;
        };
        let geometry = Geometry::new(rows, cols);
        *lock(&self.shared.geometry) = geometry;
        if let Err(e) = channel.send(ShellMessage::window_size(geometry)) {
            tracing::warn!(session = %self.shared.id, error = %e, "failed to send window size");
        }
    }

    /// Close the session. Idempotent; wakes any blocked reader.
    pub fn close(&self) {
        if self.shared.finish("closed by host") {
            let _ = self.shared.inbox.send(LinkEvent::Shutdown);
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn destination(&self) -> DestinationHash {
        self.shared.destination
    }

    pub fn phase(&self) -> Phase {
        *self.shared.phase.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire) && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn geometry(&self) -> Geometry {
        *lock(&self.shared.geometry)
    }

    /// Non-fatal remote errors dropped so far.
    pub fn suppressed_errors(&self) -> u64 {
        self.shared.suppressed_errors.load(Ordering::Relaxed)
    }

    fn idle_outcome(&self) -> ReadOutcome {
        if self.is_closed() {
            ReadOutcome::Disconnected
        } else {
            ReadOutcome::Empty
        }
    }
}

impl fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellSession")
            .field("id", &self.shared.id)
            .field("destination", &self.shared.destination)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Output {
    fn into_outcome(self) -> ReadOutcome {
        match self {
            Output::Chunk(bytes) => ReadOutcome::Data(bytes),
            Output::End => ReadOutcome::Disconnected,
        }
    }
}
