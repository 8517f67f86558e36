//! SimLink: one simulated link plus its delivery thread.
//!
//! Lifecycle events and inbound messages are queued to a dedicated thread
//! per link, so callbacks arrive in order and never on the thread that
//! triggered them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};

use haven_core::protocol::ShellMessage;
use haven_core::transport::{Channel, Link, LinkCallbacks, MessageHandler, TransportError};

use crate::lock;
use crate::remote::SimRemoteShell;

type SharedHandler = Arc<dyn Fn(ShellMessage) + Send + Sync>;

enum Delivery {
    Established,
    Message(ShellMessage),
    Closed,
}

pub struct SimLink {
    id: u64,
    remote: SimRemoteShell,
    established: AtomicBool,
    closed: Arc<AtomicBool>,
    deliveries: Mutex<Option<mpsc::Sender<Delivery>>>,
    handler: Arc<Mutex<Option<SharedHandler>>>,
    teardowns: Arc<AtomicUsize>,
}

impl SimLink {
    pub(crate) fn open(
        id: u64,
        remote: SimRemoteShell,
        callbacks: Arc<dyn LinkCallbacks>,
        teardowns: Arc<AtomicUsize>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel();
        let link = Arc::new(Self {
            id,
            remote,
            established: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
            deliveries: Mutex::new(Some(tx)),
            handler: Arc::new(Mutex::new(None)),
            teardowns,
        });

        let weak = Arc::downgrade(&link);
        let handler = link.handler.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("sim-link-{id}"))
            .spawn(move || deliver_loop(weak, rx, callbacks, handler));
        if let Err(e) = spawned {
            tracing::error!(link = id, error = %e, "failed to spawn delivery thread");
        }
        link
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    pub(crate) fn establish(&self) {
        self.push(Delivery::Established);
    }

    /// The remote refused; close without ever establishing.
    pub(crate) fn refuse(&self) {
        self.shut(false);
    }

    pub(crate) fn deliver_message(&self, message: ShellMessage) {
        if self.is_open() {
            self.push(Delivery::Message(message));
        }
    }

    pub(crate) fn close_from_remote(&self) {
        self.shut(false);
    }

    fn shut(&self, local: bool) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if local {
            self.teardowns.fetch_add(1, Ordering::Relaxed);
        }
        self.remote.detach(self.id);
        self.push(Delivery::Closed);
        lock(&self.deliveries).take();
        tracing::debug!(link = self.id, local, "sim link closed");
    }

    fn push(&self, delivery: Delivery) {
        if let Some(tx) = lock(&self.deliveries).as_ref() {
            let _ = tx.send(delivery);
        }
    }
}

fn deliver_loop(
    link: Weak<SimLink>,
    rx: mpsc::Receiver<Delivery>,
    callbacks: Arc<dyn LinkCallbacks>,
    handler: Arc<Mutex<Option<SharedHandler>>>,
) {
    for delivery in rx {
        match delivery {
            Delivery::Established => {
                let Some(link) = link.upgrade() else { break };
                if !link.is_open() {
                    continue;
                }
                link.established.store(true, Ordering::Release);
                callbacks.link_established(link);
            }
            Delivery::Message(message) => {
                let current = lock(&handler).clone();
                match current {
                    Some(handler) => handler(message),
                    None => tracing::warn!(kind = message.kind(), "no message handler, dropped"),
                }
            }
            Delivery::Closed => {
                callbacks.link_closed();
                break;
            }
        }
    }
}

impl Link for SimLink {
    fn channel(&self) -> Result<Arc<dyn Channel>, TransportError> {
        if !self.is_established() || !self.is_open() {
            return Err(TransportError::LinkUnavailable(format!(
                "sim link {} is not established",
                self.id
            )));
        }
        Ok(Arc::new(SimChannel {
            closed: self.closed.clone(),
            remote: self.remote.clone(),
            handler: self.handler.clone(),
        }))
    }

    fn teardown(&self) {
        self.shut(true);
    }
}

/// Channel over a sim link. Outbound messages land in the remote's log.
struct SimChannel {
    closed: Arc<AtomicBool>,
    remote: SimRemoteShell,
    handler: Arc<Mutex<Option<SharedHandler>>>,
}

impl Channel for SimChannel {
    fn send(&self, message: ShellMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ChannelClosed);
        }
        self.remote.record(message);
        Ok(())
    }

    fn set_message_handler(&self, handler: MessageHandler) {
        *lock(&self.handler) = Some(Arc::from(handler));
    }
}
