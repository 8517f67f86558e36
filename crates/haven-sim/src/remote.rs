//! SimRemoteShell: scripted far end of a shell link.

use std::sync::{Arc, Mutex};

use bytes::Bytes;

use haven_core::protocol::{ShellMessage, STDIN, STDOUT};

use crate::link::SimLink;
use crate::lock;

/// How the remote answers a link request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkBehavior {
    /// Establish immediately.
    #[default]
    Accept,
    /// Never answer; the link stays pending until torn down.
    Stall,
    /// Close the link before it is established.
    Refuse,
}

#[derive(Default)]
struct RemoteState {
    behavior: LinkBehavior,
    received: Vec<ShellMessage>,
    link: Option<Arc<SimLink>>,
}

/// Cloneable handle; every clone drives the same remote.
#[derive(Clone, Default)]
pub struct SimRemoteShell {
    state: Arc<Mutex<RemoteState>>,
}

impl SimRemoteShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stall_links(&self) {
        lock(&self.state).behavior = LinkBehavior::Stall;
    }

    pub fn refuse_links(&self) {
        lock(&self.state).behavior = LinkBehavior::Refuse;
    }

    pub fn behavior(&self) -> LinkBehavior {
        lock(&self.state).behavior
    }

    /// Everything the session sent, in order.
    pub fn received(&self) -> Vec<ShellMessage> {
        lock(&self.state).received.clone()
    }

    /// Concatenated stdin payload received so far.
    pub fn stdin(&self) -> Vec<u8> {
        lock(&self.state)
            .received
            .iter()
            .filter_map(|m| match m {
                ShellMessage::StreamData { stream_id, data, .. } if *stream_id == STDIN => {
                    Some(data.to_vec())
                }
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn is_linked(&self) -> bool {
        lock(&self.state).link.as_ref().is_some_and(|l| l.is_open())
    }

    /// Send an arbitrary message to the session.
    pub fn emit(&self, message: ShellMessage) {
        let link = lock(&self.state).link.clone();
        match link {
            Some(link) => link.deliver_message(message),
            None => tracing::warn!(kind = message.kind(), "remote has no link, message dropped"),
        }
    }

    pub fn emit_stdout(&self, data: &[u8]) {
        self.emit(ShellMessage::StreamData {
            stream_id: STDOUT,
            data: Bytes::copy_from_slice(data),
            eof: false,
            compressed: false,
        });
    }

    pub fn exit(&self, return_code: i32) {
        self.emit(ShellMessage::CommandExited { return_code });
    }

    pub fn error(&self, msg: &str, fatal: bool) {
        self.emit(ShellMessage::Error {
            msg: msg.to_string(),
            fatal,
        });
    }

    /// Close the current link from the remote side.
    pub fn drop_link(&self) {
        let link = lock(&self.state).link.take();
        if let Some(link) = link {
            link.close_from_remote();
        }
    }

    pub(crate) fn attach(&self, link: Arc<SimLink>) {
        lock(&self.state).link = Some(link);
    }

    pub(crate) fn detach(&self, link_id: u64) {
        let mut state = lock(&self.state);
        if state.link.as_ref().is_some_and(|l| l.id() == link_id) {
            state.link = None;
        }
    }

    pub(crate) fn record(&self, message: ShellMessage) {
        lock(&self.state).received.push(message);
    }
}
