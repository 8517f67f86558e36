//! Remote shell message kinds.
//!
//! These are the typed messages exchanged over a link's channel. Their byte
//! encoding belongs to the transport collaborator; Haven only constructs and
//! matches on them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Stream identifiers carried by `StreamData`.
pub const STDIN: u16 = 0;
pub const STDOUT: u16 = 1;
pub const STDERR: u16 = 2;

/// Shell protocol revision announced in `VersionInfo`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Terminal size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub rows: u16,
    pub cols: u16,
}

impl Geometry {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ShellMessage {
    VersionInfo {
        sw_version: String,
        protocol_version: u32,
    },

    WindowSize {
        rows: u16,
        cols: u16,
        hpix: u16,
        vpix: u16,
    },

    /// Request execution on the remote side. An empty `cmdline` asks for an
    /// interactive login shell.
    ExecuteCommand {
        cmdline: Vec<String>,
        pipe_stdin: bool,
        pipe_stdout: bool,
        pipe_stderr: bool,
        term: String,
        rows: u16,
        cols: u16,
        hpix: u16,
        vpix: u16,
    },

    StreamData {
        stream_id: u16,
        data: Bytes,
        eof: bool,
        compressed: bool,
    },

    CommandExited {
        return_code: i32,
    },

    Error {
        msg: String,
        fatal: bool,
    },
}

impl ShellMessage {
    pub fn version_info() -> Self {
        ShellMessage::VersionInfo {
            sw_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Execute request for an interactive login shell at the given size.
    pub fn login_shell(term: &str, geometry: Geometry) -> Self {
        ShellMessage::ExecuteCommand {
            cmdline: Vec::new(),
            pipe_stdin: false,
            pipe_stdout: false,
            pipe_stderr: false,
            term: term.to_string(),
            rows: geometry.rows,
            cols: geometry.cols,
            hpix: 0,
            vpix: 0,
        }
    }

    pub fn window_size(geometry: Geometry) -> Self {
        ShellMessage::WindowSize {
            rows: geometry.rows,
            cols: geometry.cols,
            hpix: 0,
            vpix: 0,
        }
    }

    /// Keyboard input for the remote shell.
    pub fn stdin(data: Bytes) -> Self {
        ShellMessage::StreamData {
            stream_id: STDIN,
            data,
            eof: false,
            compressed: false,
        }
    }

    /// Short name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ShellMessage::VersionInfo { .. } => "version_info",
            ShellMessage::WindowSize { .. } => "window_size",
            ShellMessage::ExecuteCommand { .. } => "execute_command",
            ShellMessage::StreamData { .. } => "stream_data",
            ShellMessage::CommandExited { .. } => "command_exited",
            ShellMessage::Error { .. } => "error",
        }
    }
}
