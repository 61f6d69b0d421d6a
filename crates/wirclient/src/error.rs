// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Error carried by a WebKit protocol reply (`error` field or a thrown
/// evaluation result). Local to one command; the session stays usable.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandError {
    pub code: Option<i64>,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { code: None, message: message.into(), data: None }
    }

    /// ASCII case-insensitive substring test against the error message.
    pub fn message_contains(&self, needle: &str) -> bool {
        self.message.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for CommandError {}

/// Unified error type for the inspector client.
///
/// `Transport`, `Codec`, and `Protocol` are fatal: the session disconnects
/// and surfaces a single terminal error through the disconnect event. The
/// remaining variants reject only the operation that raised them.
#[derive(Debug)]
pub enum Error {
    /// Socket broken, or closed while a wait was pending.
    Transport(String),
    /// Framing or binary-plist failure. Framing is length-based, so
    /// misalignment is permanent and the connection cannot be salvaged.
    Codec(String),
    /// Malformed inner JSON or an unparseable target-dispatch envelope.
    Protocol(String),
    /// The protocol reported a command-level error.
    Command(CommandError),
    /// An initialization step failed because the target was destroyed
    /// underneath us.
    TargetMissing(String),
    /// A bounded wait elapsed.
    Timeout(String),
    /// A required envelope field was missing; nothing reached the wire.
    Argument(String),
    /// The session is not connected.
    Disconnected,
}

impl Error {
    /// Whether this error tears down the whole session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Codec(_) | Self::Protocol(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Codec(msg) => write!(f, "codec error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Command(err) => write!(f, "command failed: {err}"),
            Self::TargetMissing(msg) => write!(f, "target missing: {msg}"),
            Self::Timeout(msg) => write!(f, "timed out: {msg}"),
            Self::Argument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Disconnected => f.write_str("not connected"),
        }
    }
}

impl std::error::Error for Error {}

impl From<CommandError> for Error {
    fn from(err: CommandError) -> Self {
        Self::Command(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
