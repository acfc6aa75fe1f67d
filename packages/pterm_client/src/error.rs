//! Error types for the request channel, the client actor and transfers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::{HostId, TabKey};

/// Machine-readable error code carried by a failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    UnknownHostKey,
    HostKeyMismatch,
    PasswordRequired,
    PassphraseRequired,
    Other(String),
}

/// Coarse grouping used to decide how a failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying on the next tick (connection refused, timeouts).
    Transient,
    /// Needs a decision from the user before anything else is attempted.
    Credential,
    /// Reported once and left alone.
    Terminal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::UnknownHostKey => "unknown_host_key",
            Self::HostKeyMismatch => "host_key_mismatch",
            Self::PasswordRequired => "password_required",
            Self::PassphraseRequired => "passphrase_required",
            Self::Other(code) => code,
        }
    }

    /// Host-key errors that are resolved by a trust decision.
    pub fn is_trust(&self) -> bool {
        matches!(self, Self::UnknownHostKey | Self::HostKeyMismatch)
    }

    pub fn is_password(&self) -> bool {
        matches!(self, Self::PasswordRequired)
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownHostKey
            | Self::HostKeyMismatch
            | Self::PasswordRequired
            | Self::PassphraseRequired => ErrorClass::Credential,
            Self::Other(code) => match code.as_str() {
                "connection_refused" | "timeout" | "network_unreachable" | "host_unreachable" => {
                    ErrorClass::Transient
                }
                _ => ErrorClass::Terminal,
            },
        }
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "unknown_host_key" => Self::UnknownHostKey,
            "host_key_mismatch" => Self::HostKeyMismatch,
            "password_required" => Self::PasswordRequired,
            "passphrase_required" => Self::PassphraseRequired,
            _ => Self::Other(code),
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        Self::from(code.to_string())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured `{ok: false, ...}` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: ErrorCode,
    pub detail: Option<String>,
    pub host_port: Option<String>,
    pub fingerprint: Option<String>,
}

impl RemoteError {
    pub fn new(code: impl Into<ErrorCode>) -> Self {
        Self {
            code: code.into(),
            detail: None,
            host_port: None,
            fingerprint: None,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.code, detail),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Failure of a single request/response round trip.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error("transport failed: {0}")]
    Transport(String),

    #[error("remote error: {0}")]
    Remote(RemoteError),
}

impl CallError {
    /// The structured error code, when the remote side produced one.
    pub fn code(&self) -> Option<&ErrorCode> {
        match self {
            Self::Remote(err) => Some(&err.code),
            Self::Transport(_) => None,
        }
    }

    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(err) => Some(err),
            Self::Transport(_) => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport(_) => ErrorClass::Transient,
            Self::Remote(err) => err.code.class(),
        }
    }
}

impl From<RemoteError> for CallError {
    fn from(err: RemoteError) -> Self {
        Self::Remote(err)
    }
}

/// Errors returned by [`crate::ClientHandle`] operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("client actor has shut down")]
    ActorGone,

    #[error(transparent)]
    Call(#[from] CallError),

    #[error("unknown tab: {0}")]
    UnknownTab(TabKey),
}

/// Errors returned by [`crate::TransferClient`] operations.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Call(#[from] CallError),

    #[error("file transfer is disabled for host {0}")]
    Disabled(HostId),

    #[error("unknown host {0}")]
    UnknownHost(HostId),

    #[error("host key was not trusted")]
    TrustDeclined,

    #[error("password entry was cancelled")]
    PasswordDeclined,

    #[error("failed to trust host key: {0}")]
    Trust(String),

    #[error("malformed reply: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed binary payload: {0}")]
    Encoding(#[from] data_encoding::DecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("file is too large to read ({size} bytes, limit {limit})")]
    TooLarge { size: u64, limit: u64 },
}

impl TransferError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Call(CallError::Remote(err)) => err.code.as_str(),
            Self::Call(CallError::Transport(_)) => "transport",
            Self::Disabled(_) => "sftp_disabled",
            Self::UnknownHost(_) => "unknown_host",
            Self::TrustDeclined => "trust_declined",
            Self::PasswordDeclined => "password_declined",
            Self::Trust(_) => "trust_failed",
            Self::Decode(_) | Self::Encoding(_) => "malformed_reply",
            Self::Io(_) => "io",
            Self::TooLarge { .. } => "file_too_large",
        }
    }
}
