//! Error type shared by both backends.

use std::{io, sync::Arc};

use thiserror::Error;

use crate::close::CloseCode;

/// Result type for stream connection operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by a stream connection.
///
/// End-of-stream is not an error: a graceful peer shutdown is reported as
/// `Ok(0)` from `read`. Everything here means the connection is unusable.
///
/// `Error` is cheap to clone so the first failure observed by a connection can
/// be latched and handed out again on every later read.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Operation attempted after the connection was closed locally.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Peer closed the connection with a status that is not a graceful shutdown.
    #[error("connection closed by peer (code {code}): {reason}")]
    ClosedByPeer {
        /// Close status sent by the peer, or `Abnormal` when none arrived.
        code: CloseCode,
        /// Close reason sent by the peer.
        reason: String,
    },

    /// I/O failure from the underlying frame transport.
    #[error(transparent)]
    Io(Arc<io::Error>),

    /// Opaque error reported by the browser WebSocket.
    #[error("browser websocket error: ({kind}) {reason}")]
    Browser {
        /// Event or exception type, such as `close` or `error`.
        kind: String,
        /// Best-effort human readable reason.
        reason: String,
    },

    /// Both halves of a close failed.
    #[error("close failed: {}", join(.0))]
    Close(Vec<Error>),

    /// Invalid connection configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

fn join(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = e.io_kind();
        match e {
            Error::Io(inner) => match Arc::try_unwrap(inner) {
                Ok(original) => original,
                Err(shared) => io::Error::new(kind, Error::Io(shared)),
            },
            other => io::Error::new(kind, other),
        }
    }
}

impl Error {
    /// Create a peer close error.
    pub fn closed_by_peer(code: CloseCode, reason: impl Into<String>) -> Self {
        Self::ClosedByPeer {
            code,
            reason: reason.into(),
        }
    }

    /// Create a browser error.
    pub fn browser(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Browser {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Combine the results of the two halves of a close into one.
    ///
    /// A single failure is returned as is; two failures become [`Error::Close`].
    pub fn combine(first: Result<()>, second: Result<()>) -> Result<()> {
        match (first, second) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(a), Err(b)) => Err(Self::Close(vec![a, b])),
        }
    }

    /// Returns `true` if the connection was closed locally.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }

    /// Returns `true` if this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::TimedOut)
    }

    /// Returns the underlying I/O error, if any.
    pub fn as_io_error(&self) -> Option<&io::Error> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            Self::ConnectionClosed => io::ErrorKind::NotConnected,
            Self::ClosedByPeer { .. } => io::ErrorKind::ConnectionAborted,
            Self::Io(e) => e.kind(),
            Self::Config(_) => io::ErrorKind::InvalidInput,
            Self::Browser { .. } | Self::Close(_) => io::ErrorKind::Other,
        }
    }
}
