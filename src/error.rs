//! Error taxonomy shared by the codec, transfer engine, catalog and client.
//!
//! Every failure that can cross a component boundary is one of the kinds in
//! [`ErrorKind`]. The dispatcher is the only place that turns an
//! [`ExchangeError`] into an `ERROR:<kind>` line, and the client turns that
//! line back into the same variant using the kind token alone.
use std::{fmt, io, str::FromStr};

use thiserror::Error;

/// Closed set of failure kinds with a stable wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    FileNotFound,
    ErrorDuringUpload,
    ErrorDuringDownload,
    PeerDisconnected,
    ProtocolError,
    StorageError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::ErrorDuringUpload => "ErrorDuringUpload",
            ErrorKind::ErrorDuringDownload => "ErrorDuringDownload",
            ErrorKind::PeerDisconnected => "PeerDisconnected",
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::StorageError => "StorageError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FileNotFound" => Ok(ErrorKind::FileNotFound),
            "ErrorDuringUpload" => Ok(ErrorKind::ErrorDuringUpload),
            "ErrorDuringDownload" => Ok(ErrorKind::ErrorDuringDownload),
            "PeerDisconnected" => Ok(ErrorKind::PeerDisconnected),
            "ProtocolError" => Ok(ErrorKind::ProtocolError),
            "StorageError" => Ok(ErrorKind::StorageError),
            other => Err(ExchangeError::ProtocolError(format!(
                "unknown error kind '{other}'"
            ))),
        }
    }
}

/// Failure raised by any exchange component.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("error during upload: {0}")]
    ErrorDuringUpload(String),

    #[error("error during download: {0}")]
    ErrorDuringDownload(String),

    #[error("peer disconnected: {0}")]
    PeerDisconnected(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

impl ExchangeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::FileNotFound => ExchangeError::FileNotFound(message),
            ErrorKind::ErrorDuringUpload => ExchangeError::ErrorDuringUpload(message),
            ErrorKind::ErrorDuringDownload => ExchangeError::ErrorDuringDownload(message),
            ErrorKind::PeerDisconnected => ExchangeError::PeerDisconnected(message),
            ErrorKind::ProtocolError => ExchangeError::ProtocolError(message),
            ErrorKind::StorageError => ExchangeError::StorageError(message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExchangeError::FileNotFound(_) => ErrorKind::FileNotFound,
            ExchangeError::ErrorDuringUpload(_) => ErrorKind::ErrorDuringUpload,
            ExchangeError::ErrorDuringDownload(_) => ErrorKind::ErrorDuringDownload,
            ExchangeError::PeerDisconnected(_) => ErrorKind::PeerDisconnected,
            ExchangeError::ProtocolError(_) => ErrorKind::ProtocolError,
            ExchangeError::StorageError(_) => ErrorKind::StorageError,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ExchangeError::FileNotFound(m)
            | ExchangeError::ErrorDuringUpload(m)
            | ExchangeError::ErrorDuringDownload(m)
            | ExchangeError::PeerDisconnected(m)
            | ExchangeError::ProtocolError(m)
            | ExchangeError::StorageError(m) => m,
        }
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self, ExchangeError::PeerDisconnected(_))
    }

    /// Classify a socket error.
    ///
    /// Every socket failure means the peer can no longer be talked to, so
    /// all of them end up as [`ExchangeError::PeerDisconnected`]; only the
    /// message differs.
    pub fn from_socket(err: io::Error) -> Self {
        let message = match err.kind() {
            io::ErrorKind::UnexpectedEof => "connection closed by peer".to_string(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                "timed out waiting for peer".to_string()
            }
            _ => err.to_string(),
        };
        ExchangeError::PeerDisconnected(message)
    }

    pub fn storage(context: impl fmt::Display, err: io::Error) -> Self {
        ExchangeError::StorageError(format!("{context}: {err}"))
    }
}

/// Failures that prevent a server from starting or keep it from running.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("storage root unusable: {0}")]
    Storage(#[from] ExchangeError),

    #[error("failed to bind listener: {0}")]
    Bind(io::Error),

    #[error("server runtime failure: {0}")]
    Runtime(io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_names_parse_back() {
        for kind in [
            ErrorKind::FileNotFound,
            ErrorKind::ErrorDuringUpload,
            ErrorKind::ErrorDuringDownload,
            ErrorKind::PeerDisconnected,
            ErrorKind::ProtocolError,
            ErrorKind::StorageError,
        ] {
            let parsed: ErrorKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
            assert_eq!(ExchangeError::new(kind, "m").kind(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_protocol_error() {
        let err = "Teapot".parse::<ErrorKind>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
    }

    #[test]
    fn socket_errors_become_disconnects() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let timeout = io::Error::new(io::ErrorKind::WouldBlock, "later");

        assert!(ExchangeError::from_socket(eof).is_disconnect());
        assert_eq!(
            ExchangeError::from_socket(timeout).message(),
            "timed out waiting for peer"
        );
    }
}
