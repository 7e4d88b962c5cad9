//! Error types for NetShare.
//!
//! This module provides a unified error type for all NetShare operations.
//! Every variant belongs to one of the [`ErrorKind`] families so callers can
//! react to the failure class without matching on individual variants.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::connection::Protocol;

/// A specialized `Result` type for NetShare operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Host unreachable, refused or timed out
    Connectivity,
    /// Remote rejected the request or the operation is unsupported
    Protocol,
    /// Local sharing server failure
    Server,
    /// Share link is past its expiry window
    ShareExpired,
    /// Missing file, share, task or connection
    NotFound,
    /// Local failure (I/O, configuration, storage)
    Local,
}

/// The main error type for NetShare.
#[derive(Error, Debug)]
pub enum Error {
    /// Remote endpoint could not be reached (N001)
    #[error("unable to reach {0}")]
    Connectivity(String),

    /// Operation timed out (N002)
    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    /// Remote side rejected the request (N003)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Protocol/operation combination is not implemented (N004)
    #[error("{operation} is not supported over {protocol}")]
    Unsupported {
        /// Protocol of the endpoint
        protocol: Protocol,
        /// Operation that was requested
        operation: String,
    },

    /// Server is already running (N005)
    #[error("sharing server already running on {0}")]
    AlreadyRunning(SocketAddr),

    /// Listener could not be bound (N006)
    #[error("failed to bind {addr}: {reason}")]
    Bind {
        /// Address that failed to bind
        addr: SocketAddr,
        /// Underlying reason
        reason: String,
    },

    /// Peer sent a request the server cannot process
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Share link has expired (N007)
    #[error("share '{0}' has expired")]
    ShareExpired(String),

    /// Local file not found (N008)
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Unknown share id
    #[error("share '{0}' not found")]
    ShareNotFound(String),

    /// Unknown transfer task id
    #[error("transfer task '{0}' not found")]
    TaskNotFound(String),

    /// Unknown connection profile id
    #[error("connection '{0}' not found")]
    ConnectionNotFound(String),

    /// Path escapes its root or is otherwise unusable
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Invalid user-supplied value
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Operation not valid in the task's current state
    #[error("cannot {action} task in state {state}")]
    InvalidTransition {
        /// Requested action
        action: &'static str,
        /// Current task state
        state: String,
    },

    /// Transfer was cancelled
    #[error("transfer cancelled")]
    TransferCancelled,

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Persistence backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Secret storage backend failure
    #[error("secret storage error: {0}")]
    SecretStorage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Connectivity(format!("request timed out: {err}"))
        } else if err.is_connect() {
            Self::Connectivity(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Protocol(format!("HTTP {status}"))
        } else {
            Self::Protocol(err.to_string())
        }
    }
}

impl Error {
    /// Returns the failure class of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Connectivity(_) | Self::Timeout(_) => ErrorKind::Connectivity,
            Self::Protocol(_) | Self::Unsupported { .. } => ErrorKind::Protocol,
            Self::AlreadyRunning(_) | Self::Bind { .. } | Self::MalformedRequest(_) => {
                ErrorKind::Server
            }
            Self::ShareExpired(_) => ErrorKind::ShareExpired,
            Self::FileNotFound(_)
            | Self::ShareNotFound(_)
            | Self::TaskNotFound(_)
            | Self::ConnectionNotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Local,
        }
    }

    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern NXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::Connectivity(_) => Some("N001"),
            Self::Timeout(_) => Some("N002"),
            Self::Protocol(_) => Some("N003"),
            Self::Unsupported { .. } => Some("N004"),
            Self::AlreadyRunning(_) => Some("N005"),
            Self::Bind { .. } => Some("N006"),
            Self::ShareExpired(_) => Some("N007"),
            Self::FileNotFound(_) | Self::ShareNotFound(_) => Some("N008"),
            _ => None,
        }
    }

    /// Returns whether this error is transient and the operation may be retried.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Timeout(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::Connectivity("10.0.0.1:21".into()).kind(),
            ErrorKind::Connectivity
        );
        assert_eq!(Error::Timeout(500).kind(), ErrorKind::Connectivity);
        assert_eq!(
            Error::Unsupported {
                protocol: Protocol::Sftp,
                operation: "upload".into()
            }
            .kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            Error::AlreadyRunning("0.0.0.0:8080".parse().unwrap()).kind(),
            ErrorKind::Server
        );
        assert_eq!(
            Error::ShareExpired("abc".into()).kind(),
            ErrorKind::ShareExpired
        );
        assert_eq!(Error::TaskNotFound("t".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::Storage("disk".into()).kind(), ErrorKind::Local);
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::Timeout(100).is_recoverable());
        assert!(Error::Connectivity("x".into()).is_recoverable());
        assert!(!Error::Protocol("530 Login incorrect".into()).is_recoverable());
        assert!(!Error::TransferCancelled.is_recoverable());
    }

    #[test]
    fn test_unsupported_message() {
        let err = Error::Unsupported {
            protocol: Protocol::Sftp,
            operation: "download".into(),
        };
        assert_eq!(err.to_string(), "download is not supported over sftp");
        assert_eq!(err.code(), Some("N004"));
    }
}
