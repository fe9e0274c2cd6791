//! Errors raised by the session subsystem.

use std::path::PathBuf;

use thiserror::Error;

use super::SessionId;

/// Errors that can occur while launching the remote-login process.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The private key used to reach the remote host is absent.
    #[error("credential not found: {}", .0.display())]
    CredentialMissing(PathBuf),

    /// Allocating the PTY or creating the child process failed.
    #[error("failed to spawn remote shell: {0}")]
    SpawnFailure(String),

    /// The target host is not a plain hostname or address.
    #[error("invalid target host: {0:?}")]
    InvalidTarget(String),
}

impl LaunchError {
    /// Terminal text shown to the client before its connection is closed.
    ///
    /// Server-side paths stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            LaunchError::CredentialMissing(_) => "Server error: credential not found.".to_string(),
            LaunchError::SpawnFailure(_) => {
                "Server error: failed to start remote shell.".to_string()
            }
            LaunchError::InvalidTarget(host) => {
                format!("Server error: invalid target host {:?}.", host)
            }
        }
    }
}

/// Errors returned by the session registry.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// A live session already uses this identity.
    #[error("duplicate session id: {0}")]
    DuplicateId(SessionId),

    /// The registry is at its configured capacity.
    #[error("session limit reached ({0} active sessions)")]
    CapacityExceeded(usize),
}

impl RegistryError {
    /// Terminal text shown to the client before its connection is closed.
    pub fn client_message(&self) -> String {
        match self {
            RegistryError::DuplicateId(_) => {
                "Server error: a session with this id is already active.".to_string()
            }
            RegistryError::CapacityExceeded(_) => {
                "Server error: too many active sessions, try again later.".to_string()
            }
        }
    }
}

/// Errors returned by the resize controller.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResizeError {
    /// Columns or rows are non-positive or above the configured bound.
    #[error("invalid terminal geometry {cols}x{rows}")]
    InvalidGeometry {
        /// Requested columns.
        cols: i64,
        /// Requested rows.
        rows: i64,
    },

    /// No live session has this id.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The PTY rejected the new window size.
    #[error("failed to resize PTY: {0}")]
    Pty(String),
}
