//! Session management module.
//!
//! This module owns everything bound to one client connection: launching the
//! remote shell on a PTY, the per-session state machine, and the registry of
//! live sessions.

pub mod error;
pub mod launcher;
pub mod pty;
pub mod registry;
pub mod state;

/// Unique identifier of a session.
pub type SessionId = String;

pub use error::{LaunchError, RegistryError, ResizeError};
pub use launcher::{Launcher, SshLauncher};
pub use pty::{Geometry, PtyProcess, DEFAULT_COLS, DEFAULT_ROWS};
pub use registry::SessionRegistry;
pub use state::{
    CloseReason, Closing, GeometryLimits, ResizeOutcome, Session, SessionInfo, SessionState,
};
