//! Unix Domain Socket control interface.
//!
//! A running service exposes a local control socket used by the `termbridge`
//! CLI to query status, list sessions, terminate sessions, and stop the
//! service.
//!
//! ## Overview
//!
//! The IPC system uses a JSON newline-delimited protocol. Each message is a
//! single JSON object followed by a newline.
//!
//! ## Socket Path
//!
//! The socket path follows the XDG Base Directory Specification:
//! - Primary: `$XDG_RUNTIME_DIR/termbridge/control.sock`
//! - Fallback: `/tmp/termbridge-$UID/control.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use bridge::ipc::{IpcClient, IpcResponse, get_socket_path};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&get_socket_path()).await?;
//!
//!     if let IpcResponse::Sessions { sessions } = client.list_sessions().await? {
//!         for session in sessions {
//!             println!("{} -> {}", session.id, session.target_host);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

mod client;
mod messages;
pub mod pidfile;
mod server;

pub use client::IpcClient;
pub use messages::{IpcRequest, IpcResponse, IpcSessionInfo};
pub use pidfile::{get_bridge_pid, get_pid_file_path, is_bridge_running};
pub use server::{IpcConnection, IpcError, IpcServer};

use std::path::PathBuf;

/// Get the control socket path.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/termbridge/control.sock`
/// 2. Otherwise: `/tmp/termbridge-$UID/control.sock`
#[cfg(unix)]
pub fn get_socket_path() -> PathBuf {
    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(runtime_dir) if !runtime_dir.is_empty() => PathBuf::from(runtime_dir)
            .join("termbridge")
            .join("control.sock"),
        _ => {
            let uid = nix::unistd::getuid();
            PathBuf::from(format!("/tmp/termbridge-{}", uid)).join("control.sock")
        }
    }
}

/// Non-Unix platforms are not supported for Unix Domain Sockets.
#[cfg(not(unix))]
pub fn get_socket_path() -> PathBuf {
    PathBuf::from("/tmp/termbridge-unsupported/control.sock")
}
