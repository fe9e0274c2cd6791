//! # termbridge
//!
//! A WebSocket to SSH terminal bridge. A browser terminal connects with a
//! `host` query parameter; the bridge spawns `ssh -i <key> ubuntu@<host>` on a
//! pseudo-terminal and relays keystrokes, output and resizes until either
//! side goes away.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Bridge Orchestrator                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────┐          ┌─────────────────────────┐ │
//! │  │  Terminal Server   │          │   Control Socket (IPC)  │ │
//! │  │  (WebSocket)       │          │                         │ │
//! │  └─────────┬──────────┘          └────────────┬────────────┘ │
//! │            │                                  │              │
//! │  ┌─────────▼──────────────────────────────────▼────────────┐ │
//! │  │                  Lifecycle Manager                      │ │
//! │  └─────────┬─────────────────────┬─────────────────────────┘ │
//! │  ┌─────────▼──────────┐ ┌────────▼─────────┐ ┌────────────┐  │
//! │  │  Session Registry  │ │  Relay pumps     │ │  Launcher  │  │
//! │  └────────────────────┘ └──────────────────┘ └────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bridge::{BridgeOrchestrator, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!
//!     let mut orchestrator = BridgeOrchestrator::new(config);
//!     let addr = orchestrator.start().await?;
//!     println!("listening on {}", addr);
//!
//!     orchestrator.shutdown_token().cancelled().await;
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: Session state, registry and process launching
//! - [`relay`]: Byte pumps between a PTY and a client
//! - [`lifecycle`]: Session creation and teardown
//! - [`server`]: WebSocket listener and handshake parsing
//! - [`ipc`]: Local control socket
//! - [`orchestrator`]: Main service coordinator

pub mod config;
pub mod ipc;
pub mod lifecycle;
pub mod orchestrator;
pub mod relay;
pub mod server;
pub mod session;

pub use protocol;

pub use config::Config;

pub use session::{
    CloseReason, Geometry, LaunchError, Launcher, RegistryError, ResizeError, ResizeOutcome,
    Session, SessionId, SessionInfo, SessionRegistry, SessionState, SshLauncher,
};

pub use lifecycle::{LifecycleManager, LifecycleSettings};

pub use server::{ConnectParams, TerminalServer};

pub use orchestrator::{BridgeOrchestrator, OrchestratorState};
