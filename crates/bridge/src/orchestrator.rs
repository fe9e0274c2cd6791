//! Service orchestrator for wiring together all components.
//!
//! The [`BridgeOrchestrator`] builds the session registry, launcher and
//! lifecycle manager from configuration, then runs the WebSocket listener and
//! the local control socket until stopped.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::ipc::{get_socket_path, IpcConnection, IpcRequest, IpcResponse, IpcServer, IpcSessionInfo};
use crate::lifecycle::{LifecycleManager, LifecycleSettings};
use crate::server::TerminalServer;
use crate::session::{Launcher, SessionRegistry, SshLauncher};

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Binding listeners.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Owns the listeners and the lifecycle manager of a running service.
pub struct BridgeOrchestrator {
    config: Config,
    state: Arc<RwLock<OrchestratorState>>,
    lifecycle: Arc<LifecycleManager>,
    shutdown_token: CancellationToken,
    started_at: Instant,
    socket_path: PathBuf,
    tasks: Vec<JoinHandle<()>>,
}

impl BridgeOrchestrator {
    /// Creates an orchestrator that launches `ssh` with the fixed identity.
    pub fn new(config: Config) -> Self {
        let launcher = Arc::new(SshLauncher::new());
        info!(key_path = %launcher.key_path().display(), "Using login credential");
        Self::with_launcher(config, launcher)
    }

    /// Creates an orchestrator with a custom launcher.
    pub fn with_launcher(config: Config, launcher: Arc<dyn Launcher>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.session.max_sessions));
        let lifecycle = Arc::new(LifecycleManager::new(
            registry,
            launcher,
            LifecycleSettings::from(&config.session),
        ));
        let socket_path = config
            .daemon
            .control_socket
            .clone()
            .unwrap_or_else(get_socket_path);

        Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            lifecycle,
            shutdown_token: CancellationToken::new(),
            started_at: Instant::now(),
            socket_path,
            tasks: Vec::new(),
        }
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns the lifecycle manager.
    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Returns the token cancelled when the service should stop.
    ///
    /// A `Stop` request on the control socket cancels it too.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Returns the control socket path.
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Binds both listeners and starts serving.
    ///
    /// Returns the address of the WebSocket listener.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }

        info!("Starting termbridge...");

        let bound = self.bind_listeners().await;
        let (server, ipc) = match bound {
            Ok(listeners) => listeners,
            Err(e) => {
                *self.state.write().await = OrchestratorState::Stopped;
                return Err(e);
            }
        };

        let addr = server
            .local_addr()
            .context("Failed to read listener address")?;

        let token = self.shutdown_token.clone();
        self.tasks.push(tokio::spawn(server.run(token)));

        let token = self.shutdown_token.clone();
        let lifecycle = Arc::clone(&self.lifecycle);
        let started_at = self.started_at;
        self.tasks.push(tokio::spawn(async move {
            run_control_loop(ipc, lifecycle, token, started_at).await;
        }));

        *self.state.write().await = OrchestratorState::Running;
        info!(address = %addr, control_socket = %self.socket_path.display(), "termbridge started");
        Ok(addr)
    }

    async fn bind_listeners(&self) -> Result<(TerminalServer, IpcServer)> {
        let server = TerminalServer::bind(&self.config.server, Arc::clone(&self.lifecycle))
            .await
            .with_context(|| {
                format!(
                    "Failed to bind {}:{}",
                    self.config.server.bind_address, self.config.server.port
                )
            })?;
        let ipc = IpcServer::bind(&self.socket_path).await.with_context(|| {
            format!(
                "Failed to bind control socket {}",
                self.socket_path.display()
            )
        })?;
        Ok((server, ipc))
    }

    /// Stops listening and closes every session.
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }

        info!("Stopping termbridge...");

        self.shutdown_token.cancel();
        let closed = self.lifecycle.shutdown().await;
        debug!(count = closed, "Sessions closed on shutdown");

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Listener task failed");
            }
        }

        *self.state.write().await = OrchestratorState::Stopped;
        info!("termbridge stopped");
        Ok(())
    }
}

/// Accepts control connections until `shutdown` is cancelled.
async fn run_control_loop(
    server: IpcServer,
    lifecycle: Arc<LifecycleManager>,
    shutdown: CancellationToken,
    started_at: Instant,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = server.accept() => accepted,
        };

        match accepted {
            Ok(conn) => {
                let lifecycle = Arc::clone(&lifecycle);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    serve_control_connection(conn, lifecycle, shutdown, started_at).await;
                });
            }
            Err(e) => warn!(error = %e, "Failed to accept control connection"),
        }
    }
    debug!("Control socket closed");
}

async fn serve_control_connection(
    mut conn: IpcConnection,
    lifecycle: Arc<LifecycleManager>,
    shutdown: CancellationToken,
    started_at: Instant,
) {
    loop {
        let request = match conn.read_request().await {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "Malformed control request");
                let response = IpcResponse::Error {
                    message: e.to_string(),
                };
                let _ = conn.send_response(&response).await;
                return;
            }
        };

        let response = handle_request(&lifecycle, &shutdown, started_at, request).await;
        if let Err(e) = conn.send_response(&response).await {
            debug!(error = %e, "Failed to send control response");
            return;
        }
    }
}

/// Answers one control request.
pub async fn handle_request(
    lifecycle: &LifecycleManager,
    shutdown: &CancellationToken,
    started_at: Instant,
    request: IpcRequest,
) -> IpcResponse {
    match request {
        IpcRequest::Ping => IpcResponse::Pong,
        IpcRequest::Status => IpcResponse::Status {
            running: !shutdown.is_cancelled(),
            uptime_secs: started_at.elapsed().as_secs(),
            session_count: lifecycle.registry().count(),
        },
        IpcRequest::Stop => {
            info!("Stop requested over control socket");
            shutdown.cancel();
            IpcResponse::Stopping
        }
        IpcRequest::ListSessions => {
            let sessions = lifecycle
                .registry()
                .list()
                .await
                .into_iter()
                .map(IpcSessionInfo::from)
                .collect();
            IpcResponse::Sessions { sessions }
        }
        IpcRequest::TerminateSession { session_id } => {
            if lifecycle.terminate(&session_id).await {
                IpcResponse::SessionTerminated { session_id }
            } else {
                IpcResponse::Error {
                    message: format!("Session not found: {}", session_id),
                }
            }
        }
        IpcRequest::TerminateHost { target_host } => {
            let count = lifecycle.terminate_host(&target_host).await;
            IpcResponse::HostTerminated { target_host, count }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::IpcClient;
    use crate::session::{Geometry, LaunchError, PtyProcess};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Runs `cat` instead of a login program.
    struct CatLauncher;

    impl Launcher for CatLauncher {
        fn launch(&self, _target_host: &str) -> Result<PtyProcess, LaunchError> {
            let cmd = portable_pty::CommandBuilder::new("/bin/cat");
            PtyProcess::spawn(cmd, Geometry::default())
        }
    }

    fn create_test_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.server.bind_address = "127.0.0.1".to_string();
        config.server.port = 0;
        config.daemon.control_socket = Some(temp_dir.path().join("control.sock"));
        config
    }

    #[tokio::test]
    async fn test_orchestrator_creation() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = BridgeOrchestrator::with_launcher(
            create_test_config(&temp_dir),
            Arc::new(CatLauncher),
        );

        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
        assert_eq!(orchestrator.lifecycle().registry().count(), 0);
        assert_eq!(
            orchestrator.socket_path(),
            &temp_dir.path().join("control.sock")
        );
    }

    #[tokio::test]
    async fn test_orchestrator_start_and_stop() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = BridgeOrchestrator::with_launcher(
            create_test_config(&temp_dir),
            Arc::new(CatLauncher),
        );

        let addr = orchestrator.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(orchestrator.state().await, OrchestratorState::Running);
        assert!(orchestrator.socket_path().exists());
        assert!(!orchestrator.lifecycle().is_shutting_down());

        assert!(orchestrator.start().await.is_err());

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
        assert!(!orchestrator.socket_path().exists());
        assert!(orchestrator.lifecycle().is_shutting_down());

        // Stopping twice is a no-op.
        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_fails_when_port_taken() {
        let temp_dir = TempDir::new().unwrap();
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = create_test_config(&temp_dir);
        config.server.port = taken.local_addr().unwrap().port();

        let mut orchestrator = BridgeOrchestrator::with_launcher(config, Arc::new(CatLauncher));
        assert!(orchestrator.start().await.is_err());
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    }

    #[tokio::test]
    async fn test_control_socket_status_and_stop() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = BridgeOrchestrator::with_launcher(
            create_test_config(&temp_dir),
            Arc::new(CatLauncher),
        );
        orchestrator.start().await.unwrap();

        let mut client = IpcClient::connect(orchestrator.socket_path()).await.unwrap();
        assert!(client.ping().await.unwrap());

        match client.status().await.unwrap() {
            IpcResponse::Status {
                running,
                session_count,
                ..
            } => {
                assert!(running);
                assert_eq!(session_count, 0);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        assert_eq!(
            client.list_sessions().await.unwrap(),
            IpcResponse::Sessions { sessions: vec![] }
        );

        assert_eq!(client.stop().await.unwrap(), IpcResponse::Stopping);
        tokio::time::timeout(
            Duration::from_secs(2),
            orchestrator.shutdown_token().cancelled(),
        )
        .await
        .unwrap();

        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_request_unknown_session() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = BridgeOrchestrator::with_launcher(
            create_test_config(&temp_dir),
            Arc::new(CatLauncher),
        );
        let token = orchestrator.shutdown_token();

        let response = handle_request(
            orchestrator.lifecycle(),
            &token,
            Instant::now(),
            IpcRequest::TerminateSession {
                session_id: "missing".to_string(),
            },
        )
        .await;
        assert!(matches!(response, IpcResponse::Error { message } if message.contains("missing")));

        let response = handle_request(
            orchestrator.lifecycle(),
            &token,
            Instant::now(),
            IpcRequest::TerminateHost {
                target_host: "nowhere".to_string(),
            },
        )
        .await;
        assert_eq!(
            response,
            IpcResponse::HostTerminated {
                target_host: "nowhere".to_string(),
                count: 0
            }
        );
    }
}
