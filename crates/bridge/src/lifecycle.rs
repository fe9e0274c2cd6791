//! Session lifecycle management.
//!
//! The [`LifecycleManager`] drives each session through
//! `Connecting → Active → Closing → Closed`. It registers the session,
//! launches its process, wires up the relay, and owns the single teardown
//! path, [`LifecycleManager::close`], which every exit route funnels into.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream};
use protocol::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::relay::{self, DEFAULT_FLUSH_TIMEOUT};
use crate::session::{
    CloseReason, GeometryLimits, LaunchError, Launcher, PtyProcess, ResizeError, ResizeOutcome,
    Session, SessionId, SessionRegistry,
};

/// Tunables for session teardown and relaying.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Bounds applied to client resize requests.
    pub limits: GeometryLimits,
    /// Time between `SIGHUP` and `SIGKILL` on teardown.
    pub kill_grace: Duration,
    /// Capacity of the PTY to client channel, in chunks.
    pub output_queue: usize,
    /// Capacity of the client to PTY channel, in messages.
    pub input_queue: usize,
    /// Time allowed to flush pending output while closing.
    pub flush_timeout: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for LifecycleSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            limits: GeometryLimits {
                max_cols: config.max_cols,
                max_rows: config.max_rows,
            },
            kill_grace: Duration::from_millis(config.kill_grace_ms),
            output_queue: config.output_queue.max(1),
            input_queue: config.input_queue.max(1),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

/// Creates, activates, and tears down sessions.
pub struct LifecycleManager {
    registry: Arc<SessionRegistry>,
    launcher: Arc<dyn Launcher>,
    settings: LifecycleSettings,
    shutting_down: CancellationToken,
}

const SHUTDOWN_NOTICE: &str = "Server error: service is shutting down.\r\n";

impl LifecycleManager {
    /// Creates a manager over `registry` that launches with `launcher`.
    pub fn new(
        registry: Arc<SessionRegistry>,
        launcher: Arc<dyn Launcher>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            registry,
            launcher,
            settings,
            shutting_down: CancellationToken::new(),
        }
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Returns whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.is_cancelled()
    }

    /// Runs one client connection to completion.
    ///
    /// Registers a session for `target_host`, launches its process, and relays
    /// between the transport and the PTY until either side ends. Returns the
    /// reason the session closed. Registration and launch failures are
    /// reported to the client as an `output` message before the transport is
    /// closed. Once the manager is shutting down every connection is refused.
    pub async fn serve<S, St, E>(
        self: Arc<Self>,
        id: SessionId,
        target_host: String,
        sink: S,
        stream: St,
    ) -> CloseReason
    where
        S: Sink<Message> + Send + 'static,
        S::Error: std::fmt::Display + Send,
        St: Stream<Item = Result<Message, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        if self.is_shutting_down() {
            tracing::info!(session_id = %id, target_host = %target_host, "Refusing session during shutdown");
            reject(sink, SHUTDOWN_NOTICE.to_string()).await;
            return CloseReason::Shutdown;
        }

        let session = match self.registry.create(id.clone(), &target_host) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(session_id = %id, target_host = %target_host, error = %e, "Session rejected");
                reject(sink, format!("{}\r\n", e.client_message())).await;
                return CloseReason::Rejected;
            }
        };

        // A shutdown that swept the registry before this insert would miss it.
        if self.is_shutting_down() {
            self.close(&session, CloseReason::Shutdown).await;
            reject(sink, SHUTDOWN_NOTICE.to_string()).await;
            return CloseReason::Shutdown;
        }

        tracing::info!(session_id = %id, target_host = %target_host, "Session connecting");

        let (output_tx, output_rx) = mpsc::channel(self.settings.output_queue);
        let (input_tx, input_rx) = mpsc::channel(self.settings.input_queue);

        let activation = tokio::spawn(Arc::clone(&self).launch_and_activate(
            Arc::clone(&session),
            output_tx,
            input_rx,
        ));
        let mut output = tokio::spawn(relay::pump_output(
            Arc::clone(&session),
            output_rx,
            sink,
            self.settings.flush_timeout,
        ));
        let mut input = tokio::spawn(relay::pump_input(
            Arc::clone(&session),
            stream,
            input_tx,
            self.settings.limits,
        ));

        let (first, output_done) = tokio::select! {
            result = &mut output => (result, true),
            result = &mut input => (result, false),
        };
        let reason = first.unwrap_or_else(|e| {
            tracing::error!(session_id = %id, error = %e, "Relay task failed");
            CloseReason::TransportClosed
        });

        self.close(&session, reason).await;

        if output_done {
            let _ = input.await;
        } else {
            let _ = output.await;
        }
        let _ = activation.await;

        session.close_reason().await.unwrap_or(reason)
    }

    async fn launch_and_activate(
        self: Arc<Self>,
        session: Arc<Session>,
        output_tx: mpsc::Sender<Vec<u8>>,
        input_rx: mpsc::Receiver<Vec<u8>>,
    ) {
        let launcher = Arc::clone(&self.launcher);
        let target_host = session.target_host().to_string();
        let launched = tokio::task::spawn_blocking(move || launcher.launch(&target_host))
            .await
            .unwrap_or_else(|e| Err(LaunchError::SpawnFailure(e.to_string())));

        match launched {
            Ok(process) => {
                self.activate(&session, process, output_tx, input_rx).await;
            }
            Err(e) => self.fail_launch(&session, e, output_tx).await,
        }
    }

    /// Installs a launched process into a `Connecting` session.
    ///
    /// Applies any queued geometry, moves the session to `Active`, and starts
    /// the blocking PTY reader and writer. If the session was closed while
    /// the launch was in flight the process is terminated instead. Returns
    /// whether the session became active.
    pub async fn activate(
        &self,
        session: &Arc<Session>,
        process: PtyProcess,
        output_tx: mpsc::Sender<Vec<u8>>,
        input_rx: mpsc::Receiver<Vec<u8>>,
    ) -> bool {
        let (reader, writer) = match process.take_io() {
            Ok(io) => io,
            Err(e) => {
                self.terminate_process(session, process).await;
                self.fail_launch(session, e, output_tx).await;
                return false;
            }
        };

        let pid = process.pid();
        match session.install(process).await {
            Ok(geometry) => {
                relay::spawn_pty_reader(session.id().clone(), reader, output_tx);
                relay::spawn_pty_writer(
                    session.id().clone(),
                    writer,
                    input_rx,
                    session.cancellation_token().clone(),
                );
                tracing::info!(
                    session_id = %session.id(),
                    target_host = %session.target_host(),
                    pid = ?pid,
                    cols = geometry.cols,
                    rows = geometry.rows,
                    "Session active"
                );
                true
            }
            Err(process) => {
                tracing::debug!(
                    session_id = %session.id(),
                    "Session closed during launch, discarding process"
                );
                self.terminate_process(session, process).await;
                false
            }
        }
    }

    async fn fail_launch(
        &self,
        session: &Arc<Session>,
        error: LaunchError,
        output_tx: mpsc::Sender<Vec<u8>>,
    ) {
        tracing::error!(
            session_id = %session.id(),
            target_host = %session.target_host(),
            error = %error,
            "Failed to launch remote shell"
        );
        let notice = format!("{}\r\n", error.client_message());
        let _ = output_tx.try_send(notice.into_bytes());
        // Held until closed so the output pump cannot report ProcessExited first.
        self.close(session, CloseReason::LaunchFailed).await;
        drop(output_tx);
    }

    /// Tears a session down. The single teardown path.
    ///
    /// The first caller moves the session to `Closing`, which removes it from
    /// the registry and cancels its pumps, then terminates the process and
    /// marks the session `Closed`. Returns `false` for every later caller.
    pub async fn close(&self, session: &Arc<Session>, reason: CloseReason) -> bool {
        let Some(closing) = session.begin_close(&self.registry, reason).await else {
            return false;
        };

        let exit_code = match closing.process {
            Some(process) => self.terminate_process(session, process).await,
            None => None,
        };
        session.finish_close().await;

        tracing::info!(
            session_id = %session.id(),
            target_host = %session.target_host(),
            previous = %closing.previous,
            reason = ?reason,
            exit_code = ?exit_code,
            "Session closed"
        );
        true
    }

    async fn terminate_process(&self, session: &Session, mut process: PtyProcess) -> Option<u32> {
        let grace = self.settings.kill_grace;
        match tokio::task::spawn_blocking(move || process.terminate(grace)).await {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!(session_id = %session.id(), error = %e, "Process termination task failed");
                None
            }
        }
    }

    /// Terminates the session with this id. Returns whether it existed.
    pub async fn terminate(&self, id: &str) -> bool {
        match self.registry.lookup(id) {
            Some(session) => self.close(&session, CloseReason::Terminated).await,
            None => false,
        }
    }

    /// Terminates every session bound to `target_host`.
    ///
    /// Returns the number of sessions closed.
    pub async fn terminate_host(&self, target_host: &str) -> usize {
        let mut closed = 0;
        for session in self.registry.find_by_host(target_host) {
            if self.close(&session, CloseReason::Terminated).await {
                closed += 1;
            }
        }
        tracing::info!(target_host = %target_host, count = closed, "Terminated sessions for host");
        closed
    }

    /// Terminates every registered session and refuses new ones from then on.
    pub async fn shutdown(&self) -> usize {
        self.shutting_down.cancel();
        let sessions = self.registry.sessions();
        let closes = sessions
            .iter()
            .map(|session| self.close(session, CloseReason::Shutdown));
        let closed = futures_util::future::join_all(closes)
            .await
            .into_iter()
            .filter(|closed| *closed)
            .count();
        if closed > 0 {
            tracing::info!(count = closed, "Closed all sessions");
        }
        closed
    }

    /// Applies a resize request to the session with this id.
    pub async fn resize(
        &self,
        id: &str,
        cols: i64,
        rows: i64,
    ) -> Result<ResizeOutcome, ResizeError> {
        let geometry = self.settings.limits.validate(cols, rows)?;
        let session = self
            .registry
            .lookup(id)
            .ok_or_else(|| ResizeError::SessionNotFound(id.to_string()))?;
        session.resize(geometry).await
    }
}

async fn reject<S>(sink: S, notice: String)
where
    S: Sink<Message>,
{
    let mut sink = Box::pin(sink);
    let _ = sink.send(Message::output(notice.into_bytes())).await;
    let _ = sink.close().await;
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("sessions", &self.registry.count())
            .field("settings", &self.settings)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}
