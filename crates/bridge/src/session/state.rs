//! Per-connection session state.
//!
//! A [`Session`] binds one client connection to one launched process. All
//! mutable state lives behind a single async mutex so that state transitions,
//! process installation, and resizes are serialized per session while
//! sessions never contend with each other.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::error::ResizeError;
use super::pty::{Geometry, PtyProcess};
use super::registry::SessionRegistry;
use super::SessionId;

/// Lifecycle state of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Registered, waiting for the process to be launched.
    Connecting,
    /// Process installed, bytes are flowing.
    Active,
    /// Teardown in progress.
    Closing,
    /// Process reaped, session gone from the registry.
    Closed,
}

impl SessionState {
    /// Returns the lowercase name used in status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }

    /// Whether the session is still registered and accepting work.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The process could not be launched.
    LaunchFailed,
    /// The registry refused the session.
    Rejected,
    /// The client disconnected or the transport failed.
    TransportClosed,
    /// The process closed its side of the PTY.
    ProcessExited,
    /// An explicit termination request.
    Terminated,
    /// The service is stopping.
    Shutdown,
}

/// Upper bounds accepted by the resize controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryLimits {
    /// Largest accepted column count.
    pub max_cols: u16,
    /// Largest accepted row count.
    pub max_rows: u16,
}

impl GeometryLimits {
    /// Validates a client-supplied geometry.
    ///
    /// Both dimensions must be at least 1 and at most the configured bound.
    pub fn validate(&self, cols: i64, rows: i64) -> Result<Geometry, ResizeError> {
        let in_range = |value: i64, max: u16| (1..=i64::from(max)).contains(&value);
        if in_range(cols, self.max_cols) && in_range(rows, self.max_rows) {
            Ok(Geometry::new(cols as u16, rows as u16))
        } else {
            Err(ResizeError::InvalidGeometry { cols, rows })
        }
    }
}

impl Default for GeometryLimits {
    fn default() -> Self {
        Self {
            max_cols: 1000,
            max_rows: 1000,
        }
    }
}

/// Effect of a resize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// The PTY was resized.
    Applied,
    /// Stored until the process is installed.
    Queued,
    /// Geometry already matches; nothing was done.
    Unchanged,
    /// The session is closing.
    Ignored,
}

/// Snapshot of a session for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// Remote machine the session connects to.
    pub target_host: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Child process ID once launched.
    pub pid: Option<u32>,
    /// Current geometry.
    pub geometry: Geometry,
    /// Creation time, UNIX milliseconds.
    pub created_at: u64,
    /// Last relayed byte in either direction, UNIX milliseconds.
    pub last_activity_at: u64,
}

/// Result of winning the transition into `Closing`.
#[derive(Debug)]
pub struct Closing {
    /// State before the transition.
    pub previous: SessionState,
    /// The process, if one was installed. The caller must terminate it.
    pub process: Option<PtyProcess>,
}

struct SessionInner {
    state: SessionState,
    process: Option<PtyProcess>,
    geometry: Geometry,
    pending_geometry: Option<Geometry>,
    close_reason: Option<CloseReason>,
}

/// One client connection bound to one remote shell.
pub struct Session {
    id: SessionId,
    target_host: String,
    created_at: u64,
    last_activity_at: AtomicU64,
    cancel: CancellationToken,
    inner: Mutex<SessionInner>,
}

impl Session {
    /// Creates a session in the `Connecting` state.
    pub fn new(id: SessionId, target_host: impl Into<String>, geometry: Geometry) -> Self {
        let now = unix_millis();
        Self {
            id,
            target_host: target_host.into(),
            created_at: now,
            last_activity_at: AtomicU64::new(now),
            cancel: CancellationToken::new(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Connecting,
                process: None,
                geometry,
                pending_geometry: None,
                close_reason: None,
            }),
        }
    }

    /// Returns the session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the remote machine this session connects to.
    pub fn target_host(&self) -> &str {
        &self.target_host
    }

    /// Creation time, UNIX milliseconds.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Last activity time, UNIX milliseconds.
    pub fn last_activity_at(&self) -> u64 {
        self.last_activity_at.load(Ordering::Relaxed)
    }

    /// Records relay activity.
    pub fn touch(&self) {
        self.last_activity_at.store(unix_millis(), Ordering::Relaxed);
    }

    /// Token cancelled when the session starts closing.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Returns the current geometry.
    pub async fn geometry(&self) -> Geometry {
        self.inner.lock().await.geometry
    }

    /// Returns the geometry queued while connecting, if any.
    pub async fn pending_geometry(&self) -> Option<Geometry> {
        self.inner.lock().await.pending_geometry
    }

    /// Returns why the session closed, once it has started closing.
    pub async fn close_reason(&self) -> Option<CloseReason> {
        self.inner.lock().await.close_reason
    }

    /// Validates and applies a client resize request.
    pub async fn resize_checked(
        &self,
        cols: i64,
        rows: i64,
        limits: &GeometryLimits,
    ) -> Result<ResizeOutcome, ResizeError> {
        let geometry = limits.validate(cols, rows)?;
        self.resize(geometry).await
    }

    /// Applies a validated geometry according to the session state.
    ///
    /// `Connecting` queues it (latest wins), `Active` resizes the PTY unless
    /// the geometry is unchanged, `Closing` and `Closed` ignore it.
    pub async fn resize(&self, geometry: Geometry) -> Result<ResizeOutcome, ResizeError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Connecting => {
                if geometry == inner.geometry {
                    inner.pending_geometry = None;
                    Ok(ResizeOutcome::Unchanged)
                } else {
                    inner.pending_geometry = Some(geometry);
                    Ok(ResizeOutcome::Queued)
                }
            }
            SessionState::Active => {
                if geometry == inner.geometry {
                    return Ok(ResizeOutcome::Unchanged);
                }
                if let Some(process) = inner.process.as_mut() {
                    process.resize(geometry)?;
                }
                inner.geometry = geometry;
                Ok(ResizeOutcome::Applied)
            }
            SessionState::Closing | SessionState::Closed => Ok(ResizeOutcome::Ignored),
        }
    }

    /// Installs the launched process and moves to `Active`.
    ///
    /// Applies any geometry queued while connecting. Hands the process back
    /// if the session is no longer `Connecting`; the caller must terminate it.
    pub async fn install(&self, mut process: PtyProcess) -> Result<Geometry, PtyProcess> {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Connecting {
            return Err(process);
        }

        inner.geometry = process.geometry();
        if let Some(pending) = inner.pending_geometry.take() {
            if pending != inner.geometry {
                match process.resize(pending) {
                    Ok(()) => inner.geometry = pending,
                    Err(e) => tracing::warn!(
                        session_id = %self.id,
                        error = %e,
                        "Failed to apply queued resize"
                    ),
                }
            }
        }

        inner.process = Some(process);
        inner.state = SessionState::Active;
        Ok(inner.geometry)
    }

    /// Moves the session into `Closing`.
    ///
    /// Within one critical section this removes the session from `registry`,
    /// cancels its token, and takes the process out. Returns `None` if the
    /// session was already closing or closed.
    pub async fn begin_close(
        self: &Arc<Self>,
        registry: &SessionRegistry,
        reason: CloseReason,
    ) -> Option<Closing> {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_live() {
            return None;
        }

        let previous = inner.state;
        inner.state = SessionState::Closing;
        inner.close_reason = Some(reason);
        registry.remove_session(self);
        self.cancel.cancel();

        Some(Closing {
            previous,
            process: inner.process.take(),
        })
    }

    /// Marks teardown as complete.
    pub async fn finish_close(&self) {
        self.inner.lock().await.state = SessionState::Closed;
    }

    /// Returns a status snapshot.
    pub async fn info(&self) -> SessionInfo {
        let inner = self.inner.lock().await;
        SessionInfo {
            id: self.id.clone(),
            target_host: self.target_host.clone(),
            state: inner.state,
            pid: inner.process.as_ref().and_then(PtyProcess::pid),
            geometry: inner.geometry,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("target_host", &self.target_host)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
