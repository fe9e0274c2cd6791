//! PTY process ownership.
//!
//! A [`PtyProcess`] owns one child process and the master side of its
//! pseudo-terminal. It is a scoped resource: [`PtyProcess::terminate`] is the
//! orderly release path, and dropping a process that was never terminated
//! kills and reaps the child so no exit path can leak it. Inside a Tokio
//! runtime that reap happens on a blocking thread.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, CommandBuilder, ExitStatus, MasterPty, PtySize};

use super::error::{LaunchError, ResizeError};

/// Default terminal width in columns.
pub const DEFAULT_COLS: u16 = 80;

/// Default terminal height in rows.
pub const DEFAULT_ROWS: u16 = 30;

/// Polling interval while waiting for a hung-up child to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    /// Width in columns.
    pub cols: u16,
    /// Height in rows.
    pub rows: u16,
}

impl Geometry {
    /// Creates a geometry from columns and rows.
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    fn to_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(DEFAULT_COLS, DEFAULT_ROWS)
    }
}

/// A child process attached to a pseudo-terminal.
pub struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    pid: Option<u32>,
    geometry: Geometry,
    /// Exit code once the child has been reaped.
    exit_code: Option<u32>,
    /// Set once the child has been reaped or given up on.
    released: bool,
}

impl PtyProcess {
    /// Allocates a PTY of the given size and spawns `cmd` on its slave side.
    pub fn spawn(cmd: CommandBuilder, geometry: Geometry) -> Result<Self, LaunchError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(geometry.to_pty_size())
            .map_err(|e| LaunchError::SpawnFailure(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| LaunchError::SpawnFailure(e.to_string()))?;

        // Only the child may hold the slave, otherwise reads never see EOF.
        drop(pair.slave);

        let pid = child.process_id();

        Ok(Self {
            master: pair.master,
            child,
            pid,
            geometry,
            exit_code: None,
            released: false,
        })
    }

    /// Returns the process ID of the child, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the current PTY geometry.
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Splits off the byte streams of the PTY master.
    ///
    /// Returns a reader for the child's combined output and the writer for its
    /// input. The writer can only be taken once.
    pub fn take_io(&self) -> Result<(Box<dyn Read + Send>, Box<dyn Write + Send>), LaunchError> {
        let reader = self
            .master
            .try_clone_reader()
            .map_err(|e| LaunchError::SpawnFailure(format!("PTY reader: {}", e)))?;
        let writer = self
            .master
            .take_writer()
            .map_err(|e| LaunchError::SpawnFailure(format!("PTY writer: {}", e)))?;
        Ok((reader, writer))
    }

    /// Applies a new window size to the PTY device.
    pub fn resize(&mut self, geometry: Geometry) -> Result<(), ResizeError> {
        self.master
            .resize(geometry.to_pty_size())
            .map_err(|e| ResizeError::Pty(e.to_string()))?;
        self.geometry = geometry;
        Ok(())
    }

    /// Returns the exit code if the child has already exited.
    pub fn try_wait(&mut self) -> Option<u32> {
        if self.exit_code.is_some() {
            return self.exit_code;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => self.reaped(status),
            _ => None,
        }
    }

    /// Terminates and reaps the child.
    ///
    /// Sends `SIGHUP`, waits up to `grace` for the child to exit, then kills
    /// it. Blocks the calling thread; returns the exit code when known.
    /// Calling it again after the child is gone is a no-op.
    pub fn terminate(&mut self, grace: Duration) -> Option<u32> {
        if self.released {
            return self.exit_code;
        }
        if let Some(code) = self.try_wait() {
            return Some(code);
        }

        self.hangup();

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Some(code) = self.try_wait() {
                return Some(code);
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }

        if let Err(e) = self.child.kill() {
            tracing::debug!(pid = ?self.pid, error = %e, "Kill after grace period failed");
        }

        match self.child.wait() {
            Ok(status) => self.reaped(status),
            Err(e) => {
                tracing::warn!(pid = ?self.pid, error = %e, "Failed to reap PTY child");
                self.released = true;
                None
            }
        }
    }

    #[cfg(unix)]
    fn hangup(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.pid {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGHUP) {
                tracing::debug!(pid, error = %e, "SIGHUP delivery failed");
            }
        }
    }

    #[cfg(not(unix))]
    fn hangup(&self) {}

    fn reaped(&mut self, status: ExitStatus) -> Option<u32> {
        let code = status.exit_code();
        self.exit_code = Some(code);
        self.released = true;
        Some(code)
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::debug!(pid = ?self.pid, "Killing PTY child on drop");

        #[cfg(unix)]
        if let (Some(pid), Ok(handle)) = (self.pid, tokio::runtime::Handle::try_current()) {
            handle.spawn_blocking(move || kill_and_reap(pid));
            return;
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Kills and reaps a child that was never waited on, so its pid is still ours.
#[cfg(unix)]
fn kill_and_reap(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::sys::wait::waitpid;
    use nix::unistd::Pid;

    let pid = Pid::from_raw(pid as i32);
    if let Err(e) = kill(pid, Signal::SIGKILL) {
        tracing::debug!(pid = %pid, error = %e, "SIGKILL delivery failed");
    }
    if let Err(e) = waitpid(pid, None) {
        tracing::debug!(pid = %pid, error = %e, "Failed to reap dropped PTY child");
    }
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .field("geometry", &self.geometry)
            .field("exit_code", &self.exit_code)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandBuilder {
        let mut cmd = CommandBuilder::new("/bin/sh");
        cmd.args(["-c", script]);
        cmd
    }

    fn read_all(mut reader: Box<dyn Read + Send>) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
            }
        }
        out
    }

    #[test]
    fn test_default_geometry() {
        assert_eq!(Geometry::default(), Geometry::new(80, 30));
    }

    #[test]
    fn test_spawn_and_read_output() {
        let process = PtyProcess::spawn(sh("printf hello"), Geometry::default()).unwrap();
        assert!(process.pid().is_some());

        let (reader, _writer) = process.take_io().unwrap();
        let output = read_all(reader);
        assert_eq!(String::from_utf8_lossy(&output), "hello");
    }

    #[test]
    fn test_spawn_missing_binary_fails() {
        let cmd = CommandBuilder::new("/nonexistent/definitely-not-here");
        let result = PtyProcess::spawn(cmd, Geometry::default());
        assert!(matches!(result, Err(LaunchError::SpawnFailure(_))));
    }

    #[test]
    fn test_initial_geometry_visible_to_child() {
        let process = PtyProcess::spawn(sh("stty size"), Geometry::new(80, 30)).unwrap();
        let (reader, _writer) = process.take_io().unwrap();
        let output = read_all(reader);
        assert_eq!(String::from_utf8_lossy(&output).trim(), "30 80");
    }

    #[test]
    fn test_resize_updates_geometry() {
        let mut process = PtyProcess::spawn(sh("sleep 5"), Geometry::default()).unwrap();
        process.resize(Geometry::new(120, 40)).unwrap();
        assert_eq!(process.geometry(), Geometry::new(120, 40));
        process.terminate(Duration::from_millis(200));
    }

    #[test]
    fn test_terminate_running_child() {
        let mut process = PtyProcess::spawn(sh("sleep 30"), Geometry::default()).unwrap();
        let started = Instant::now();
        process.terminate(Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(process.released);
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let mut process = PtyProcess::spawn(sh("sleep 30"), Geometry::default()).unwrap();
        let first = process.terminate(Duration::from_millis(100));
        let second = process.terminate(Duration::from_millis(100));
        assert_eq!(first, second);
    }

    #[test]
    fn test_terminate_after_exit_reports_code() {
        let mut process = PtyProcess::spawn(sh("exit 7"), Geometry::default()).unwrap();
        let (reader, _writer) = process.take_io().unwrap();
        let _ = read_all(reader);
        assert_eq!(process.terminate(Duration::from_millis(100)), Some(7));
    }

    #[test]
    fn test_drop_kills_child() {
        let process = PtyProcess::spawn(sh("sleep 30"), Geometry::default()).unwrap();
        let pid = process.pid().unwrap();
        drop(process);
        // Reaped children have no /proc entry.
        assert!(!std::path::Path::new(&format!("/proc/{}/stat", pid)).exists());
    }

    #[tokio::test]
    async fn test_drop_inside_runtime_reaps_child() {
        let process = PtyProcess::spawn(sh("sleep 30"), Geometry::default()).unwrap();
        let pid = process.pid().unwrap();
        drop(process);

        let stat = format!("/proc/{}/stat", pid);
        let deadline = Instant::now() + Duration::from_secs(5);
        while std::path::Path::new(&stat).exists() {
            assert!(Instant::now() < deadline, "child {} was not reaped", pid);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
