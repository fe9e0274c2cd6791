//! PID file utilities for detecting a running service.
//!
//! ## PID File Location
//!
//! The PID file is stored at:
//! - `$XDG_DATA_HOME/termbridge/termbridge.pid` if XDG_DATA_HOME is set
//! - `~/.local/share/termbridge/termbridge.pid` otherwise
//!
//! ## Example
//!
//! ```rust
//! use bridge::ipc::pidfile::{get_bridge_pid, is_bridge_running};
//!
//! if is_bridge_running() {
//!     if let Some(pid) = get_bridge_pid() {
//!         println!("termbridge is already running with PID {}", pid);
//!     }
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the path to the service PID file.
pub fn get_pid_file_path() -> PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local/share")
        });
    data_dir.join("termbridge").join("termbridge.pid")
}

/// Check if a service process is currently running.
pub fn is_bridge_running() -> bool {
    get_bridge_pid().is_some()
}

/// Get the PID of the running service, if any.
///
/// Stale or unparsable PID files are removed.
pub fn get_bridge_pid() -> Option<u32> {
    read_live_pid(&get_pid_file_path())
}

/// Reads the PID stored at `path` if that process is still alive.
///
/// Removes the file when it is unparsable or names a dead process.
pub fn read_live_pid(path: &Path) -> Option<u32> {
    let pid_str = fs::read_to_string(path).ok()?;

    let pid = match pid_str.trim().parse::<u32>() {
        Ok(pid) => pid,
        Err(_) => {
            cleanup_stale_pid_file(path);
            return None;
        }
    };

    if is_process_running(pid) {
        Some(pid)
    } else {
        cleanup_stale_pid_file(path);
        None
    }
}

/// Writes the current process ID to `path`, creating parent directories.
pub fn write_pid_file(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{}\n", std::process::id()))
}

/// Removes the PID file at `path` if it still names this process.
pub fn remove_pid_file(path: &Path) {
    let ours = fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .is_some_and(|pid| pid == std::process::id());
    if ours {
        let _ = fs::remove_file(path);
    }
}

/// Check if a process with the given PID is running.
///
/// On Linux, this checks if `/proc/{pid}/stat` exists.
/// On other Unix systems, this probes the PID with a null signal.
fn is_process_running(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new(&format!("/proc/{}/stat", pid)).exists()
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        i32::try_from(pid).is_ok_and(|pid| kill(Pid::from_raw(pid), None).is_ok())
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

fn cleanup_stale_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}
