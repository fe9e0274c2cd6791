//! Remote-login process launcher.
//!
//! The launcher turns a target host into a running `ssh` child on a fresh
//! PTY. The identity is fixed: user `ubuntu` and the `netcat-key.pem` private
//! key next to the service executable. The only per-connection input is the
//! target host, which is validated so it can never be interpreted as an
//! option by the login program.

use std::path::{Path, PathBuf};

use portable_pty::CommandBuilder;

use super::error::LaunchError;
use super::pty::{Geometry, PtyProcess};

/// Login program.
pub const SSH_PROGRAM: &str = "ssh";

/// Remote user every session logs in as.
pub const REMOTE_USER: &str = "ubuntu";

/// Private key file, resolved against the executable's directory.
pub const KEY_FILE: &str = "netcat-key.pem";

/// `TERM` value handed to the login program.
pub const TERM: &str = "xterm-color";

/// Maximum accepted length of a target host.
const MAX_HOST_LEN: usize = 253;

/// Starts the process backing a session.
///
/// Implementations block while spawning and must be callable from any thread.
pub trait Launcher: Send + Sync {
    /// Spawns a process connected to `target_host`.
    fn launch(&self, target_host: &str) -> Result<PtyProcess, LaunchError>;
}

/// Launches `ssh -i <key> ubuntu@<host>` on an 80x30 PTY.
#[derive(Debug, Clone)]
pub struct SshLauncher {
    program: String,
    key_path: PathBuf,
}

impl Default for SshLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl SshLauncher {
    /// Creates a launcher using the key next to the running executable.
    pub fn new() -> Self {
        Self {
            program: SSH_PROGRAM.to_string(),
            key_path: resolve_key_path(Path::new(KEY_FILE)),
        }
    }

    /// Overrides the resolved credential path.
    pub fn with_key_path(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.key_path = key_path.into();
        self
    }

    #[cfg(test)]
    fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    /// Returns the credential path checked before every launch.
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Returns the geometry new processes start with.
    pub fn geometry(&self) -> Geometry {
        Geometry::default()
    }

    /// Builds the login command for `target_host` without spawning it.
    pub fn command(&self, target_host: &str) -> Result<CommandBuilder, LaunchError> {
        validate_target_host(target_host)?;

        let mut cmd = CommandBuilder::new(&self.program);
        cmd.arg("-i");
        cmd.arg(&self.key_path);
        cmd.arg(format!("{}@{}", REMOTE_USER, target_host));
        cmd.env("TERM", TERM);
        // Without an explicit cwd the PTY layer would start in $HOME.
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }
        Ok(cmd)
    }
}

impl Launcher for SshLauncher {
    fn launch(&self, target_host: &str) -> Result<PtyProcess, LaunchError> {
        if !self.key_path.is_file() {
            return Err(LaunchError::CredentialMissing(self.key_path.clone()));
        }

        let cmd = self.command(target_host)?;
        let process = PtyProcess::spawn(cmd, self.geometry())?;

        tracing::info!(
            target_host = %target_host,
            pid = ?process.pid(),
            program = %self.program,
            "Launched remote shell"
        );

        Ok(process)
    }
}

/// Checks that `host` is a bare hostname, IPv4, or IPv6 address.
///
/// Rejects anything the login program could read as an option or as a
/// different user or destination.
pub fn validate_target_host(host: &str) -> Result<(), LaunchError> {
    let invalid = || LaunchError::InvalidTarget(host.to_string());

    if host.is_empty() || host.len() > MAX_HOST_LEN || host.starts_with('-') {
        return Err(invalid());
    }

    let inner = match host.strip_prefix('[') {
        Some(rest) => rest.strip_suffix(']').ok_or_else(invalid)?,
        None => host,
    };
    if inner.is_empty() {
        return Err(invalid());
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':');
    if inner.chars().all(allowed) {
        Ok(())
    } else {
        Err(invalid())
    }
}

/// Resolves a credential path relative to the executable's directory.
pub fn resolve_key_path(key_file: &Path) -> PathBuf {
    if key_file.is_absolute() {
        return key_file.to_path_buf();
    }
    let base = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join(key_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use tempfile::TempDir;

    fn launcher_with_key(dir: &TempDir) -> SshLauncher {
        let key = dir.path().join("netcat-key.pem");
        std::fs::write(&key, "-----BEGIN KEY-----\n").unwrap();
        SshLauncher::new().with_key_path(key)
    }

    #[test]
    fn test_command_uses_fixed_identity() {
        let dir = TempDir::new().unwrap();
        let launcher = launcher_with_key(&dir);
        let cmd = launcher.command("203.0.113.5").unwrap();

        let argv: Vec<OsString> = cmd.get_argv().clone();
        assert_eq!(
            argv,
            vec![
                OsString::from("ssh"),
                OsString::from("-i"),
                launcher.key_path().as_os_str().to_os_string(),
                OsString::from("ubuntu@203.0.113.5"),
            ]
        );
    }

    #[test]
    fn test_identity_is_fixed() {
        let launcher = SshLauncher::new();
        assert!(launcher.key_path().is_absolute());
        assert!(launcher.key_path().ends_with(KEY_FILE));
        assert_eq!(launcher.geometry(), Geometry::new(80, 30));

        let dir = TempDir::new().unwrap();
        let cmd = launcher_with_key(&dir).command("203.0.113.5").unwrap();
        assert_eq!(cmd.get_env("TERM"), Some(std::ffi::OsStr::new("xterm-color")));
        assert_eq!(
            cmd.get_cwd(),
            Some(&std::env::current_dir().unwrap().into_os_string())
        );
    }

    #[test]
    fn test_validate_accepts_hosts() {
        for host in [
            "203.0.113.5",
            "ec2-203-0-113-5.compute-1.amazonaws.com",
            "my_host",
            "2001:db8::1",
            "[2001:db8::1]",
        ] {
            assert!(validate_target_host(host).is_ok(), "rejected {}", host);
        }
    }

    #[test]
    fn test_validate_rejects_injection() {
        for host in [
            "",
            "-oProxyCommand=sh",
            "root@203.0.113.5",
            "host name",
            "host;rm -rf /",
            "[2001:db8::1",
            "[]",
            "$(id)",
        ] {
            assert!(
                matches!(
                    validate_target_host(host),
                    Err(LaunchError::InvalidTarget(_))
                ),
                "accepted {:?}",
                host
            );
        }
    }

    #[test]
    fn test_validate_rejects_overlong() {
        let host = "a".repeat(MAX_HOST_LEN + 1);
        assert!(validate_target_host(&host).is_err());
    }

    #[test]
    fn test_launch_without_credential_fails_fast() {
        let dir = TempDir::new().unwrap();
        let launcher = SshLauncher::new().with_key_path(dir.path().join("missing.pem"));

        let result = launcher.launch("203.0.113.5");
        assert!(matches!(result, Err(LaunchError::CredentialMissing(_))));
    }

    #[test]
    fn test_launch_invalid_host() {
        let dir = TempDir::new().unwrap();
        let launcher = launcher_with_key(&dir);

        let result = launcher.launch("-F/etc/passwd");
        assert!(matches!(result, Err(LaunchError::InvalidTarget(_))));
    }

    #[test]
    fn test_launch_missing_program_is_spawn_failure() {
        let dir = TempDir::new().unwrap();
        let launcher = launcher_with_key(&dir).with_program("/nonexistent/ssh");

        let result = launcher.launch("203.0.113.5");
        assert!(matches!(result, Err(LaunchError::SpawnFailure(_))));
    }

    #[test]
    fn test_resolve_absolute_key_path() {
        let path = Path::new("/etc/termbridge/key.pem");
        assert_eq!(resolve_key_path(path), PathBuf::from("/etc/termbridge/key.pem"));
    }

    #[test]
    fn test_resolve_relative_key_path() {
        let resolved = resolve_key_path(Path::new("netcat-key.pem"));
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("netcat-key.pem"));
    }
}
