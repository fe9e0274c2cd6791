//! termbridge
//!
//! WebSocket to SSH terminal bridge.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bridge::config::Config;
use bridge::ipc::pidfile::{remove_pid_file, write_pid_file};
use bridge::ipc::{
    get_bridge_pid, get_pid_file_path, get_socket_path, is_bridge_running, IpcClient, IpcResponse,
    IpcSessionInfo,
};
use bridge::orchestrator::BridgeOrchestrator;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

/// termbridge - relay browser terminals to SSH sessions.
#[derive(Parser, Debug)]
#[command(name = "termbridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the bridge in the foreground
    Start {
        /// Override the listening port
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Stop the running bridge
    Stop {
        /// Force immediate termination (SIGKILL)
        #[arg(long, short)]
        force: bool,

        /// Timeout in seconds for graceful shutdown (default: 30)
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show bridge status
    Status,

    /// Manage terminal sessions
    #[command(subcommand)]
    Sessions(SessionsCommands),

    /// Close every session connected to a host
    TerminateHost {
        /// Target host whose sessions are closed
        host: String,
    },
}

/// Subcommands for session management.
#[derive(Subcommand, Debug, Clone)]
pub enum SessionsCommands {
    /// List all live sessions
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Terminate a live session
    Kill {
        /// Session ID to terminate
        session_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    if let Commands::Start { port: Some(port) } = &cli.command {
        config.server.port = *port;
    }
    config.validate()?;

    let _log_guard = init_logging(&config, cli.verbose, matches!(cli.command, Commands::Start { .. }))?;
    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    let socket_path = config
        .daemon
        .control_socket
        .clone()
        .unwrap_or_else(get_socket_path);

    match cli.command {
        Commands::Start { .. } => {
            if is_bridge_running() {
                let pid = get_bridge_pid().unwrap_or(0);
                eprintln!("Error: termbridge already running (PID: {})", pid);
                eprintln!();
                eprintln!("To stop it, run:");
                eprintln!("  termbridge stop");
                std::process::exit(1);
            }

            let mut orchestrator = BridgeOrchestrator::new(config);
            run_foreground(&mut orchestrator).await?;
        }
        Commands::Stop { force, timeout } => {
            tracing::debug!("Stopping termbridge (force: {})", force);

            let result = if force {
                force_stop_bridge(&socket_path)
            } else {
                graceful_stop_bridge(&socket_path, timeout).await
            };
            match result {
                Ok(()) => println!("termbridge stopped"),
                Err(e) => {
                    eprintln!("Failed to stop termbridge: {}", e);
                    if !force {
                        eprintln!("Try: termbridge stop --force");
                    }
                    std::process::exit(1);
                }
            }
        }
        Commands::Status => match query_status(&socket_path).await {
            Ok(status) => {
                println!(
                    "termbridge: {}",
                    if status.running { "running" } else { "stopping" }
                );
                println!("  Uptime:   {}", format_duration(status.uptime_secs));
                println!("  Sessions: {}", status.session_count);
            }
            Err(e) => {
                eprintln!("termbridge is not running: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Sessions(cmd) => match cmd {
            SessionsCommands::List { json } => match query_sessions_list(&socket_path).await {
                Ok(sessions) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&sessions)?);
                    } else {
                        print_sessions_table(&sessions);
                    }
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            },
            SessionsCommands::Kill { session_id } => match terminate_session(&socket_path, &session_id).await {
                Ok(()) => println!("Session {} terminated", session_id),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            },
        },
        Commands::TerminateHost { host } => match terminate_host(&socket_path, &host).await {
            Ok(count) => println!("Closed {} session(s) for {}", count, host),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

/// Installs the global subscriber.
///
/// `--verbose` forces `debug`. The service writes daily rolling files when
/// `daemon.log_dir` is set; CLI commands always log to stderr.
fn init_logging(config: &Config, verbose: bool, service: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = if verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };

    match &config.daemon.log_dir {
        Some(dir) if service => {
            std::fs::create_dir_all(dir)
                .map_err(|e| anyhow::anyhow!("Failed to create log directory {:?}: {}", dir, e))?;
            let appender = tracing_appender::rolling::daily(dir, "termbridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

/// Runs the bridge until a signal or a control-socket `Stop` arrives.
async fn run_foreground(orchestrator: &mut BridgeOrchestrator) -> anyhow::Result<()> {
    let addr = orchestrator.start().await?;
    tracing::info!("Listening on ws://{}", addr);

    let pid_path = get_pid_file_path();
    if let Err(e) = write_pid_file(&pid_path) {
        tracing::warn!("Failed to write PID file {:?}: {}", pid_path, e);
    }

    let shutdown = orchestrator.shutdown_token();
    tokio::select! {
        _ = wait_for_shutdown_signal() => {}
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested");
        }
    }

    let result = orchestrator.stop().await;
    remove_pid_file(&pid_path);
    result
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!("Failed to register signal handlers: {}", e);
            std::future::pending::<()>().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}

/// Status reported by a running bridge.
struct BridgeStatus {
    running: bool,
    uptime_secs: u64,
    session_count: usize,
}

async fn connect_client(socket_path: &Path) -> anyhow::Result<IpcClient> {
    IpcClient::connect_with_timeout(socket_path, Duration::from_secs(5))
        .await
        .map_err(|_| anyhow::anyhow!("termbridge is not running (cannot connect to socket)"))
}

/// Query the bridge status via IPC.
async fn query_status(socket_path: &Path) -> anyhow::Result<BridgeStatus> {
    let mut client = connect_client(socket_path).await?;
    let response = client
        .status()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to query status: {}", e))?;

    match response {
        IpcResponse::Status {
            running,
            uptime_secs,
            session_count,
        } => Ok(BridgeStatus {
            running,
            uptime_secs,
            session_count,
        }),
        IpcResponse::Error { message } => anyhow::bail!("termbridge returned error: {}", message),
        _ => anyhow::bail!("Unexpected response from termbridge"),
    }
}

/// Query the list of live sessions.
async fn query_sessions_list(socket_path: &Path) -> anyhow::Result<Vec<IpcSessionInfo>> {
    let mut client = connect_client(socket_path).await?;
    let response = client
        .list_sessions()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to query sessions: {}", e))?;

    match response {
        IpcResponse::Sessions { sessions } => Ok(sessions),
        IpcResponse::Error { message } => anyhow::bail!("termbridge returned error: {}", message),
        _ => anyhow::bail!("Unexpected response from termbridge"),
    }
}

/// Terminate a session by ID.
async fn terminate_session(socket_path: &Path, session_id: &str) -> anyhow::Result<()> {
    let mut client = connect_client(socket_path).await?;
    let response = client
        .terminate_session(session_id.to_string())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to send terminate request: {}", e))?;

    match response {
        IpcResponse::SessionTerminated { session_id: closed } if closed == session_id => Ok(()),
        IpcResponse::SessionTerminated { session_id: closed } => {
            anyhow::bail!("Unexpected session terminated: {}", closed)
        }
        IpcResponse::Error { message } => anyhow::bail!("{}", message),
        _ => anyhow::bail!("Unexpected response from termbridge"),
    }
}

/// Terminate every session bound to `host`.
async fn terminate_host(socket_path: &Path, host: &str) -> anyhow::Result<usize> {
    let mut client = connect_client(socket_path).await?;
    let response = client
        .terminate_host(host.to_string())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to send terminate request: {}", e))?;

    match response {
        IpcResponse::HostTerminated { count, .. } => Ok(count),
        IpcResponse::Error { message } => anyhow::bail!("{}", message),
        _ => anyhow::bail!("Unexpected response from termbridge"),
    }
}

/// Print sessions in a formatted ASCII table.
fn print_sessions_table(sessions: &[IpcSessionInfo]) {
    if sessions.is_empty() {
        println!("No active sessions.");
        return;
    }

    let id_width = sessions.iter().map(|s| s.id.len()).max().unwrap_or(8).max(8);
    let host_width = sessions
        .iter()
        .map(|s| s.target_host.len())
        .max()
        .unwrap_or(4)
        .clamp(4, 32);

    println!(
        "{:<id_width$}  {:<host_width$}  {:<10}  {:>8}  {:>9}  {:>10}",
        "ID",
        "HOST",
        "STATE",
        "PID",
        "SIZE",
        "ACTIVE",
        id_width = id_width,
        host_width = host_width
    );
    println!("{}", "-".repeat(id_width + host_width + 49));

    for session in sessions {
        let pid = session
            .pid
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "-".to_string());
        let size = format!("{}x{}", session.cols, session.rows);

        println!(
            "{:<id_width$}  {:<host_width$}  {:<10}  {:>8}  {:>9}  {:>10}",
            truncate_str(&session.id, id_width),
            truncate_str(&session.target_host, host_width),
            session.state,
            pid,
            size,
            format_relative_time(session.last_activity_at),
            id_width = id_width,
            host_width = host_width
        );
    }

    println!();
    println!("Total: {} session(s)", sessions.len());
}

/// Format a UNIX-milliseconds timestamp as relative time (e.g., "5m ago").
fn format_relative_time(timestamp_ms: u64) -> String {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let elapsed = now_ms.saturating_sub(timestamp_ms) / 1000;

    if elapsed < 60 {
        format!("{}s ago", elapsed)
    } else if elapsed < 3600 {
        format!("{}m ago", elapsed / 60)
    } else if elapsed < 86400 {
        format!("{}h ago", elapsed / 3600)
    } else {
        format!("{}d ago", elapsed / 86400)
    }
}

/// Truncate a string to a maximum length, adding "..." if truncated.
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Stop the bridge via IPC and wait for it to exit.
async fn graceful_stop_bridge(socket_path: &Path, timeout_secs: u64) -> anyhow::Result<()> {
    let mut client = connect_client(socket_path).await?;

    println!("Sending shutdown request...");

    let response = client
        .stop()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to send stop request: {}", e))?;

    match response {
        IpcResponse::Stopping => println!("Shutdown acknowledged, waiting for termbridge to exit..."),
        IpcResponse::Error { message } => anyhow::bail!("termbridge returned error: {}", message),
        _ => anyhow::bail!("Unexpected response from termbridge"),
    }

    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);

    while start.elapsed() < timeout {
        if !socket_path.exists() {
            return Ok(());
        }
        if IpcClient::connect_with_timeout(socket_path, Duration::from_millis(100))
            .await
            .is_err()
        {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    anyhow::bail!("Timeout waiting for termbridge to exit ({}s)", timeout_secs)
}

/// Send SIGKILL to the PID recorded in the PID file.
fn force_stop_bridge(socket_path: &Path) -> anyhow::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = get_bridge_pid()
        .ok_or_else(|| anyhow::anyhow!("PID file not found - is termbridge running?"))?;
    let raw = i32::try_from(pid).map_err(|_| anyhow::anyhow!("Invalid PID in file: {}", pid))?;

    kill(Pid::from_raw(raw), Signal::SIGKILL)
        .map_err(|e| anyhow::anyhow!("Failed to kill termbridge (PID {}): {}", pid, e))?;

    println!("Sent SIGKILL to termbridge (PID {})", pid);

    let _ = std::fs::remove_file(get_pid_file_path());
    let _ = std::fs::remove_file(socket_path);

    Ok(())
}

/// Format a duration in seconds to human-readable format.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
