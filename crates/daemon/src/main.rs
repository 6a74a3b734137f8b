//! ShellMux Daemon
//!
//! Headless session multiplexer for the ShellMux terminal client.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::ipc::{get_socket_path, ControlClient, IpcRequest, IpcResponse, IpcSessionInfo};
use daemon::orchestrator::DaemonOrchestrator;

/// ShellMux daemon - multiplexes shell sessions for the terminal client.
#[derive(Parser, Debug)]
#[command(name = "shellmuxd")]
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

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the ShellMux daemon
    Start,

    /// Stop the running daemon
    Stop {
        /// Timeout in seconds for graceful shutdown (default: 30)
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show daemon status
    Status,

    /// Manage active sessions
    #[command(subcommand)]
    Sessions(SessionsCommands),
}

/// Subcommands for session management.
#[derive(Subcommand, Debug, Clone)]
pub enum SessionsCommands {
    /// List all active sessions
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Close an active session
    Close {
        /// Session ID to close
        session_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();
    config.validate()?;

    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.clone()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Start => {
            // Refuse to start beside a live daemon.
            let probe = ControlClient::new(get_socket_path())
                .with_timeout(Duration::from_millis(500));
            if probe.ping().await {
                eprintln!("Error: Daemon already running");
                eprintln!();
                eprintln!("To stop the existing daemon, run:");
                eprintln!("  shellmuxd stop");
                std::process::exit(1);
            }

            let mut orchestrator = DaemonOrchestrator::new(config)?;
            run_headless(&mut orchestrator).await?;
        }
        Commands::Stop { timeout } => match graceful_stop_daemon(timeout).await {
            Ok(()) => {
                println!("Daemon stopped successfully");
            }
            Err(e) => {
                eprintln!("Failed to stop daemon: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Status => match query_daemon_status().await {
            Ok((uptime_secs, session_count)) => {
                println!("Daemon Status: running");
                println!("  Uptime:   {}", format_duration(uptime_secs));
                println!("  Sessions: {}", session_count);
            }
            Err(e) => {
                eprintln!("Daemon is not running: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Sessions(cmd) => match cmd {
            SessionsCommands::List { json } => match query_sessions_list().await {
                Ok(sessions) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&sessions)?);
                    } else {
                        print_sessions_table(&sessions);
                    }
                }
                Err(e) => {
                    eprintln!("Failed to list sessions: {}", e);
                    std::process::exit(1);
                }
            },
            SessionsCommands::Close { session_id } => match close_session(&session_id).await {
                Ok(()) => {
                    println!("Session {} closed", session_id);
                }
                Err(e) => {
                    eprintln!("Failed to close session {}: {}", session_id, e);
                    std::process::exit(1);
                }
            },
        },
    }

    Ok(())
}

/// Run the daemon until a signal or an IPC stop request arrives.
async fn run_headless(orchestrator: &mut DaemonOrchestrator) -> anyhow::Result<()> {
    orchestrator.start().await?;

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            tracing::info!("Received shutdown signal");
        }
        _ = orchestrator.wait_for_shutdown() => {
            tracing::info!("Shutdown requested via IPC");
        }
    }

    orchestrator.stop().await?;
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::error!(error = %e, "Failed to register SIGTERM handler");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Client for the daemon's control socket.
fn control_client() -> ControlClient {
    ControlClient::new(get_socket_path())
}

/// Query the daemon status via IPC.
async fn query_daemon_status() -> anyhow::Result<(u64, usize)> {
    let response = control_client()
        .request(IpcRequest::Status)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to query status: {}", e))?;

    match response {
        IpcResponse::Status {
            uptime_secs,
            session_count,
            ..
        } => Ok((uptime_secs, session_count)),
        IpcResponse::Error { message } => anyhow::bail!("Daemon returned error: {}", message),
        _ => anyhow::bail!("Unexpected response from daemon"),
    }
}

/// Query the list of active sessions from the daemon.
async fn query_sessions_list() -> anyhow::Result<Vec<IpcSessionInfo>> {
    let response = control_client()
        .request(IpcRequest::ListSessions)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to query sessions: {}", e))?;

    match response {
        IpcResponse::Sessions { sessions } => Ok(sessions),
        IpcResponse::Error { message } => anyhow::bail!("Daemon returned error: {}", message),
        _ => anyhow::bail!("Unexpected response from daemon"),
    }
}

/// Close a specific session by ID via IPC.
async fn close_session(session_id: &str) -> anyhow::Result<()> {
    let response = control_client()
        .request(IpcRequest::CloseSession {
            session_id: session_id.to_string(),
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to send close request: {}", e))?;

    match response {
        IpcResponse::SessionClosed {
            session_id: closed_id,
        } => {
            if closed_id == session_id {
                Ok(())
            } else {
                anyhow::bail!("Unexpected session closed: {}", closed_id)
            }
        }
        IpcResponse::Error { message } => anyhow::bail!("{}", message),
        _ => anyhow::bail!("Unexpected response from daemon"),
    }
}

/// Gracefully stop the daemon via IPC and wait until it exits.
async fn graceful_stop_daemon(timeout_secs: u64) -> anyhow::Result<()> {
    let socket_path = get_socket_path();

    println!("Sending shutdown request...");
    let response = control_client()
        .request(IpcRequest::Stop)
        .await
        .map_err(|_| anyhow::anyhow!("Daemon is not running (cannot connect to socket)"))?;

    match response {
        IpcResponse::Stopping => {
            println!("Shutdown acknowledged, waiting for daemon to exit...");
        }
        IpcResponse::Error { message } => anyhow::bail!("Daemon returned error: {}", message),
        _ => anyhow::bail!("Unexpected response from daemon"),
    }

    // The daemon removes its sockets on the way out.
    let probe = ControlClient::new(&socket_path).with_timeout(Duration::from_millis(100));
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    while start.elapsed() < timeout {
        if !socket_path.exists() || !probe.ping().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    Err(anyhow::anyhow!(
        "Timeout waiting for daemon to exit ({}s)",
        timeout_secs
    ))
}

/// Print sessions in a formatted table.
fn print_sessions_table(sessions: &[IpcSessionInfo]) {
    if sessions.is_empty() {
        println!("No active sessions.");
        return;
    }

    let id_width = sessions.iter().map(|s| s.id.len()).max().unwrap_or(8).max(8);

    println!(
        "{:<id_width$}  {:<8}  {:<12}  OWNER",
        "ID",
        "KIND",
        "STATUS",
        id_width = id_width
    );
    println!("{}", "-".repeat(id_width + 40));

    for session in sessions {
        println!(
            "{:<id_width$}  {:<8}  {:<12}  {}",
            session.id,
            session.kind,
            session.status,
            session.owner,
            id_width = id_width
        );
    }

    println!();
    println!("Total: {} session(s)", sessions.len());
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
