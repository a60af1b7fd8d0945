//! devguard command-line client
//!
//! Unix-flavoured subcommands over the daemon's tool surface. Prints the
//! response envelope as pretty JSON; scripting against it is the point.

#![allow(unused_crate_dependencies)]

use clap::{Parser, Subcommand};
use cli::{Client, ClientConfig};
use serde_json::json;

#[derive(Parser)]
#[command(name = "devguard")]
#[command(about = "Safety-aware process management for development hosts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Daemon host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Daemon port
    #[arg(long, default_value_t = 48_621)]
    port: u16,
}

#[derive(Subcommand)]
enum Commands {
    /// Search processes by name or PID
    Ps {
        /// Name substring or exact PID
        name: String,
        /// Detail tier: instant, quick, smart, or full
        #[arg(long, default_value = "smart")]
        mode: String,
        /// Match the command line too
        #[arg(long)]
        args: bool,
    },
    /// Kill a single process
    Kill {
        /// Target PID
        pid: u32,
        /// Escalate to the forceful signal
        #[arg(long)]
        force: bool,
        /// Allow killing a process the daemon spawned
        #[arg(long)]
        r#override: bool,
        /// Preview without killing
        #[arg(long)]
        dry_run: bool,
    },
    /// Kill a process and all its children
    Killall {
        /// Root PID
        pid: u32,
        /// Escalate to the forceful signal
        #[arg(long)]
        force: bool,
        /// Preview without killing
        #[arg(long)]
        dry_run: bool,
    },
    /// Check the development ports
    Netstat {
        /// One specific port instead of the catalogue
        port: Option<u16>,
    },
    /// One-screen developer status
    Status,
    /// Managed background servers
    Servers,
    /// Who owns a port
    Port {
        /// Port to look up
        port: u16,
    },
    /// Terminate everything the daemon spawned
    Cleanup {
        /// Actually do it
        #[arg(long)]
        confirm: bool,
    },
    /// Run a whitelisted command
    Exec {
        /// The command line
        command: String,
        /// Working directory
        #[arg(long)]
        cwd: Option<String>,
        /// Run in the background and track the process
        #[arg(long)]
        background: bool,
    },
    /// Show the command whitelist and tools
    Allowed,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let mut client = Client::new(ClientConfig {
        host: cli.host.clone(),
        port: cli.port,
    });

    let result = match &cli.command {
        Commands::Ps { name, mode, args } => {
            client
                .call_tool(
                    "find_process",
                    json!({"name": name, "mode": mode, "include_args": args}),
                )
                .await
        }
        Commands::Kill {
            pid,
            force,
            r#override,
            dry_run,
        } => {
            client
                .call_tool(
                    "kill_process",
                    json!({"pid": pid, "force": force, "override": r#override, "dry_run": dry_run}),
                )
                .await
        }
        Commands::Killall { pid, force, dry_run } => {
            client
                .call_tool(
                    "kill_process_tree",
                    json!({"pid": pid, "force": force, "dry_run": dry_run}),
                )
                .await
        }
        Commands::Netstat { port } => {
            let arguments = match port {
                Some(port) => json!({"port": port}),
                None => json!({}),
            };
            client.call_tool("check_ports", arguments).await
        }
        Commands::Status => client.call_tool("dev_status", json!({})).await,
        Commands::Servers => client.call_tool("server_status", json!({})).await,
        Commands::Port { port } => {
            client
                .call_tool("find_process_by_port", json!({"port": port}))
                .await
        }
        Commands::Cleanup { confirm } => {
            client
                .call_tool("cleanup_user_processes", json!({"confirm": confirm}))
                .await
        }
        Commands::Exec {
            command,
            cwd,
            background,
        } => {
            client
                .call_tool(
                    "execute_command",
                    json!({"command": command, "cwd": cwd, "background": background}),
                )
                .await
        }
        Commands::Allowed => client.call_tool("list_allowed", json!({})).await,
    };

    match result {
        Ok(envelope) => {
            let success = envelope
                .get("success")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            println!(
                "{}",
                serde_json::to_string_pretty(&envelope).unwrap_or_default()
            );
            if success {
                std::process::ExitCode::SUCCESS
            } else {
                std::process::ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
