mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;

use ssh_session::DEFAULT_SSH_PORT;
use ssh_session::config::default_config_dir;

#[derive(Parser)]
#[command(name = "sshterm")]
#[command(about = "SSH into managed hosts through the dashboard's terminal gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.config/sshterm/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive session on a host
    Connect(ConnectArgs),

    /// Print the effective configuration
    Config,
}

#[derive(Parser)]
struct ConnectArgs {
    /// Host ID as shown in the dashboard
    host_id: String,

    /// SSH username (prompted for if omitted)
    #[arg(short, long)]
    user: Option<String>,

    /// SSH port on the target host
    #[arg(short, long, default_value_t = DEFAULT_SSH_PORT, value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Private key file; password authentication is used without it
    #[arg(short, long)]
    identity: Option<PathBuf>,

    /// Dashboard URL, overriding server.base_url
    #[arg(long)]
    base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_dir = default_config_dir();
    let config_path = cli.config.unwrap_or_else(|| config_dir.join("config.toml"));

    match cli.command {
        Commands::Config => cli::config_command(&config_path),
        Commands::Connect(args) => {
            // The terminal is in raw mode for the whole session, so logs go to a file.
            let _log_guard = init_logging(&config_dir.join("logs"), cli.debug)?;
            info!(host_id = %args.host_id, "Starting sshterm");
            cli::connect_command(
                &config_path,
                cli::ConnectRequest {
                    host_id: args.host_id,
                    user: args.user,
                    port: args.port,
                    identity: args.identity,
                    base_url: args.base_url,
                },
            )
            .await
        }
    }
}

fn init_logging(log_dir: &std::path::Path, debug: bool) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let default_directive = if debug {
        "sshterm=debug,ssh_session=debug,info"
    } else {
        "sshterm=info,ssh_session=info,warn"
    };
    std::fs::create_dir_all(log_dir)?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, "sshterm.log"));

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .with(env_filter)
        .init();
    Ok(guard)
}
