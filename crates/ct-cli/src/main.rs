//! ci-term CLI
//!
//! Remote terminals on CI build agents:
//! - `term`: interactive terminal on an agent
//! - `exec`: run one command and print its output
//! - `config`: manage the configuration file

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ci_term::commands;
use ci_term::output::print_error;
use ct_core::config::{self, ClientConfig};
use ct_core::OutputConfig;

#[derive(Parser)]
#[command(name = "ci-term")]
#[command(author, version, about = "Remote terminals on CI build agents")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive terminal on a build agent
    Term {
        /// Agent identifier
        agent: String,
    },

    /// Run a single command on a build agent and print its output
    Exec {
        /// Agent identifier
        agent: String,

        /// Give up after this many seconds (overrides config)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Command line to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a config value (e.g., server.url)
    Get {
        /// Config key (dot-separated path)
        key: String,
    },
    /// Set a config value
    Set {
        /// Config key (dot-separated path)
        key: String,
        /// Value to set
        value: String,
    },
    /// Initialize default configuration
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let output = OutputConfig::new(cli.quiet, cli.verbose);

    // Logs go to stderr so they never mix with command output
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| output.log_level().into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match run(cli, output).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, output: OutputConfig) -> Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Term { agent } => {
            let config = load_client_config(config_path)?;
            let cancel = shutdown_token();
            commands::term_command(config, &agent, output, cancel).await
        }

        Commands::Exec {
            agent,
            timeout,
            command,
        } => {
            let config = load_client_config(config_path)?;
            let cancel = shutdown_token();
            let command = commands::join_command(&command);
            commands::exec_command(config, &agent, &command, timeout, output, cancel).await
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(config_path),
            ConfigAction::Get { key } => commands::config_get(config_path, &key),
            ConfigAction::Set { key, value } => commands::config_set(config_path, &key, &value),
            ConfigAction::Init { force } => commands::config_init(config_path, force),
            ConfigAction::Path => commands::config_path(config_path),
        },
    }
}

fn load_client_config(path: Option<&std::path::Path>) -> Result<ClientConfig> {
    let file = config::load_or_default(path).context("Failed to load configuration")?;
    Ok(file.resolve()?)
}

/// Token cancelled on Ctrl+C or SIGTERM
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, shutting down...");
            }
        }

        cancel_clone.cancel();
    });

    cancel
}
