//! One-shot command execution

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use ct_core::{ClientConfig, OutputConfig};
use ct_session::terminal::terminal_size;
use ct_session::{run_exec, write_output, Client, ExecOptions};

use crate::output::print_info;

/// Run `command` on `agent` and print its output to stdout
pub async fn exec_command(
    config: ClientConfig,
    agent: &str,
    command: &str,
    timeout: Option<u64>,
    output: OutputConfig,
    cancel: CancellationToken,
) -> Result<()> {
    if command.trim().is_empty() {
        anyhow::bail!("No command given");
    }

    let options = ExecOptions {
        timeout: timeout
            .map(Duration::from_secs)
            .unwrap_or(config.terminal.exec_timeout),
        settle: config.terminal.exec_settle,
    };
    let size = terminal_size().unwrap_or_default();
    let client = Client::new(config)?;

    if output.show_status() {
        tracing::info!(agent, command, "Running command");
    }

    let conn = tokio::select! {
        _ = cancel.cancelled() => anyhow::bail!("Cancelled"),
        conn = client.open(agent, size) => Arc::new(conn?),
    };

    let result = tokio::select! {
        _ = cancel.cancelled() => {
            conn.close().await;
            anyhow::bail!("Cancelled");
        }
        result = run_exec(Arc::clone(&conn), command, &options) => result?,
    };

    if result.is_empty() && output.verbose > 0 {
        print_info("Command produced no output");
    }

    let mut stdout = tokio::io::stdout();
    write_output(&mut stdout, &result)
        .await
        .context("Failed to write command output")?;

    Ok(())
}

/// Join trailing command arguments into one shell line
pub fn join_command(args: &[String]) -> String {
    args.join(" ")
}
