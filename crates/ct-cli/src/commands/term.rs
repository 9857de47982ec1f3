//! Interactive terminal command

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use ct_core::{ClientConfig, OutputConfig};
use ct_session::terminal::{is_interactive, resize_events, stdin_reader, terminal_size};
use ct_session::{
    run_interactive, Client, CrosstermTerminal, Outcome, PumpOptions, SessionError,
};

use crate::output::{print_info, print_success, print_warning};

/// Open an interactive terminal on `agent` and run it until it ends
pub async fn term_command(
    config: ClientConfig,
    agent: &str,
    output: OutputConfig,
    cancel: CancellationToken,
) -> Result<()> {
    if !is_interactive() {
        return Err(SessionError::NoTerminal.into());
    }

    let size = terminal_size()?;
    let options = PumpOptions {
        keepalive_interval: config.terminal.keepalive_interval,
    };
    let client = Client::new(config)?;

    if output.show_status() {
        print_info(&format!("Opening terminal on agent {}...", agent));
    }

    let conn = tokio::select! {
        _ = cancel.cancelled() => {
            print_warning("Cancelled");
            return Ok(());
        }
        conn = client.open(agent, size) => conn?,
    };

    if output.show_status() {
        print_success(&format!("Connected to agent {}", agent));
    }

    let mut terminal = CrosstermTerminal::new();
    let outcome = run_interactive(
        Arc::new(conn),
        stdin_reader()?,
        tokio::io::stdout(),
        &mut terminal,
        resize_events()?,
        cancel,
        &options,
    )
    .await?;

    if output.show_status() {
        match outcome {
            Outcome::Closed => print_success("Terminal session closed"),
            Outcome::Cancelled => print_info("Terminal session cancelled"),
        }
    }

    Ok(())
}
