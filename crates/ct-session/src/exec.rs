//! Single command execution over a terminal connection
//!
//! The remote end only offers a shell stream, so the command is framed with
//! marker echoes (see [`ct_protocol::exec`]) and the output is recovered by
//! a reader task that accumulates everything the shell sends back.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use ct_protocol::{exec_payload, generate_marker, MarkerScanner, DISABLE_ECHO};

use crate::connection::{Connection, FrameStream};
use crate::error::SessionError;

/// Settings for a single command run
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Deadline for the whole exchange, from start to extracted output
    pub timeout: Duration,
    /// Pause between disabling remote echo and sending the command
    pub settle: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            settle: Duration::from_millis(500),
        }
    }
}

/// Run `command` on the remote shell and return its trimmed output
///
/// The connection is closed when this returns, whatever the outcome. If the
/// stream ends early, whatever followed the start marker is returned rather
/// than an error.
pub async fn run_exec(
    conn: Arc<Connection>,
    command: &str,
    options: &ExecOptions,
) -> Result<String, SessionError> {
    let Some(reader) = conn.take_reader() else {
        conn.close().await;
        return Err(SessionError::Closed);
    };

    let marker = generate_marker();
    let (ready_tx, ready_rx) = oneshot::channel();
    let (result_tx, result_rx) = oneshot::channel();

    let accumulator = tokio::spawn(accumulate(
        Arc::clone(&conn),
        reader,
        MarkerScanner::new(&marker),
        ready_tx,
        result_tx,
    ));

    let deadline = Instant::now() + options.timeout;
    let exchange = exchange(&conn, command, &marker, options.settle, ready_rx, result_rx);
    let result = match tokio::time::timeout_at(deadline, exchange).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(timeout = ?options.timeout, "Command did not finish in time");
            Err(SessionError::Timeout {
                what: "command",
                after: options.timeout,
            })
        }
    };

    conn.close().await;
    accumulator.abort();

    result
}

async fn exchange(
    conn: &Connection,
    command: &str,
    marker: &str,
    settle: Duration,
    ready: oneshot::Receiver<()>,
    result: oneshot::Receiver<String>,
) -> Result<String, SessionError> {
    // A dropped sender means the stream ended before the shell said anything
    if ready.await.is_ok() {
        if let Err(e) = send_command(conn, command, marker, settle).await {
            conn.close().await;
            let salvaged = result.await.unwrap_or_default();
            return if salvaged.is_empty() {
                Err(e)
            } else {
                tracing::debug!("Returning partial output after send failure: {}", e);
                Ok(salvaged)
            };
        }
    } else {
        tracing::debug!("Terminal closed before the remote shell was ready");
    }

    result.await.map_err(|_| SessionError::Closed)
}

async fn send_command(
    conn: &Connection,
    command: &str,
    marker: &str,
    settle: Duration,
) -> Result<(), SessionError> {
    conn.send_bytes(DISABLE_ECHO.as_bytes().to_vec()).await?;
    tokio::time::sleep(settle).await;

    tracing::debug!(command, "Sending command");
    conn.send_bytes(exec_payload(marker, command).into_bytes())
        .await
}

/// Read the socket until the output is complete or the stream ends
async fn accumulate(
    conn: Arc<Connection>,
    mut reader: FrameStream,
    mut scanner: MarkerScanner,
    ready: oneshot::Sender<()>,
    result: oneshot::Sender<String>,
) {
    let done = conn.done();
    let mut ready = Some(ready);

    loop {
        let next = tokio::select! {
            _ = done.cancelled() => break,
            next = reader.next() => next,
        };

        let data = match next {
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!("Terminal stream ended with error: {}", e);
                break;
            }
        };
        if data.is_empty() {
            continue;
        }

        if let Some(tx) = ready.take() {
            let _ = tx.send(());
        }

        if let Some(output) = scanner.push(&data) {
            let _ = result.send(output);
            return;
        }
    }

    tracing::trace!(bytes = scanner.len(), "Terminal stream ended, salvaging output");
    let _ = result.send(scanner.finish());
}

/// Write extracted output in one piece, followed by a newline
///
/// Empty output writes nothing.
pub async fn write_output<W>(writer: &mut W, output: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if output.is_empty() {
        return Ok(());
    }
    let mut buf = String::with_capacity(output.len() + 1);
    buf.push_str(output);
    buf.push('\n');
    writer.write_all(buf.as_bytes()).await?;
    writer.flush().await
}
