//! Interactive duplex pump
//!
//! Three units of work share one [`Connection`]:
//!
//! - the output task copies socket payloads to the local output;
//! - the input task copies local input to the socket as binary frames;
//! - the control loop waits on cancellation, the connection's done signal,
//!   input errors, window resizes and the keep-alive ticker.
//!
//! Closing the connection is what stops the copy tasks: it fires the done
//! signal both of them select on. Every path out of [`run_interactive`]
//! closes the connection and restores the local terminal mode.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use ct_core::time::current_time_millis;
use ct_protocol::{ControlFrame, TerminalSize};

use crate::connection::{Connection, FrameStream};
use crate::error::SessionError;
use crate::terminal::{RawModeGuard, RawTerminal};

const INPUT_BUFFER_SIZE: usize = 4096;

/// Settings for an interactive session
#[derive(Debug, Clone)]
pub struct PumpOptions {
    /// Interval between keep-alive pings
    pub keepalive_interval: Duration,
}

impl Default for PumpOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

/// How an interactive session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The remote side closed the session normally
    Closed,
    /// The caller cancelled the session
    Cancelled,
}

/// Run an interactive session until it closes, fails or is cancelled
///
/// `terminal` is switched to raw mode for the duration of the call.
/// Cancellation is a graceful end and yields `Ok(Outcome::Cancelled)`.
pub async fn run_interactive<I, O, T, R>(
    conn: Arc<Connection>,
    input: I,
    output: O,
    terminal: &mut T,
    resize: R,
    cancel: CancellationToken,
    options: &PumpOptions,
) -> Result<Outcome, SessionError>
where
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin + Send + 'static,
    T: RawTerminal + ?Sized,
    R: Stream<Item = TerminalSize> + Unpin,
{
    let Some(reader) = conn.take_reader() else {
        conn.close().await;
        return Err(SessionError::Closed);
    };

    let _raw = match RawModeGuard::acquire(terminal) {
        Ok(guard) => guard,
        Err(e) => {
            conn.close().await;
            return Err(SessionError::Io(e));
        }
    };

    let (error_tx, mut error_rx) = mpsc::channel(1);
    let output_task = tokio::spawn(copy_socket_to_output(Arc::clone(&conn), reader, output));
    let input_task = tokio::spawn(copy_input_to_socket(Arc::clone(&conn), input, error_tx));

    let result = control_loop(&conn, resize, &cancel, &mut error_rx, options).await;

    conn.close().await;
    input_task.abort();
    output_task.abort();

    result
}

async fn control_loop<R>(
    conn: &Connection,
    resize: R,
    cancel: &CancellationToken,
    errors: &mut mpsc::Receiver<SessionError>,
    options: &PumpOptions,
) -> Result<Outcome, SessionError>
where
    R: Stream<Item = TerminalSize> + Unpin,
{
    let done = conn.done();
    let mut resize = resize.fuse();

    let period = options.keepalive_interval;
    let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!("Interactive session cancelled");
                return Ok(Outcome::Cancelled);
            }

            _ = done.cancelled() => {
                return match conn.take_error() {
                    Some(err) => Err(err),
                    None => Ok(Outcome::Closed),
                };
            }

            Some(err) = errors.recv() => {
                conn.fail(err).await;
            }

            Some(size) = resize.next() => {
                tracing::debug!(cols = size.cols, rows = size.rows, "Sending resize");
                if let Err(e) = conn.send_control(ControlFrame::Resize(size)).await {
                    conn.fail(e).await;
                }
            }

            _ = keepalive.tick() => {
                tracing::trace!("Sending keep-alive");
                let ping = ControlFrame::Ping { ts: current_time_millis() };
                if let Err(e) = conn.send_control(ping).await {
                    conn.fail(e).await;
                }
            }
        }
    }
}

async fn copy_socket_to_output<O>(conn: Arc<Connection>, mut reader: FrameStream, mut output: O)
where
    O: AsyncWrite + Unpin,
{
    let done = conn.done();

    loop {
        let next = tokio::select! {
            _ = done.cancelled() => return,
            next = reader.next() => next,
        };

        let data = match next {
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Close(frame))) => {
                match frame {
                    Some(frame) if !is_normal_close(frame.code) => {
                        conn.fail(SessionError::AbnormalClose {
                            code: u16::from(frame.code),
                            reason: frame.reason.into_owned(),
                        })
                        .await;
                    }
                    _ => {
                        tracing::debug!("Server closed the terminal connection");
                        conn.close().await;
                    }
                }
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) if is_expected_close(&e) => {
                conn.close().await;
                return;
            }
            Some(Err(e)) => {
                conn.fail(e.into()).await;
                return;
            }
            None => {
                conn.close().await;
                return;
            }
        };

        let written = async {
            output.write_all(&data).await?;
            output.flush().await
        };
        if let Err(e) = written.await {
            conn.fail(SessionError::Io(e)).await;
            return;
        }
    }
}

async fn copy_input_to_socket<I>(
    conn: Arc<Connection>,
    mut input: I,
    errors: mpsc::Sender<SessionError>,
) where
    I: AsyncRead + Unpin,
{
    let done = conn.done();
    let mut buf = vec![0u8; INPUT_BUFFER_SIZE];

    loop {
        let read = tokio::select! {
            _ = done.cancelled() => return,
            read = input.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                tracing::debug!("Local input reached end of stream");
                return;
            }
            Ok(n) => {
                if let Err(e) = conn.send_bytes(buf[..n].to_vec()).await {
                    let _ = errors.send(e).await;
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!("Local input failed: {}", e);
                let _ = errors.send(SessionError::Io(e)).await;
                return;
            }
        }
    }
}

fn is_normal_close(code: CloseCode) -> bool {
    matches!(code, CloseCode::Normal | CloseCode::Away)
}

fn is_expected_close(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed
    )
}
