//! Live terminal connection
//!
//! One WebSocket carries everything: keystrokes, terminal output, control
//! frames and exec payloads. The socket is split into a write half, shared
//! by every task that sends, and a read half, handed to exactly one reader.
//!
//! ## Invariants
//!
//! - Writes are serialized by an async mutex and each write runs under a
//!   deadline, so a stalled peer cannot wedge the process.
//! - `close` is idempotent. The first call marks the connection closed,
//!   fires the done signal and closes the socket; later calls return at once.
//! - At most one terminating error is recorded. The first one wins.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use ct_protocol::ControlFrame;

use crate::error::SessionError;

/// Write half of the terminal socket
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;

/// Read half of the terminal socket
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// An established terminal connection
pub struct Connection {
    writer: Mutex<FrameSink>,
    reader: StdMutex<Option<FrameStream>>,
    closed: AtomicBool,
    done: CancellationToken,
    error: StdMutex<Option<SessionError>>,
    write_timeout: Duration,
}

impl Connection {
    /// Wrap an upgraded WebSocket
    pub fn from_socket<S>(socket: WebSocketStream<S>, write_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = socket.split();
        Self::from_parts(Box::pin(sink), Box::pin(stream), write_timeout)
    }

    /// Build a connection from separate halves
    pub fn from_parts(sink: FrameSink, stream: FrameStream, write_timeout: Duration) -> Self {
        Self {
            writer: Mutex::new(sink),
            reader: StdMutex::new(Some(stream)),
            closed: AtomicBool::new(false),
            done: CancellationToken::new(),
            error: StdMutex::new(None),
            write_timeout,
        }
    }

    /// Take the read half. Only the first caller gets it.
    pub fn take_reader(&self) -> Option<FrameStream> {
        self.reader.lock().ok().and_then(|mut reader| reader.take())
    }

    /// Signal fired once the connection is closed
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send raw terminal bytes
    pub async fn send_bytes(&self, data: Vec<u8>) -> Result<(), SessionError> {
        self.write(Message::Binary(data)).await
    }

    /// Send a control frame
    pub async fn send_control(&self, frame: ControlFrame) -> Result<(), SessionError> {
        let json = frame.to_json()?;
        self.write(Message::Text(json)).await
    }

    async fn write(&self, message: Message) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let mut writer = self.writer.lock().await;
        // A close may have won the lock while this write was queued
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        match tokio::time::timeout(self.write_timeout, writer.send(message)).await {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::WriteTimeout(self.write_timeout)),
        }
    }

    /// Record the terminating error unless one is already recorded
    pub fn record_error(&self, error: SessionError) {
        if let Ok(mut slot) = self.error.lock() {
            if slot.is_none() {
                tracing::debug!(error = %error, "Recording terminal connection error");
                *slot = Some(error);
            } else {
                tracing::trace!(error = %error, "Dropping secondary connection error");
            }
        }
    }

    /// Take the recorded terminating error
    pub fn take_error(&self) -> Option<SessionError> {
        self.error.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Record `error` and close, unless the connection is already closing.
    ///
    /// Errors that surface after `close` are consequences of the close, not
    /// causes, and are discarded.
    pub async fn fail(&self, error: SessionError) {
        if self.is_closed() {
            tracing::trace!(error = %error, "Ignoring error on closed connection");
            return;
        }
        self.record_error(error);
        self.close().await;
    }

    /// Close the connection. Safe to call any number of times from any task.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.done.cancel();

        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(self.write_timeout, writer.close()).await {
            Ok(Ok(())) => tracing::debug!("Terminal connection closed"),
            Ok(Err(e)) => tracing::debug!("Error closing terminal connection: {}", e),
            Err(_) => tracing::warn!("Timed out closing terminal connection"),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.is_closed())
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}
