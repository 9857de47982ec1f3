//! Shared helpers for ct-session integration tests

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use ct_session::{Connection, RawTerminal};

pub type ServerSocket = WebSocketStream<DuplexStream>;

pub const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// A connected client/server WebSocket pair over an in-memory pipe
pub async fn connection_pair() -> (Arc<Connection>, ServerSocket) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    (
        Arc::new(Connection::from_socket(client, WRITE_TIMEOUT)),
        server,
    )
}

/// Next data frame from the client, skipping close and ping frames
pub async fn next_frame(server: &mut ServerSocket) -> Option<Message> {
    while let Some(msg) = server.next().await {
        match msg {
            Ok(msg @ (Message::Binary(_) | Message::Text(_))) => return Some(msg),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

/// Close the server side with the given code
pub async fn close_with(server: &mut ServerSocket, code: CloseCode, reason: &'static str) {
    let _ = server
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Keep reading from the server side until the client goes away
pub async fn drain(mut server: ServerSocket) {
    while let Some(Ok(_)) = server.next().await {}
}

/// Terminal double that counts mode switches
#[derive(Clone, Default)]
pub struct MockTerminal {
    pub enabled: Arc<AtomicUsize>,
    pub restored: Arc<AtomicUsize>,
    pub fail_enable: bool,
}

impl MockTerminal {
    pub fn enabled(&self) -> usize {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn restored(&self) -> usize {
        self.restored.load(Ordering::SeqCst)
    }
}

impl RawTerminal for MockTerminal {
    fn enable_raw(&mut self) -> io::Result<()> {
        if self.fail_enable {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "not a tty"));
        }
        self.enabled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn restore(&mut self) -> io::Result<()> {
        self.restored.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Output sink whose contents the test can inspect
#[derive(Clone, Default)]
pub struct SharedOutput(pub Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl AsyncWrite for SharedOutput {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Input that fails on the first read
pub struct FailingInput;

impl AsyncRead for FailingInput {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin gone")))
    }
}

/// Minimal line-oriented shell: understands `echo`, `stty -echo` and `exit`
#[derive(Debug)]
pub struct FakeShell {
    echo: bool,
    line: Vec<u8>,
}

impl Default for FakeShell {
    fn default() -> Self {
        Self {
            echo: true,
            line: Vec::new(),
        }
    }
}

/// What the shell wants sent back after a chunk of input
#[derive(Debug, Default)]
pub struct ShellReply {
    pub output: Vec<u8>,
    pub exit: bool,
}

impl FakeShell {
    pub const PROMPT: &'static str = "$ ";

    pub fn feed(&mut self, data: &[u8]) -> ShellReply {
        let mut reply = ShellReply::default();
        for &byte in data {
            if byte != b'\n' {
                self.line.push(byte);
                continue;
            }
            let line = String::from_utf8_lossy(&std::mem::take(&mut self.line)).into_owned();
            if self.echo {
                reply.output.extend_from_slice(line.as_bytes());
                reply.output.extend_from_slice(b"\r\n");
            }
            for part in line.split(';').map(str::trim) {
                match part {
                    "stty -echo" => self.echo = false,
                    "exit" => {
                        reply.exit = true;
                        return reply;
                    }
                    "echo" => reply.output.extend_from_slice(b"\r\n"),
                    _ => {
                        if let Some(text) = part.strip_prefix("echo ") {
                            reply.output.extend_from_slice(text.as_bytes());
                            reply.output.extend_from_slice(b"\r\n");
                        }
                    }
                }
            }
            if !self.echo {
                continue;
            }
            reply.output.extend_from_slice(Self::PROMPT.as_bytes());
        }
        reply
    }
}

/// Serve a fake shell on `server`, sending output `chunk` bytes at a time
pub async fn serve_shell(mut server: ServerSocket, chunk: usize) {
    let mut shell = FakeShell::default();
    if server
        .send(Message::Binary(FakeShell::PROMPT.as_bytes().to_vec()))
        .await
        .is_err()
    {
        return;
    }

    while let Some(Message::Binary(data)) = next_frame(&mut server).await {
        let reply = shell.feed(&data);
        for piece in reply.output.chunks(chunk.max(1)) {
            if server.send(Message::Binary(piece.to_vec())).await.is_err() {
                return;
            }
        }
        if reply.exit {
            close_with(&mut server, CloseCode::Normal, "").await;
            drain(server).await;
            return;
        }
    }
}
