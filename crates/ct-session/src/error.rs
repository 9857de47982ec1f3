//! Session error types

use std::time::Duration;

use ct_protocol::ProtocolError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors raised while negotiating, connecting or running a terminal session
#[derive(Error, Debug)]
pub enum SessionError {
    /// The server rejected the credentials
    #[error("Authentication failed: check the configured username and token")]
    Authentication,

    /// The credentials are valid but lack the required permission
    #[error("Permission denied: not allowed to open a terminal on agent {agent}")]
    Permission { agent: String },

    /// The session endpoint answered with an unexpected status
    #[error(
        "Unexpected response from {url} (HTTP {status}). Is the agent terminal plugin installed and the agent online?\n{body}"
    )]
    PluginUnavailable {
        url: String,
        status: u16,
        body: String,
    },

    /// DNS, TLS, connection refused and friends
    #[error("Network error talking to {host}: {source}")]
    Network {
        host: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The WebSocket upgrade was refused with an HTTP response
    #[error("Terminal connection rejected (HTTP {status}): {body}")]
    Handshake { status: u16, body: String },

    /// Interactive mode without a terminal attached
    #[error("Interactive mode requires a terminal on stdin and stdout")]
    NoTerminal,

    /// A deadline elapsed
    #[error("{what} timed out after {after:?}")]
    Timeout { what: &'static str, after: Duration },

    /// The server sent something we could not understand
    #[error("Invalid response from server: {0}")]
    Decode(String),

    /// The configured server URL cannot be used
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// A single frame write exceeded its deadline
    #[error("Write to the terminal connection timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The peer closed with a non-normal close code
    #[error("Terminal connection closed by server (code {code}): {reason}")]
    AbnormalClose { code: u16, reason: String },

    /// The connection was already closed
    #[error("Terminal connection is closed")]
    Closed,

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Control frame encoding error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local I/O error (stdin, stdout, raw mode)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Wrap a transport error together with the host it was aimed at
    pub fn network(
        host: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SessionError::Network {
            host: host.into(),
            source: Box::new(source),
        }
    }
}
