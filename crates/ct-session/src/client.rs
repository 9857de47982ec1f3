//! Session negotiation and WebSocket establishment
//!
//! Opening a terminal takes two round trips:
//!
//! 1. `GET <base>/<session_path>?id=<agent>` with Basic auth returns
//!    `{"token": "...", "nodeId": "..."}`. The node id may instead arrive in
//!    a response header. Cookies set by the server land in the client's jar.
//! 2. `GET <ws-base>/<terminal_path>/<token>?cols=<c>&rows=<r>` upgraded to a
//!    WebSocket, carrying `Origin`, the jar's cookies and a node-affinity
//!    cookie so a multi-node server routes the socket to the node that owns
//!    the agent link.

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE, ORIGIN};
use tokio_tungstenite::tungstenite::{self, Error as WsError};
use url::Url;

use ct_core::ClientConfig;
use ct_protocol::TerminalSize;

use crate::connection::Connection;
use crate::error::SessionError;

/// One-time credentials for a terminal WebSocket
///
/// Consumed by [`Client::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Opaque session token, embedded in the WebSocket path
    pub token: String,
    /// Node holding the agent link; empty when the server did not say
    pub node_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    node_id: Option<String>,
}

/// Factory for sessions and connections against one server
pub struct Client {
    config: ClientConfig,
    base_url: Url,
    http: reqwest::Client,
    jar: Arc<Jar>,
}

impl Client {
    /// Create a client for the configured server
    pub fn new(config: ClientConfig) -> Result<Self, SessionError> {
        // A trailing slash makes relative joins keep any path prefix
        let base_url = Url::parse(&format!("{}/", config.base_url.trim_end_matches('/')))
            .map_err(|e| SessionError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;

        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(config.terminal.connect_timeout)
            .user_agent(concat!("ci-term/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SessionError::network(host_of(&base_url), e))?;

        Ok(Self {
            config,
            base_url,
            http,
            jar,
        })
    }

    /// The resolved configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Ask the server for a terminal session on `agent_id`
    pub async fn negotiate(&self, agent_id: &str) -> Result<Session, SessionError> {
        let mut url = self.endpoint(&self.config.server.session_path)?;
        url.query_pairs_mut().append_pair("id", agent_id);

        tracing::debug!(agent_id, url = %url, "Requesting terminal session");

        let response = self
            .http
            .get(url.clone())
            .basic_auth(&self.config.username, Some(&self.config.token))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| SessionError::network(host_of(&self.base_url), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), agent_id, url.as_str(), body));
        }

        let header_node = response
            .headers()
            .get(self.config.server.node_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body: SessionResponse = response
            .json()
            .await
            .map_err(|e| SessionError::Decode(format!("session response: {}", e)))?;

        if body.token.is_empty() {
            return Err(SessionError::Decode(
                "session response did not contain a token".to_string(),
            ));
        }

        let node_id = body
            .node_id
            .filter(|id| !id.is_empty())
            .or(header_node)
            .unwrap_or_default();

        if node_id.is_empty() {
            tracing::debug!(agent_id, "Server did not report a node id, skipping node pinning");
        }

        Ok(Session {
            token: body.token,
            node_id,
        })
    }

    /// Upgrade to the terminal WebSocket for `session`
    ///
    /// `size` is the local terminal size at connect time; later changes are
    /// sent as resize control frames.
    pub async fn connect(
        &self,
        session: Session,
        size: TerminalSize,
    ) -> Result<Connection, SessionError> {
        let url = self.terminal_url(&session.token, size)?;
        let mut request = url.as_str().into_client_request()?;

        let headers = request.headers_mut();
        headers.insert(ORIGIN, header_value(&self.config.base_url)?);
        if let Some(cookie) = self.cookie_header(&url, &session.node_id) {
            headers.insert(COOKIE, header_value(&cookie)?);
        }

        tracing::debug!(
            cols = size.cols,
            rows = size.rows,
            node_id = %session.node_id,
            "Opening terminal connection"
        );

        let timeout = self.config.terminal.connect_timeout;
        let (socket, response) =
            tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| SessionError::Timeout {
                    what: "terminal connection",
                    after: timeout,
                })?
                .map_err(|e| self.handshake_error(e))?;

        tracing::debug!(status = %response.status(), "Terminal connection established");

        Ok(Connection::from_socket(
            socket,
            self.config.terminal.write_timeout,
        ))
    }

    /// Negotiate and connect in one step
    pub async fn open(
        &self,
        agent_id: &str,
        size: TerminalSize,
    ) -> Result<Connection, SessionError> {
        let session = self.negotiate(agent_id).await?;
        self.connect(session, size).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, SessionError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| SessionError::InvalidUrl(format!("{}: {}", path, e)))
    }

    /// WebSocket URL for a session token
    pub fn terminal_url(&self, token: &str, size: TerminalSize) -> Result<Url, SessionError> {
        let mut url = self.endpoint(&self.config.server.terminal_path)?;

        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| SessionError::InvalidUrl(url.to_string()))?;

        let display = url.to_string();
        url.path_segments_mut()
            .map_err(|_| SessionError::InvalidUrl(display))?
            .pop_if_empty()
            .push(token);

        url.query_pairs_mut()
            .append_pair("cols", &size.cols.to_string())
            .append_pair("rows", &size.rows.to_string());

        Ok(url)
    }

    /// Cookie header for the WebSocket upgrade to `url`
    fn cookie_header(&self, url: &Url, node_id: &str) -> Option<String> {
        let mut cookies = Vec::new();

        // The jar matches cookies against http(s) URLs only
        let mut http_url = url.clone();
        let scheme = if url.scheme() == "wss" { "https" } else { "http" };
        if http_url.set_scheme(scheme).is_err() {
            tracing::debug!(url = %url, "Cannot map terminal URL for cookie lookup");
        }

        if let Some(stored) = self.jar.cookies(&http_url) {
            if let Ok(stored) = stored.to_str() {
                cookies.push(stored.to_string());
            }
        }
        if !node_id.is_empty() {
            cookies.push(format!("{}={}", self.config.server.node_cookie, node_id));
        }

        if cookies.is_empty() {
            None
        } else {
            Some(cookies.join("; "))
        }
    }

    fn handshake_error(&self, err: WsError) -> SessionError {
        match err {
            tungstenite::Error::Http(response) => {
                let body = response
                    .body()
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                match response.status().as_u16() {
                    401 => SessionError::Authentication,
                    status => SessionError::Handshake { status, body },
                }
            }
            other => SessionError::network(host_of(&self.base_url), other),
        }
    }
}

fn classify_status(status: u16, agent_id: &str, url: &str, body: String) -> SessionError {
    match StatusCode::from_u16(status) {
        Ok(StatusCode::UNAUTHORIZED) => SessionError::Authentication,
        Ok(StatusCode::FORBIDDEN) => SessionError::Permission {
            agent: agent_id.to_string(),
        },
        _ => SessionError::PluginUnavailable {
            url: url.to_string(),
            status,
            body,
        },
    }
}

fn header_value(value: &str) -> Result<HeaderValue, SessionError> {
    HeaderValue::from_str(value)
        .map_err(|e| SessionError::Decode(format!("invalid header value: {}", e)))
}

fn host_of(url: &Url) -> String {
    match (url.host_str(), url.port_or_known_default()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        _ => url.to_string(),
    }
}
