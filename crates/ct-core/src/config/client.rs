//! Client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;

/// Environment variable overriding `server.url`
pub const ENV_URL: &str = "CI_TERM_URL";
/// Environment variable overriding `server.username`
pub const ENV_USER: &str = "CI_TERM_USER";
/// Environment variable overriding `server.token`
pub const ENV_TOKEN: &str = "CI_TERM_TOKEN";

/// Identity sent with HTTP Basic auth when only an access token is configured
pub const TOKEN_USERNAME: &str = "__token__";

/// On-disk configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Server endpoint and credentials
    pub server: ServerConfig,
    /// Session timing
    pub terminal: TerminalConfig,
}

/// `[server]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the CI server, e.g. `https://ci.example.com`
    pub url: Option<String>,

    /// Username for Basic auth (optional with token auth)
    pub username: Option<String>,

    /// Password or access token
    pub token: Option<String>,

    /// Path of the terminal session endpoint, relative to the base URL
    pub session_path: String,

    /// Path of the terminal WebSocket endpoint, relative to the base URL
    pub terminal_path: String,

    /// Response header that may carry the routing node identifier
    pub node_header: String,

    /// Cookie used to pin WebSocket traffic to the node holding the session
    pub node_cookie: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            token: None,
            session_path: "app/agent-terminal/session".to_string(),
            terminal_path: "app/agent-terminal/ws".to_string(),
            node_header: "X-Node-Id".to_string(),
            node_cookie: "node-id".to_string(),
        }
    }
}

/// `[terminal]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Interval between keep-alive pings on an interactive session.
    ///
    /// Must stay below the idle timeout of any load balancer between the
    /// client and the server.
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,

    /// Deadline for a single frame write
    #[serde(with = "duration_secs")]
    pub write_timeout: Duration,

    /// Deadline for the session request and the WebSocket upgrade
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Overall deadline for `exec`
    #[serde(with = "duration_secs")]
    pub exec_timeout: Duration,

    /// Pause after disabling remote echo before the command is sent
    #[serde(with = "duration_millis")]
    pub exec_settle: Duration,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            exec_timeout: Duration::from_secs(60),
            exec_settle: Duration::from_millis(500),
        }
    }
}

/// Fully resolved settings for one invocation
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL without a trailing slash
    pub base_url: String,
    /// Basic auth username
    pub username: String,
    /// Basic auth password or token
    pub token: String,
    /// Endpoint paths and routing names
    pub server: ServerConfig,
    /// Session timing
    pub terminal: TerminalConfig,
}

impl ConfigFile {
    /// Resolve against the process environment
    pub fn resolve(&self) -> Result<ClientConfig, ConfigError> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve using `lookup` for environment overrides
    pub fn resolve_with<F>(&self, lookup: F) -> Result<ClientConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |env: &str, file: &Option<String>| {
            lookup(env)
                .filter(|v| !v.is_empty())
                .or_else(|| file.clone().filter(|v| !v.is_empty()))
        };

        let base_url = pick(ENV_URL, &self.server.url)
            .ok_or(ConfigError::MissingField("server.url", ENV_URL))?;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "server.url must start with http:// or https://, got '{}'",
                base_url
            )));
        }

        let token = pick(ENV_TOKEN, &self.server.token)
            .ok_or(ConfigError::MissingField("server.token", ENV_TOKEN))?;
        let username =
            pick(ENV_USER, &self.server.username).unwrap_or_else(|| TOKEN_USERNAME.to_string());

        Ok(ClientConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            token,
            server: self.server.clone(),
            terminal: self.terminal.clone(),
        })
    }
}
