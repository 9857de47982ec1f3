//! Control frames for the terminal WebSocket
//!
//! The terminal plugin distinguishes control frames from keystrokes by
//! message kind: keystrokes arrive as binary messages, control frames as
//! JSON text messages of the shape
//!
//! ```json
//! {"command": "resize", "details": {"cols": "120", "rows": "40"}}
//! {"command": "ping", "details": {"ts": "1700000000000"}}
//! ```
//!
//! Detail values are always strings. The set of commands is closed, so the
//! frame is modelled as an enum and converted to the flat wire shape only at
//! the edge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

const CMD_RESIZE: &str = "resize";
const CMD_PING: &str = "ping";

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of columns
    pub cols: u16,
    /// Number of rows
    pub rows: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Out-of-band message multiplexed with the raw terminal stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    /// The local window changed size
    Resize(TerminalSize),
    /// Keep-alive, carrying the send time in Unix milliseconds
    Ping { ts: u64 },
}

#[derive(Serialize, Deserialize)]
struct WireFrame {
    command: String,
    #[serde(default)]
    details: BTreeMap<String, String>,
}

impl ControlFrame {
    /// Command name used as the wire discriminator
    pub fn command(&self) -> &'static str {
        match self {
            ControlFrame::Resize(_) => CMD_RESIZE,
            ControlFrame::Ping { .. } => CMD_PING,
        }
    }

    /// Encode as the JSON text carried in a WebSocket text message
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let mut details = BTreeMap::new();
        match self {
            ControlFrame::Resize(size) => {
                details.insert("cols".to_string(), size.cols.to_string());
                details.insert("rows".to_string(), size.rows.to_string());
            }
            ControlFrame::Ping { ts } => {
                details.insert("ts".to_string(), ts.to_string());
            }
        }

        let wire = WireFrame {
            command: self.command().to_string(),
            details,
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Decode from JSON text
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let wire: WireFrame = serde_json::from_str(text)?;

        match wire.command.as_str() {
            CMD_RESIZE => {
                let cols = parse_detail(&wire, "cols")?;
                let rows = parse_detail(&wire, "rows")?;
                Ok(ControlFrame::Resize(TerminalSize::new(cols, rows)))
            }
            CMD_PING => Ok(ControlFrame::Ping {
                ts: parse_detail(&wire, "ts")?,
            }),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

fn parse_detail<T: std::str::FromStr>(wire: &WireFrame, key: &str) -> Result<T, ProtocolError> {
    let value = wire
        .details
        .get(key)
        .ok_or_else(|| ProtocolError::MissingDetail {
            command: wire.command.clone(),
            key: key.to_string(),
        })?;

    value.parse().map_err(|_| ProtocolError::InvalidDetail {
        command: wire.command.clone(),
        key: key.to_string(),
        value: value.clone(),
    })
}
