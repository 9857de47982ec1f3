//! ct-protocol: Wire vocabulary for ci-term terminal sessions
//!
//! A terminal session rides on a single WebSocket. Raw terminal bytes travel
//! as binary messages, control frames (resize, ping) travel as JSON text
//! messages, and the exec mode synthesizes command framing with sentinel
//! echoes. This crate holds the pieces of that protocol that do no I/O.

pub mod error;
pub mod exec;
pub mod message;

pub use error::ProtocolError;
pub use exec::{exec_payload, generate_marker, MarkerScanner, DISABLE_ECHO};
pub use message::{ControlFrame, TerminalSize};
