//! ct-session: Remote terminal sessions to CI agents
//!
//! A session goes through three steps:
//!
//! 1. [`Client::negotiate`] asks the server's terminal plugin for a one-time
//!    session token and the identifier of the node holding the agent link.
//! 2. [`Client::connect`] upgrades to a WebSocket, pinned to that node.
//! 3. The resulting [`Connection`] is driven either interactively by
//!    [`run_interactive`] or for a single command by [`run_exec`].

pub mod client;
pub mod connection;
pub mod error;
pub mod exec;
pub mod pump;
pub mod terminal;

pub use client::{Client, Session};
pub use connection::Connection;
pub use error::SessionError;
pub use exec::{run_exec, write_output, ExecOptions};
pub use pump::{run_interactive, Outcome, PumpOptions};
pub use terminal::{CrosstermTerminal, RawModeGuard, RawTerminal};
