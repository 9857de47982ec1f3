//! CLI command implementations

mod config;
mod exec;
mod term;

pub use config::{config_get, config_init, config_path, config_set, config_show};
pub use exec::{exec_command, join_command};
pub use term::term_command;
