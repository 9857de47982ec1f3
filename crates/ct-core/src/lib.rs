//! ct-core: Configuration and shared types for ci-term
//!
//! This crate holds the configuration file format, the credential
//! overrides read from the environment, and the output settings the CLI
//! passes down to the session layer.

pub mod config;
pub mod error;
pub mod output;
pub mod time;

pub use config::{ClientConfig, ConfigFile, ServerConfig, TerminalConfig};
pub use error::ConfigError;
pub use output::OutputConfig;
