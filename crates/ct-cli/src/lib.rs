//! ci-term: Command-line interface for remote CI agent terminals
//!
//! Provides the `ci-term` binary: interactive terminals, one-shot command
//! execution and configuration management.

pub mod commands;
pub mod output;
