//! sshmux CLI
//!
//! Subcommand implementations and terminal output helpers for the
//! `sshmux` binary.

pub mod commands;
pub mod logging;
pub mod output;
