//! CLI tool for the ring communication layer.
//!
//! Provides commands for:
//! - Serving a local node on any transport
//! - Pinging and routing through a remote node
//! - Storing and retrieving entries on a remote node

pub mod commands;
pub mod config;
pub mod logging;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
pub use logging::LogLevel;
