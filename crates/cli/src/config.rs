//! Command-line configuration.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use transport::{Endpoints, TransportConfig};

use crate::commands::Command;
use crate::logging::{init_logging, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "chordcom",
    version,
    about = "Talk to ring nodes over local, socket or RPC transports"
)]
pub struct CliConfig {
    /// Log verbosity; `RUST_LOG` overrides it.
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    pub log_level: LogLevel,

    /// JSON file with transport timeouts and limits.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    pub fn transport_config(&self) -> anyhow::Result<TransportConfig> {
        let Some(path) = &self.config else {
            return Ok(TransportConfig::default());
        };
        let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn run(self) -> anyhow::Result<()> {
        init_logging(self.log_level);
        let registry = Endpoints::new(self.transport_config()?);
        let result = self.command.execute(&registry)?;
        println!("{result}");
        Ok(())
    }
}
