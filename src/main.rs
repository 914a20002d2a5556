mod cli;
mod config;
mod context;
mod db;
mod embedding;
mod engine;
mod memory;
mod project;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cortex", version, about = "Persistent rank-aware memory for AI coding assistants")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server on stdio (the default)
    Serve,
    /// Print the active memories as a versioned JSON bundle
    Export,
    /// Import a bundle file produced by export
    Import { path: PathBuf },
    /// Print store statistics
    Stats,
    /// Check database health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::CortexConfig::load()?;

    init_tracing(&config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve_stdio(config).await?,
        Command::Export => cli::export(&config)?,
        Command::Import { path } => cli::import(&config, &path)?,
        Command::Stats => cli::show_stats(&config)?,
        Command::Doctor => cli::doctor(&config)?,
    }

    Ok(())
}

/// Logs go to stderr so stdout stays clean for JSON-RPC frames. With
/// CORTEX_DEBUG=1 every line is also appended to ./cortex.log.
fn init_tracing(config: &config::CortexConfig) {
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config::CortexConfig::debug_log_enabled() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(DebugTee::make)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Writer that tees stderr into ./cortex.log.
struct DebugTee {
    file: Option<std::fs::File>,
}

impl DebugTee {
    fn make() -> Self {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open("cortex.log")
            .ok();
        Self { file }
    }
}

impl std::io::Write for DebugTee {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(file) = self.file.as_mut() {
            let _ = file.write_all(buf);
        }
        std::io::stderr().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
        std::io::stderr().flush()
    }
}
