//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Game-network proxy: one public address in front of many backend
/// servers.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file. Created with defaults if it does not exist.
    #[arg(short, long, default_value = "switchyard.toml")]
    pub config: PathBuf,

    /// Override the listen address, e.g. "0.0.0.0:25565".
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Override the extension directory.
    #[arg(short, long)]
    pub plugins: Option<PathBuf>,

    /// Override the log filter (trace, debug, info, warn, error, or an
    /// EnvFilter directive).
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}
