//! Clap derive structures for the `pvstream` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// pvstream -- control system channels as merged event streams
#[derive(Debug, Parser)]
#[command(
    name = "pvstream",
    version,
    about = "Stream control system channels as merged JSON event sequences",
    long_about = "Runs the pvstream gateway against a simulated control system.\n\n\
        A stream definition names the channels of interest; the gateway\n\
        subscribes on its behalf and prints heartbeats, metadata, initial,\n\
        changed and polled values as one JSON object per line.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, env = "PVSTREAM_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a stream and print its events until interrupted
    Watch(WatchArgs),

    /// Inspect configuration
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stream definition as JSON, or @path to read it from a file
    #[arg(value_name = "CONFIG_JSON")]
    pub stream: String,

    /// Stop after this many seconds
    #[arg(long, short = 'd', value_name = "SECS")]
    pub duration: Option<u64>,

    /// Period of simulated monitor updates
    #[arg(long, value_name = "MS", default_value = "500")]
    pub simulate_period_ms: u64,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,

    /// Print the configuration file path
    Path,
}
