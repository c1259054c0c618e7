//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Capture live-stream ingest credentials and hand them to a broadcaster.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "livekey")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to livekey.toml or config/livekey.toml).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List capture interfaces, marking the ones that would be used.
    Interfaces,
    /// Capture until the server URL and stream key are found.
    Capture(CaptureArgs),
    /// Run the whole go-live sequence.
    GoLive(GoLiveArgs),
    /// Write a server URL and stream key into the broadcaster settings.
    WriteSettings(WriteSettingsArgs),
}

/// Arguments for the capture command.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct CaptureArgs {
    /// Give up after this many seconds. Runs until Ctrl+C when omitted.
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Read TCP payloads from a file, one per line, instead of the network.
    #[arg(long)]
    pub replay: Option<PathBuf>,
}

/// Arguments for the go-live command.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct GoLiveArgs {
    /// Kill a running broadcaster before writing its settings.
    #[arg(long)]
    pub terminate_running: bool,
}

/// Arguments for the write-settings command.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct WriteSettingsArgs {
    /// Ingest server URL (rtmp:// or rtmps://).
    #[arg(long)]
    pub server: String,

    /// Stream key.
    #[arg(long)]
    pub key: String,

    /// Settings file, defaults to the configured broadcaster settings path.
    #[arg(long)]
    pub path: Option<PathBuf>,
}
