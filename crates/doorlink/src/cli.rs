//! Command-line definition for the `doorlink` binary.

use std::path::PathBuf;

use clap::Parser;

/// Bridge an ESPHome-style garage door controller into a smart-home
/// accessory model.
#[derive(Debug, Parser)]
#[command(name = "doorlink", version, about)]
pub struct Cli {
    /// Device hostname or IP (overrides the config file).
    #[arg(long, env = "DOORLINK_HOST")]
    pub host: Option<String>,

    /// Device HTTP port.
    #[arg(long, env = "DOORLINK_PORT")]
    pub port: Option<u16>,

    /// Worst-case door travel time in seconds (optimistic-settle deadline).
    #[arg(long, value_name = "SECONDS")]
    pub opening_time: Option<u64>,

    /// Debounce window for device state events, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub debounce_ms: Option<u64>,

    /// Heartbeat silence tolerated before reconnecting, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub liveness_timeout_ms: Option<u64>,

    /// Delay between reconnect attempts, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub retry_backoff_ms: Option<u64>,

    /// Reconnect attempts before giving up (omit to retry forever).
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Path to a TOML config file (default: the platform config dir).
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
