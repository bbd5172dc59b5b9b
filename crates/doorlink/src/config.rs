//! CLI-owned configuration: TOML file + environment + flag overrides,
//! merged into a `doorlink_core::BridgeConfig`.
//!
//! Core never sees these types -- it receives a pre-built `BridgeConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use doorlink_core::BridgeConfig;

use crate::cli::Cli;
use crate::error::CliError;

/// On-disk configuration. Every field optional; defaults come from
/// `BridgeConfig::default()`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub opening_time_secs: Option<u64>,
    pub debounce_ms: Option<u64>,
    pub liveness_timeout_ms: Option<u64>,
    pub retry_backoff_ms: Option<u64>,
    pub max_retries: Option<u32>,
}

/// Default config file location: `{platform config dir}/doorlink/config.toml`.
fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "doorlink").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load the file + env layers. A missing file is fine; a malformed one
/// is a hard error.
pub fn load(explicit_path: Option<&Path>) -> Result<FileConfig, CliError> {
    let mut figment = Figment::new().merge(Serialized::defaults(FileConfig::default()));

    let path = explicit_path.map(Path::to_path_buf).or_else(default_config_path);
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }

    figment
        .merge(Env::prefixed("DOORLINK_"))
        .extract()
        .map_err(|e| CliError::Config {
            source: Box::new(e),
        })
}

/// Apply CLI flag overrides on top of the file config and produce the
/// bridge configuration.
pub fn build_bridge_config(file: &FileConfig, cli: &Cli) -> BridgeConfig {
    let defaults = BridgeConfig::default();

    let secs = Duration::from_secs;
    let millis = Duration::from_millis;

    BridgeConfig {
        host: cli
            .host
            .clone()
            .or_else(|| file.host.clone())
            .unwrap_or(defaults.host),
        port: cli.port.or(file.port).unwrap_or(defaults.port),
        opening_time: cli
            .opening_time
            .or(file.opening_time_secs)
            .map_or(defaults.opening_time, secs),
        debounce: cli
            .debounce_ms
            .or(file.debounce_ms)
            .map_or(defaults.debounce, millis),
        liveness_timeout: cli
            .liveness_timeout_ms
            .or(file.liveness_timeout_ms)
            .map_or(defaults.liveness_timeout, millis),
        retry_backoff: cli
            .retry_backoff_ms
            .or(file.retry_backoff_ms)
            .map_or(defaults.retry_backoff, millis),
        max_retries: cli.max_retries.or(file.max_retries),
        transport: defaults.transport,
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn flags_override_file_values() {
        let file = FileConfig {
            host: Some("from-file.local".into()),
            port: Some(8080),
            ..FileConfig::default()
        };
        let cli = Cli::parse_from(["doorlink", "--host", "from-flag.local"]);

        let config = build_bridge_config(&file, &cli);
        assert_eq!(config.host, "from-flag.local");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn defaults_fill_everything_else() {
        let cli = Cli::parse_from(["doorlink"]);
        let config = build_bridge_config(&FileConfig::default(), &cli);

        assert_eq!(config.port, 80);
        assert_eq!(config.opening_time, Duration::from_secs(30));
        assert_eq!(config.debounce, Duration::from_millis(500));
        assert_eq!(config.liveness_timeout, Duration::from_secs(20));
        assert_eq!(config.retry_backoff, Duration::from_secs(5));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn duration_flags_are_converted() {
        let cli = Cli::parse_from([
            "doorlink",
            "--opening-time",
            "12",
            "--debounce-ms",
            "250",
            "--max-retries",
            "4",
        ]);
        let config = build_bridge_config(&FileConfig::default(), &cli);

        assert_eq!(config.opening_time, Duration::from_secs(12));
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.max_retries, Some(4));
    }
}
