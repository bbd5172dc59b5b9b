//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use doorlink_core::CoreError;

/// Exit codes for the binary.
pub mod exit_code {
    pub const CONFIG: i32 = 2;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("Invalid configuration")]
    #[diagnostic(
        code(doorlink::config),
        help("Check the config file syntax and flag values. A minimal file:\n\nhost = \"garagedoor.local\"\nport = 80")
    )]
    Config {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Could not start the bridge for {host}")]
    #[diagnostic(
        code(doorlink::connection),
        help("Check that the device is powered and reachable:\n  curl http://{host}/events")
    )]
    BridgeFailed {
        host: String,
        #[source]
        source: CoreError,
    },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => exit_code::CONFIG,
            Self::BridgeFailed { .. } => exit_code::CONNECTION,
        }
    }
}
