mod cli;
mod config;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use doorlink_core::{ConnectionState, DoorState, GarageDoorBridge};

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn,doorlink=info",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let file = config::load(cli.config.as_deref())?;
    let bridge_config = config::build_bridge_config(&file, &cli);
    let host = bridge_config.host.clone();

    tracing::info!(host = %host, port = bridge_config.port, "starting bridge");

    let bridge = GarageDoorBridge::start(&bridge_config)
        .map_err(|source| CliError::BridgeFailed {
            host: host.clone(),
            source,
        })?;

    watch_until_interrupted(&bridge).await;

    tracing::info!("shutting down");
    bridge.shutdown().await;
    Ok(())
}

/// Print door and connectivity transitions until Ctrl-C.
async fn watch_until_interrupted(bridge: &GarageDoorBridge) {
    let mut door_rx = bridge.subscribe();
    let mut state_rx = bridge.connection_state();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state: ConnectionState = *state_rx.borrow_and_update();
                tracing::info!(?state, "connection");
            }

            snapshot = tokio_stream::StreamExt::next(&mut door_rx) => {
                let Some(DoorState { current, target }) = snapshot else {
                    break;
                };
                tracing::info!(?current, ?target, "door");
            }
        }
    }
}
