// ── Core error types ──
//
// User-facing errors from doorlink-core. Consumers never see reqwest
// errors or JSON parse failures directly -- the `From<doorlink_api::Error>`
// impl translates wire-layer errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to device at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Event stream lost: {reason}")]
    StreamLost { reason: String },

    // ── Command errors ───────────────────────────────────────────────
    /// A transition was requested before any device state event was
    /// observed, so the command endpoint cannot be addressed yet.
    #[error("Device identity unknown -- no state event observed yet")]
    DeviceUnknown,

    #[error("Command dispatch failed: {message}")]
    CommandFailed { message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    /// The bridge's background tasks have shut down.
    #[error("Bridge is shut down")]
    BridgeShutDown,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<doorlink_api::Error> for CoreError {
    fn from(err: doorlink_api::Error) -> Self {
        match err {
            doorlink_api::Error::Transport(ref e) => {
                if e.is_connect() || e.is_timeout() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map(ToString::to_string)
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::CommandFailed {
                        message: e.to_string(),
                    }
                }
            }
            doorlink_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
