// Shared transport configuration for building reqwest::Client instances.
//
// The stream and command clients need different timeout shapes: commands
// are bounded request/response calls, while the event stream response is
// open-ended and must only bound the connect phase.

use std::time::Duration;

use crate::error::Error;

const USER_AGENT: &str = concat!("doorlink/", env!("CARGO_PKG_VERSION"));

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// TCP connect timeout for both client kinds.
    pub connect_timeout: Duration,
    /// Overall timeout for request/response calls (commands only).
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build a client for bounded request/response calls.
    pub fn build_command_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(Error::Transport)
    }

    /// Build a client for the long-lived event stream.
    ///
    /// Deliberately no overall request timeout -- the response body stays
    /// open for the lifetime of the connection. Liveness is enforced by
    /// the consumer through heartbeats, not by the transport.
    pub fn build_stream_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(Error::Transport)
    }
}
