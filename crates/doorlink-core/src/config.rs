// ── Runtime bridge configuration ──
//
// Describes how to reach one garage-door device and how patient the
// bridge should be with it. The CLI constructs a `BridgeConfig` and
// hands it in -- core never reads config files.

use std::time::Duration;

use doorlink_api::TransportConfig;

/// Configuration for bridging a single garage-door device.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Device hostname or IP.
    pub host: String,
    /// Device HTTP port.
    pub port: u16,
    /// Worst-case door travel time. The optimistic-settle deadline: if
    /// the device never confirms, current state snaps to the target
    /// after exactly this long.
    pub opening_time: Duration,
    /// Coalescing window for bursty device state events; only the last
    /// event in a burst is applied.
    pub debounce: Duration,
    /// Maximum heartbeat silence before the stream is declared dead.
    pub liveness_timeout: Duration,
    /// Fixed delay between reconnect attempts.
    pub retry_backoff: Duration,
    /// Reconnect attempts before parking in `Disconnected`.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
    /// Transport tuning shared by the stream and command clients.
    pub transport: TransportConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "garagedoor.local".into(),
            port: 80,
            opening_time: Duration::from_secs(30),
            debounce: Duration::from_millis(500),
            liveness_timeout: Duration::from_secs(20),
            retry_backoff: Duration::from_secs(5),
            max_retries: None,
            transport: TransportConfig::default(),
        }
    }
}
