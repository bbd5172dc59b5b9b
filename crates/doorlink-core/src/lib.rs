// doorlink-core: Connection supervision and door-state reconciliation
// between doorlink-api and consumers (CLI, accessory adapters).

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::GarageDoorBridge;
pub use config::BridgeConfig;
pub use engine::{Dispatcher, DoorPosition, DoorState, EngineHandle};
pub use error::CoreError;
pub use supervisor::{
    ConnectionState, EspStreamSource, EventStream, StreamSource, SupervisorSettings,
};

// Re-export the wire types consumers touch directly.
pub use doorlink_api::{DeviceEvent, DeviceId, DoorCommand, StreamEvent};
