// doorlink-api: Async HTTP client for ESPHome-style garage door controllers

pub mod command;
pub mod error;
pub mod event;
pub mod sse;
pub mod transport;

pub use command::{CommandClient, DoorCommand};
pub use error::Error;
pub use event::{DeviceEvent, DeviceId, ReportedOperation, ReportedState, StreamEvent};
pub use sse::EventSource;
pub use transport::TransportConfig;
