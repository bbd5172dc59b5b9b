// Command dispatch client
//
// Fire-and-forget HTTP commands against the device's cover endpoint:
// `POST /{template_name}/{template_id}/{open|close}`. The device answers
// with a bare status code; any 2xx counts as accepted. There is no
// rollback path here -- the door engine's deadline governs settlement
// whether or not the request landed.

use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::event::DeviceId;
use crate::transport::TransportConfig;

/// Direction of a requested door transition, as spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorCommand {
    Open,
    Close,
}

impl DoorCommand {
    /// Final path segment of the command endpoint.
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
        }
    }
}

/// HTTP client for the device's command endpoint.
pub struct CommandClient {
    http: reqwest::Client,
    base_url: Url,
}

impl CommandClient {
    /// Create a command client for one device.
    pub fn new(host: &str, port: u16, transport: &TransportConfig) -> Result<Self, Error> {
        let base_url = Url::parse(&format!("http://{host}:{port}"))?;
        let http = transport.build_command_client()?;
        Ok(Self { http, base_url })
    }

    /// Issue a single open/close request.
    ///
    /// `Ok(true)` on an HTTP success status, `Ok(false)` when the device
    /// rejects the command. Network failures surface as `Err` so callers
    /// can distinguish "device said no" from "device unreachable".
    pub async fn send(&self, device: &DeviceId, command: DoorCommand) -> Result<bool, Error> {
        let url = self.command_url(device, command)?;
        debug!("POST {url}");

        let response = self.http.post(url).send().await?;
        let accepted = response.status().is_success();
        if !accepted {
            warn!(status = %response.status(), device = %device, "device rejected command");
        }
        Ok(accepted)
    }

    fn command_url(&self, device: &DeviceId, command: DoorCommand) -> Result<Url, Error> {
        let path = format!(
            "{}/{}/{}",
            device.template_name,
            device.template_id,
            command.endpoint()
        );
        self.base_url.join(&path).map_err(Error::InvalidUrl)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
