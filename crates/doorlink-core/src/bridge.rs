// ── Bridge facade ──
//
// Wires the supervisor, engine, and command dispatcher together behind
// the four operations the accessory layer is allowed to touch: read
// current, read target, subscribe to changes, request a transition.
// Connection state is exposed separately, for diagnostics only.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use doorlink_api::{CommandClient, DoorCommand};

use crate::config::BridgeConfig;
use crate::engine::{DoorPosition, DoorState, EngineHandle, spawn_engine};
use crate::error::CoreError;
use crate::supervisor::{ConnectionState, EspStreamSource, SupervisorSettings, spawn_supervisor};

/// A running garage-door bridge.
///
/// Construction spawns the background tasks; the handle is the only way
/// consumers interact with the door.
pub struct GarageDoorBridge {
    engine: EngineHandle,
    door_rx: watch::Receiver<DoorState>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl GarageDoorBridge {
    /// Start the bridge: spawns the door engine and the stream
    /// supervisor, which immediately begins connecting.
    pub fn start(config: &BridgeConfig) -> Result<Self, CoreError> {
        let cancel = CancellationToken::new();

        let dispatcher = CommandClient::new(&config.host, config.port, &config.transport)?;
        let engine = spawn_engine(dispatcher, config.opening_time, cancel.child_token());

        let source = EspStreamSource::new(config);
        let (state_rx, supervisor_task) = spawn_supervisor(
            source,
            SupervisorSettings::from(config),
            engine.handle.clone(),
            cancel.child_token(),
        );

        Ok(Self {
            engine: engine.handle,
            door_rx: engine.door_rx,
            state_rx,
            cancel,
            tasks: vec![engine.task, supervisor_task],
        })
    }

    // ── Accessory-facing operations ──────────────────────────────────

    /// Current (accessory-visible) door position.
    pub fn current_position(&self) -> DoorPosition {
        self.door_rx.borrow().current
    }

    /// Target door position.
    pub fn target_position(&self) -> DoorPosition {
        self.door_rx.borrow().target
    }

    /// Both positions as one consistent snapshot.
    pub fn door_state(&self) -> DoorState {
        *self.door_rx.borrow()
    }

    /// Reactive stream of door-state snapshots, yielding the present
    /// value first and then every change.
    pub fn subscribe(&self) -> WatchStream<DoorState> {
        WatchStream::new(self.door_rx.clone())
    }

    /// Request a door transition. See [`EngineHandle::request_transition`].
    pub async fn request_transition(&self, direction: DoorCommand) -> Result<bool, CoreError> {
        self.engine.request_transition(direction).await
    }

    // ── Diagnostics ──────────────────────────────────────────────────

    /// Subscribe to connection-state transitions (log-only collaborator;
    /// correctness never depends on it).
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Shut down the background tasks and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        debug!("bridge shut down");
    }
}
