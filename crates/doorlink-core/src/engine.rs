// ── Door state engine ──
//
// The single authority for accessory-visible door position and the one
// in-flight command. Runs as a task: requests, device events, and the
// settle deadline all arrive through one dispatch loop, so state has
// exactly one writer and no locks.
//
// Reconciliation rules:
// * Commands apply an optimistic Opening/Closing transition immediately
//   and arm a deadline; if the device never confirms, the deadline
//   settles current = target (bounded worst-case time to a terminal
//   state).
// * A new command supersedes the pending one -- last command wins, the
//   prior deadline is cancelled.
// * While a command is pending, only a device-reported CLOSED pre-empts
//   the deadline (a premature OPEN report must not jump ahead of the
//   actual travel time).
// * With no command pending, a device report is an externally-originated
//   change (wall button, remote) and is adopted as-is.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use doorlink_api::{CommandClient, DeviceEvent, DeviceId, DoorCommand, ReportedState};

use crate::error::CoreError;

const ENGINE_MAILBOX_SIZE: usize = 64;

// ── DoorPosition ─────────────────────────────────────────────────────

/// Accessory-visible door position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DoorPosition {
    Closed,
    Open,
    Opening,
    Closing,
    /// Nothing reconciled yet. The only valid initial value.
    #[default]
    Unknown,
}

/// Terminal position a command is driving towards.
fn terminal_position(direction: DoorCommand) -> DoorPosition {
    match direction {
        DoorCommand::Open => DoorPosition::Open,
        DoorCommand::Close => DoorPosition::Closed,
    }
}

/// In-travel position shown while a command is pending.
fn travel_position(direction: DoorCommand) -> DoorPosition {
    match direction {
        DoorCommand::Open => DoorPosition::Opening,
        DoorCommand::Close => DoorPosition::Closing,
    }
}

// ── DoorState ────────────────────────────────────────────────────────

/// Snapshot of the accessory-visible state, published on a watch channel
/// so current and target always change together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoorState {
    pub current: DoorPosition,
    pub target: DoorPosition,
}

impl DoorState {
    fn settled(position: DoorPosition) -> Self {
        Self {
            current: position,
            target: position,
        }
    }
}

// ── PendingCommand ───────────────────────────────────────────────────

/// The one in-flight transition. Owned exclusively by the engine task;
/// destroyed on confirmation, supersession, or deadline expiry.
#[derive(Debug)]
struct PendingCommand {
    direction: DoorCommand,
    issued_at: Instant,
    deadline: Instant,
}

// ── Dispatcher ───────────────────────────────────────────────────────

/// Outbound command capability.
///
/// Production posts to the device over HTTP; tests record calls. The
/// engine treats dispatch as fire-and-forget: failure is reported to the
/// caller but never rolls back the optimistic transition.
pub trait Dispatcher: Send + Sync + 'static {
    fn send(
        &self,
        device: &DeviceId,
        direction: DoorCommand,
    ) -> impl Future<Output = Result<bool, doorlink_api::Error>> + Send;
}

impl Dispatcher for CommandClient {
    async fn send(
        &self,
        device: &DeviceId,
        direction: DoorCommand,
    ) -> Result<bool, doorlink_api::Error> {
        CommandClient::send(self, device, direction).await
    }
}

// ── Mailbox ──────────────────────────────────────────────────────────

pub(crate) enum EngineMsg {
    Request {
        direction: DoorCommand,
        reply: oneshot::Sender<Result<bool, CoreError>>,
    },
    DeviceEvent {
        event: DeviceEvent,
        /// Whether the stream was live when the event was applied.
        /// Non-live events only update identity bookkeeping.
        live: bool,
    },
}

/// Cloneable mailbox for the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineMsg>,
}

impl EngineHandle {
    /// Request a door transition.
    ///
    /// Rejected with [`CoreError::DeviceUnknown`] until the first device
    /// event has been observed. On acceptance the optimistic transition
    /// is applied and the dispatch outcome is returned as `Ok(bool)`.
    pub async fn request_transition(&self, direction: DoorCommand) -> Result<bool, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineMsg::Request { direction, reply })
            .await
            .map_err(|_| CoreError::BridgeShutDown)?;
        rx.await.map_err(|_| CoreError::BridgeShutDown)?
    }

    /// Feed a (debounced) device event into the engine.
    pub(crate) async fn device_event(&self, event: DeviceEvent, live: bool) {
        // A send failure means the engine is shutting down; the event is
        // moot at that point.
        let _ = self.tx.send(EngineMsg::DeviceEvent { event, live }).await;
    }
}

/// Detached mailbox pair for driving supervisor tests without a full
/// engine task behind it.
#[cfg(test)]
pub(crate) fn test_handle() -> (EngineHandle, mpsc::Receiver<EngineMsg>) {
    let (tx, rx) = mpsc::channel(ENGINE_MAILBOX_SIZE);
    (EngineHandle { tx }, rx)
}

// ── Engine task ──────────────────────────────────────────────────────

pub(crate) struct EngineParts {
    pub handle: EngineHandle,
    pub door_rx: watch::Receiver<DoorState>,
    pub task: JoinHandle<()>,
}

/// Spawn the engine task.
pub(crate) fn spawn_engine<D: Dispatcher>(
    dispatcher: D,
    opening_time: Duration,
    cancel: CancellationToken,
) -> EngineParts {
    let (tx, rx) = mpsc::channel(ENGINE_MAILBOX_SIZE);
    let (door_tx, door_rx) = watch::channel(DoorState::default());
    let task = tokio::spawn(engine_task(rx, dispatcher, opening_time, door_tx, cancel));
    EngineParts {
        handle: EngineHandle { tx },
        door_rx,
        task,
    }
}

async fn engine_task<D: Dispatcher>(
    mut rx: mpsc::Receiver<EngineMsg>,
    dispatcher: D,
    opening_time: Duration,
    door_tx: watch::Sender<DoorState>,
    cancel: CancellationToken,
) {
    let mut pending: Option<PendingCommand> = None;
    let mut device_id: Option<DeviceId> = None;

    loop {
        // Invariant: at most one deadline timer exists, and it exists
        // exactly while a command is pending.
        let deadline = pending.as_ref().map(|p| p.deadline);

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,

            () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(p) = pending.take() {
                    let settled = terminal_position(p.direction);
                    debug!(
                        position = ?settled,
                        waited_secs = p.issued_at.elapsed().as_secs(),
                        "no confirmation before deadline, settling optimistically"
                    );
                    let _ = door_tx.send(DoorState::settled(settled));
                }
            }

            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                match msg {
                    EngineMsg::Request { direction, reply } => {
                        let result = handle_request(
                            direction,
                            &dispatcher,
                            device_id.as_ref(),
                            &mut pending,
                            opening_time,
                            &door_tx,
                        )
                        .await;
                        let _ = reply.send(result);
                    }
                    EngineMsg::DeviceEvent { event, live } => {
                        handle_device_event(event, live, &mut device_id, &mut pending, &door_tx);
                    }
                }
            }
        }
    }

    debug!("engine task exiting");
}

async fn handle_request<D: Dispatcher>(
    direction: DoorCommand,
    dispatcher: &D,
    device_id: Option<&DeviceId>,
    pending: &mut Option<PendingCommand>,
    opening_time: Duration,
    door_tx: &watch::Sender<DoorState>,
) -> Result<bool, CoreError> {
    let Some(id) = device_id else {
        warn!("transition requested before any device event; rejecting");
        return Err(CoreError::DeviceUnknown);
    };

    // Last command wins: drop the prior pending command and its deadline.
    if let Some(superseded) = pending.take() {
        debug!(prior = ?superseded.direction, "superseding pending command");
    }

    let now = Instant::now();
    *pending = Some(PendingCommand {
        direction,
        issued_at: now,
        deadline: now + opening_time,
    });

    let _ = door_tx.send(DoorState {
        current: travel_position(direction),
        target: terminal_position(direction),
    });

    // Fire-and-forget dispatch: a failed request does not roll back the
    // optimistic transition; the deadline still settles the state.
    match dispatcher.send(id, direction).await {
        Ok(accepted) => Ok(accepted),
        Err(e) => {
            warn!(error = %e, "command dispatch failed");
            Ok(false)
        }
    }
}

fn handle_device_event(
    event: DeviceEvent,
    live: bool,
    device_id: &mut Option<DeviceId>,
    pending: &mut Option<PendingCommand>,
    door_tx: &watch::Sender<DoorState>,
) {
    // Identity extraction happens in every connection state; it is what
    // unlocks the command endpoint.
    match event.device_id() {
        Some(id) => {
            if device_id.as_ref() != Some(&id) {
                info!(device = %id, "device identity learned");
            }
            *device_id = Some(id);
        }
        None => warn!(raw = %event.id, "state event with unparseable id"),
    }

    if !live {
        // Stale telemetry during (re)connect must not flicker the
        // accessory-visible state.
        debug!("stream not live, state report used for bookkeeping only");
        return;
    }

    let reported = match event.state {
        ReportedState::Closed => DoorPosition::Closed,
        ReportedState::Open => DoorPosition::Open,
    };

    match pending {
        None => {
            // Externally originated (wall button, remote): adopt as-is.
            debug!(position = ?reported, operation = ?event.current_operation, "external state change");
            let _ = door_tx.send(DoorState::settled(reported));
        }
        Some(p) if reported == DoorPosition::Closed => {
            // A reported CLOSED is authoritative and immediate: cancel
            // the pending command and its deadline.
            debug!(pending = ?p.direction, "device reported CLOSED, pre-empting deadline");
            *pending = None;
            let _ = door_tx.send(DoorState::settled(DoorPosition::Closed));
        }
        Some(_) => {
            // The deadline owns the Opening -> Open transition; an early
            // OPEN report would jump ahead of the physical travel time.
            debug!("ignoring OPEN report while a command is pending");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use doorlink_api::ReportedOperation;
    use pretty_assertions::assert_eq;

    use super::*;

    const OPENING_TIME: Duration = Duration::from_secs(30);

    // Records every dispatched command; outcome is scripted.
    #[derive(Clone, Default)]
    struct RecordingDispatcher {
        calls: Arc<Mutex<Vec<(DeviceId, DoorCommand)>>>,
        reject: bool,
    }

    impl RecordingDispatcher {
        fn rejecting() -> Self {
            Self {
                reject: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<(DeviceId, DoorCommand)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Dispatcher for RecordingDispatcher {
        async fn send(
            &self,
            device: &DeviceId,
            direction: DoorCommand,
        ) -> Result<bool, doorlink_api::Error> {
            self.calls.lock().unwrap().push((device.clone(), direction));
            Ok(!self.reject)
        }
    }

    fn state_event(state: ReportedState) -> DeviceEvent {
        DeviceEvent {
            id: "cover-garage_door".into(),
            state,
            value: match state {
                ReportedState::Closed => 0.0,
                ReportedState::Open => 1.0,
            },
            current_operation: ReportedOperation::Idle,
        }
    }

    fn spawn_test_engine(dispatcher: RecordingDispatcher) -> EngineParts {
        spawn_engine(dispatcher, OPENING_TIME, CancellationToken::new())
    }

    /// Let the paused runtime drain every runnable task, then nudge the
    /// clock forward by a millisecond.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn door(parts: &EngineParts) -> DoorState {
        *parts.door_rx.borrow()
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_transition_before_device_is_known() {
        let dispatcher = RecordingDispatcher::default();
        let parts = spawn_test_engine(dispatcher.clone());

        let result = parts.handle.request_transition(DoorCommand::Open).await;

        assert!(matches!(result, Err(CoreError::DeviceUnknown)));
        assert!(dispatcher.calls().is_empty());
        assert_eq!(door(&parts).current, DoorPosition::Unknown);

        // No pending command was created: nothing settles later either.
        tokio::time::sleep(OPENING_TIME * 2).await;
        assert_eq!(door(&parts).current, DoorPosition::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn non_live_events_never_change_visible_state() {
        let dispatcher = RecordingDispatcher::default();
        let parts = spawn_test_engine(dispatcher.clone());

        parts
            .handle
            .device_event(state_event(ReportedState::Open), false)
            .await;
        settle().await;

        assert_eq!(door(&parts).current, DoorPosition::Unknown);
        assert_eq!(door(&parts).target, DoorPosition::Unknown);

        // ...but identity bookkeeping happened: commands are unlocked.
        let accepted = parts
            .handle
            .request_transition(DoorCommand::Open)
            .await
            .unwrap();
        assert!(accepted);
        assert_eq!(dispatcher.calls().len(), 1);
        assert_eq!(dispatcher.calls()[0].0.to_string(), "cover-garage_door");
    }

    #[tokio::test(start_paused = true)]
    async fn live_event_with_no_pending_is_adopted_as_external_change() {
        let dispatcher = RecordingDispatcher::default();
        let parts = spawn_test_engine(dispatcher);

        parts
            .handle
            .device_event(state_event(ReportedState::Open), true)
            .await;
        settle().await;

        assert_eq!(
            door(&parts),
            DoorState {
                current: DoorPosition::Open,
                target: DoorPosition::Open
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn optimistic_settle_fires_at_the_deadline_never_earlier() {
        let dispatcher = RecordingDispatcher::default();
        let parts = spawn_test_engine(dispatcher);

        parts
            .handle
            .device_event(state_event(ReportedState::Closed), true)
            .await;
        settle().await;

        let accepted = parts
            .handle
            .request_transition(DoorCommand::Open)
            .await
            .unwrap();
        assert!(accepted);
        assert_eq!(
            door(&parts),
            DoorState {
                current: DoorPosition::Opening,
                target: DoorPosition::Open
            }
        );

        // One millisecond shy of the deadline: still travelling.
        tokio::time::sleep(OPENING_TIME - Duration::from_millis(1)).await;
        assert_eq!(door(&parts).current, DoorPosition::Opening);

        // Cross the deadline: optimistic settle.
        settle().await;
        settle().await;
        assert_eq!(
            door(&parts),
            DoorState {
                current: DoorPosition::Open,
                target: DoorPosition::Open
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_deadline_settles_symmetrically() {
        let dispatcher = RecordingDispatcher::default();
        let parts = spawn_test_engine(dispatcher);

        parts
            .handle
            .device_event(state_event(ReportedState::Open), true)
            .await;
        settle().await;

        parts
            .handle
            .request_transition(DoorCommand::Close)
            .await
            .unwrap();
        assert_eq!(door(&parts).current, DoorPosition::Closing);

        tokio::time::sleep(OPENING_TIME + Duration::from_millis(2)).await;
        assert_eq!(
            door(&parts),
            DoorState {
                current: DoorPosition::Closed,
                target: DoorPosition::Closed
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn last_command_wins_and_cancels_the_prior_deadline() {
        let dispatcher = RecordingDispatcher::default();
        let parts = spawn_test_engine(dispatcher.clone());

        parts
            .handle
            .device_event(state_event(ReportedState::Closed), true)
            .await;
        settle().await;

        parts
            .handle
            .request_transition(DoorCommand::Open)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        parts
            .handle
            .request_transition(DoorCommand::Close)
            .await
            .unwrap();

        // t = 35s: past the first command's deadline. Had it survived,
        // the door would read Open; the second command owns the outcome.
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(door(&parts).current, DoorPosition::Closing);

        // t = 40s: the second command's deadline settles to Closed.
        tokio::time::sleep(Duration::from_secs(5) + Duration::from_millis(2)).await;
        assert_eq!(
            door(&parts),
            DoorState {
                current: DoorPosition::Closed,
                target: DoorPosition::Closed
            }
        );
        assert_eq!(dispatcher.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reported_closed_preempts_a_pending_command() {
        let dispatcher = RecordingDispatcher::default();
        let parts = spawn_test_engine(dispatcher);

        parts
            .handle
            .device_event(state_event(ReportedState::Closed), true)
            .await;
        settle().await;

        parts
            .handle
            .request_transition(DoorCommand::Open)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        parts
            .handle
            .device_event(state_event(ReportedState::Closed), true)
            .await;
        settle().await;

        assert_eq!(
            door(&parts),
            DoorState {
                current: DoorPosition::Closed,
                target: DoorPosition::Closed
            }
        );

        // The deadline was cancelled with the command: nothing flips the
        // door to Open later.
        tokio::time::sleep(OPENING_TIME * 2).await;
        assert_eq!(door(&parts).current, DoorPosition::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn reported_open_is_ignored_while_a_command_is_pending() {
        let dispatcher = RecordingDispatcher::default();
        let parts = spawn_test_engine(dispatcher);

        parts
            .handle
            .device_event(state_event(ReportedState::Closed), true)
            .await;
        settle().await;

        parts
            .handle
            .request_transition(DoorCommand::Open)
            .await
            .unwrap();

        // Premature OPEN report: the deadline owns this transition.
        parts
            .handle
            .device_event(state_event(ReportedState::Open), true)
            .await;
        settle().await;
        assert_eq!(door(&parts).current, DoorPosition::Opening);

        tokio::time::sleep(OPENING_TIME).await;
        settle().await;
        assert_eq!(door(&parts).current, DoorPosition::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_rejection_does_not_roll_back_the_transition() {
        let dispatcher = RecordingDispatcher::rejecting();
        let parts = spawn_test_engine(dispatcher.clone());

        parts
            .handle
            .device_event(state_event(ReportedState::Closed), true)
            .await;
        settle().await;

        let accepted = parts
            .handle
            .request_transition(DoorCommand::Open)
            .await
            .unwrap();
        assert!(!accepted);
        assert_eq!(dispatcher.calls().len(), 1);
        assert_eq!(door(&parts).current, DoorPosition::Opening);

        // The deadline still settles the optimistic state.
        tokio::time::sleep(OPENING_TIME + Duration::from_millis(2)).await;
        assert_eq!(door(&parts).current, DoorPosition::Open);
    }
}
