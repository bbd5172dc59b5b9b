// ── Connection supervisor ──
//
// Owns the lifecycle of the long-lived device event stream: open a
// single-attempt connection, prove liveness through heartbeats, debounce
// bursty state events, and reconnect with a budgeted fixed backoff. The
// stream client itself never retries; every bit of resilience lives here.
//
// There is exactly one supervision loop per bridge, so reconnection can
// never race with itself.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use doorlink_api::{DeviceEvent, StreamEvent, TransportConfig};

use crate::config::BridgeConfig;
use crate::engine::EngineHandle;
use crate::error::CoreError;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
///
/// `Live` is entered only once the first heartbeat arrives; it is the
/// only state in which device events are trusted to move the
/// accessory-visible door position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// The stream opened but no heartbeat has been seen yet.
    ConnectedUnconfirmed,
    Live,
}

// ── RetryBudget ──────────────────────────────────────────────────────

/// Reconnect bookkeeping. Reset to the configured maximum on every
/// `Live` transition, so a healthy connection forgives past failures.
#[derive(Debug)]
struct RetryBudget {
    attempts_remaining: Option<u32>,
}

impl RetryBudget {
    fn new(max_retries: Option<u32>) -> Self {
        Self {
            attempts_remaining: max_retries,
        }
    }

    fn reset(&mut self, max_retries: Option<u32>) {
        self.attempts_remaining = max_retries;
    }

    /// Consume one attempt; `false` when the budget is exhausted.
    fn try_consume(&mut self) -> bool {
        match &mut self.attempts_remaining {
            None => true,
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
        }
    }
}

// ── Stream abstraction ───────────────────────────────────────────────

/// Abstract capability to open one event-stream attempt.
///
/// Production uses [`EspStreamSource`] over the device's SSE endpoint;
/// tests drive the supervisor with scripted fakes.
pub trait StreamSource: Send + Sync + 'static {
    type Stream: EventStream;

    fn open(&self) -> impl Future<Output = Result<Self::Stream, CoreError>> + Send;
}

/// One open stream: a sequence of events ending in close or error.
pub trait EventStream: Send {
    fn next_event(&mut self) -> impl Future<Output = Result<Option<StreamEvent>, CoreError>> + Send;

    /// Idempotent teardown.
    fn close(&mut self);
}

/// Production stream source: the device's `/events` SSE endpoint.
pub struct EspStreamSource {
    host: String,
    port: u16,
    transport: TransportConfig,
}

impl EspStreamSource {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            transport: config.transport.clone(),
        }
    }
}

impl StreamSource for EspStreamSource {
    type Stream = doorlink_api::EventSource;

    async fn open(&self) -> Result<Self::Stream, CoreError> {
        doorlink_api::EventSource::connect(&self.host, self.port, &self.transport)
            .await
            .map_err(CoreError::from)
    }
}

impl EventStream for doorlink_api::EventSource {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, CoreError> {
        doorlink_api::EventSource::next_event(self)
            .await
            .map_err(CoreError::from)
    }

    fn close(&mut self) {
        doorlink_api::EventSource::close(self);
    }
}

// ── Settings ─────────────────────────────────────────────────────────

/// Supervision tuning, lifted out of [`BridgeConfig`].
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub debounce: Duration,
    pub liveness_timeout: Duration,
    pub retry_backoff: Duration,
    pub max_retries: Option<u32>,
}

impl From<&BridgeConfig> for SupervisorSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            debounce: config.debounce,
            liveness_timeout: config.liveness_timeout,
            retry_backoff: config.retry_backoff,
            max_retries: config.max_retries,
        }
    }
}

// ── Supervision loop ─────────────────────────────────────────────────

/// Spawn the supervision loop.
///
/// Debounced device events are forwarded to the engine (tagged with
/// whether the stream was live); connection transitions are published on
/// the returned watch channel for diagnostics.
pub(crate) fn spawn_supervisor<S: StreamSource>(
    source: S,
    settings: SupervisorSettings,
    engine: EngineHandle,
    cancel: CancellationToken,
) -> (watch::Receiver<ConnectionState>, JoinHandle<()>) {
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let task = tokio::spawn(supervise(source, settings, engine, state_tx, cancel));
    (state_rx, task)
}

/// Main loop: connect → prove liveness → read until lost → backoff → reconnect.
async fn supervise<S: StreamSource>(
    source: S,
    settings: SupervisorSettings,
    engine: EngineHandle,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let mut budget = RetryBudget::new(settings.max_retries);

    loop {
        let _ = state_tx.send(ConnectionState::Connecting);

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                // Observable state must land terminal even when shutdown
                // interrupts a connect attempt.
                let _ = state_tx.send(ConnectionState::Disconnected);
                break;
            }
            result = source.open() => result,
        };

        match opened {
            Ok(mut stream) => {
                let _ = state_tx.send(ConnectionState::ConnectedUnconfirmed);
                info!("stream opened, awaiting first heartbeat");

                let outcome =
                    run_stream(&mut stream, &settings, &engine, &state_tx, &mut budget, &cancel)
                        .await;
                stream.close();
                let _ = state_tx.send(ConnectionState::Disconnected);

                match outcome {
                    StreamOutcome::Cancelled => break,
                    StreamOutcome::Lost(reason) => {
                        warn!(%reason, "stream lost");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "stream open failed");
                let _ = state_tx.send(ConnectionState::Disconnected);
            }
        }

        // Either the open failed or an established stream died. Both
        // count against the budget; a budget hit is reported before the
        // next attempt, never silently.
        if !budget.try_consume() {
            error!("reconnect budget exhausted, staying disconnected until restarted");
            break;
        }

        debug!(delay = ?settings.retry_backoff, "waiting before reconnect");
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = sleep(settings.retry_backoff) => {}
        }
    }

    debug!("supervisor loop exiting");
}

enum StreamOutcome {
    Cancelled,
    Lost(String),
}

/// Drive one open stream until it dies, goes silent, or we shut down.
///
/// Two explicit timers, each re-armed by exactly one trigger: the
/// liveness deadline (heartbeats only) and the debounce deadline (state
/// events only). At most one of each exists at any time.
async fn run_stream<E: EventStream>(
    stream: &mut E,
    settings: &SupervisorSettings,
    engine: &EngineHandle,
    state_tx: &watch::Sender<ConnectionState>,
    budget: &mut RetryBudget,
    cancel: &CancellationToken,
) -> StreamOutcome {
    let mut live = false;
    let mut liveness_deadline = Instant::now() + settings.liveness_timeout;

    // Debounce coalescing: the last event in a burst wins.
    let mut coalesced: Option<DeviceEvent> = None;
    let mut debounce_deadline = Instant::now();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => return StreamOutcome::Cancelled,

            () = sleep_until(liveness_deadline) => {
                let reason = if live {
                    "liveness timeout: heartbeats stopped"
                } else {
                    "no heartbeat after open"
                };
                return StreamOutcome::Lost(reason.into());
            }

            () = sleep_until(debounce_deadline), if coalesced.is_some() => {
                if let Some(event) = coalesced.take() {
                    engine.device_event(event, live).await;
                }
            }

            next = stream.next_event() => match next {
                Ok(Some(StreamEvent::Ping)) => {
                    liveness_deadline = Instant::now() + settings.liveness_timeout;
                    if !live {
                        live = true;
                        budget.reset(settings.max_retries);
                        let _ = state_tx.send(ConnectionState::Live);
                        info!("first heartbeat received, stream is live");
                    }
                }
                Ok(Some(StreamEvent::State(event))) => {
                    coalesced = Some(event);
                    debounce_deadline = Instant::now() + settings.debounce;
                }
                Ok(Some(StreamEvent::Log(line))) => {
                    debug!(target: "doorlink::device", "{line}");
                }
                Ok(None) => return StreamOutcome::Lost("stream ended".into()),
                Err(e) => return StreamOutcome::Lost(e.to_string()),
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
