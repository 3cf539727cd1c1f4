//! Structured session telemetry.
//!
//! Sessions report what happened to an injected [`TelemetrySink`] rather than
//! writing logs themselves. [`TracingSink`] is the production sink; it turns
//! every event into a `tracing` event. [`RecordingSink`] keeps events in
//! memory for assertions.

use crate::classify::FailureSignal;
use crate::lifecycle::TerminationReason;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Ready,
    QuotaExceeded,
    SetupError,
    TransportError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnBoundary {
    Interrupted,
    TurnComplete,
}

/// Per-session totals reported when the session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayTotals {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
    pub interruptions: u64,
    pub turns_completed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    SessionStarted {
        requested_mode: Option<String>,
        mode: String,
    },
    Handshake {
        outcome: HandshakeOutcome,
        elapsed: Duration,
    },
    TurnBoundary(TurnBoundary),
    MalformedFrame {
        error: String,
    },
    UpstreamError(FailureSignal),
    /// An error that was deliberately swallowed on a best-effort path.
    SuppressedError {
        stage: &'static str,
        error: String,
    },
    Terminated {
        reason: TerminationReason,
        totals: RelayTotals,
    },
}

pub trait TelemetrySink: Send + Sync {
    /// Must not block: called from inside the relay loop.
    fn record(&self, session_id: Uuid, event: TelemetryEvent);
}

/// A sink bound to one session.
#[derive(Clone)]
pub struct SessionTelemetry {
    session_id: Uuid,
    sink: Arc<dyn TelemetrySink>,
}

impl SessionTelemetry {
    pub fn new(session_id: Uuid, sink: Arc<dyn TelemetrySink>) -> Self {
        Self { session_id, sink }
    }

    pub fn emit(&self, event: TelemetryEvent) {
        self.sink.record(self.session_id, event);
    }

    pub fn suppressed(&self, stage: &'static str, error: impl ToString) {
        self.emit(TelemetryEvent::SuppressedError {
            stage,
            error: error.to_string(),
        });
    }
}

/// Forwards telemetry to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, session_id: Uuid, event: TelemetryEvent) {
        match event {
            TelemetryEvent::SessionStarted {
                requested_mode,
                mode,
            } => info!(%session_id, ?requested_mode, %mode, "Session started"),
            TelemetryEvent::Handshake { outcome, elapsed } => match outcome {
                HandshakeOutcome::Ready => info!(
                    %session_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Upstream handshake complete"
                ),
                _ => warn!(
                    %session_id,
                    ?outcome,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Upstream handshake failed"
                ),
            },
            TelemetryEvent::TurnBoundary(boundary) => {
                debug!(%session_id, ?boundary, "Turn boundary")
            }
            TelemetryEvent::MalformedFrame { error } => {
                debug!(%session_id, %error, "Unparseable upstream frame")
            }
            TelemetryEvent::UpstreamError(signal) => {
                warn!(%session_id, kind = %signal.kind, message = %signal.message, "Upstream reported an error")
            }
            TelemetryEvent::SuppressedError { stage, error } => {
                warn!(%session_id, stage, %error, "Ignored error during best-effort step")
            }
            TelemetryEvent::Terminated { reason, totals } => info!(
                %session_id,
                %reason,
                client_to_upstream = totals.client_to_upstream,
                upstream_to_client = totals.upstream_to_client,
                interruptions = totals.interruptions,
                turns_completed = totals.turns_completed,
                "Session terminated"
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(Uuid, TelemetryEvent)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.lock().iter().map(|(_, event)| event.clone()).collect()
    }

    pub fn session_ids(&self) -> Vec<Uuid> {
        self.lock().iter().map(|(id, _)| *id).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Uuid, TelemetryEvent)>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TelemetrySink for RecordingSink {
    fn record(&self, session_id: Uuid, event: TelemetryEvent) {
        self.lock().push((session_id, event));
    }
}
