//! Drives one proxied session from accept to close.

use super::{
    DuplexRelay, RelayCounters, SessionTeardown, SharedSink, UpstreamHandshake,
    client::client_transport, shared, shutdown_requested,
};
use crate::state::AppState;
use axum::{
    extract::{
        Query, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream};
use robai_core::{
    ClientSignal, FailureKind, Frame, FrameStream, Profile, SessionError, SessionPhase,
    SessionState, SessionTelemetry, TelemetryEvent, TerminationReason, Transport,
    protocol::kickoff_frame,
    telemetry::{HandshakeOutcome, RelayTotals},
};
use serde::Deserialize;
use std::{sync::Arc, time::Instant};
use tracing::{Span, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub mode: Option<String>,
}

/// What happened to a session, for callers that want more than the logs.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub mode: String,
    pub reason: TerminationReason,
    pub reached_active: bool,
    pub final_state: SessionState,
    pub totals: RelayTotals,
}

/// Axum handler to upgrade an HTTP connection to a proxied session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.mode))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, mode: Option<String>) {
    run_session(state, mode, client_transport(socket)).await;
}

/// Runs a session over an already accepted client transport.
#[instrument(name = "ws_session", skip_all, fields(session_id, mode))]
pub async fn run_session(
    state: Arc<AppState>,
    requested_mode: Option<String>,
    client: Transport,
) -> SessionReport {
    let session_id = Uuid::new_v4();
    let (mode, profile) = state.catalog.resolve_entry(requested_mode.as_deref());
    Span::current().record("session_id", tracing::field::display(session_id));
    Span::current().record("mode", mode);
    info!("New client connection");

    let telemetry = SessionTelemetry::new(session_id, state.telemetry.clone());
    telemetry.emit(TelemetryEvent::SessionStarted {
        requested_mode,
        mode: mode.to_string(),
    });

    let (client_tx, mut client_rx) = client.split();
    let client_tx = shared(client_tx);
    let teardown = SessionTeardown::new(telemetry.clone(), client_tx.clone());
    let counters = Arc::new(RelayCounters::default());
    let mut phase = SessionPhase::new();

    let mut early = Vec::new();
    let setup = establish(&state, profile, &telemetry, &teardown, &client_tx, &mut phase);
    let established = tokio::select! {
        result = setup => result,
        reason = watch_client(&mut client_rx, &mut early) => Err(reason),
        _ = shutdown_requested(state.shutdown.clone()) => Err(TerminationReason::Shutdown),
    };

    let reason = match established {
        Ok(upstream) => {
            info!(buffered = early.len(), "Session active, relaying frames");
            let client_rx: FrameStream = if early.is_empty() {
                client_rx
            } else {
                Box::pin(stream::iter(early.into_iter().map(Ok)).chain(client_rx))
            };
            DuplexRelay::new(
                (client_tx, client_rx),
                upstream,
                telemetry.clone(),
                counters.clone(),
            )
            .run(state.shutdown.clone())
            .await
        }
        Err(reason) => reason,
    };

    advance(&mut phase, SessionState::Closing);
    teardown.run(&reason).await;
    advance(&mut phase, SessionState::Closed);

    let totals = counters.totals();
    telemetry.emit(TelemetryEvent::Terminated {
        reason: reason.clone(),
        totals,
    });

    SessionReport {
        session_id,
        mode: mode.to_string(),
        reason,
        reached_active: phase.reached_active(),
        final_state: phase.current(),
        totals,
    }
}

/// Authorizes, connects, and negotiates. On success the session is active
/// and the returned upstream halves are ready to relay.
async fn establish(
    state: &AppState,
    profile: &Profile,
    telemetry: &SessionTelemetry,
    teardown: &SessionTeardown,
    client_tx: &SharedSink,
    phase: &mut SessionPhase,
) -> Result<(SharedSink, FrameStream), TerminationReason> {
    let credential = state.credentials.authorize().map_err(|e| {
        warn!(error = %e, "Rejecting session");
        TerminationReason::MissingCredential
    })?;
    advance(phase, SessionState::Handshaking);

    let started = Instant::now();
    let handshake =
        UpstreamHandshake::new(state.connector.as_ref(), state.config.handshake_timeout);
    let upstream = handshake
        .connect(&credential)
        .await
        .map_err(|e| handshake_failed(telemetry, started, e))?;

    let (upstream_tx, mut upstream_rx) = upstream.split();
    let upstream_tx = shared(upstream_tx);
    teardown.attach_upstream(upstream_tx.clone());

    let ack = handshake
        .negotiate(&upstream_tx, &mut upstream_rx, profile)
        .await
        .map_err(|e| handshake_failed(telemetry, started, e))?;
    UpstreamHandshake::classify(&ack)
        .into_result()
        .map_err(|signal| handshake_failed(telemetry, started, signal.into()))?;

    telemetry.emit(TelemetryEvent::Handshake {
        outcome: HandshakeOutcome::Ready,
        elapsed: started.elapsed(),
    });
    advance(phase, SessionState::Active);

    client_tx
        .lock()
        .await
        .send(ClientSignal::SetupComplete.into_frame())
        .await
        .map_err(|e| TerminationReason::ClientFailed { error: e.0 })?;

    if let Some(text) = &profile.kickoff {
        let kickoff = kickoff_frame(text).map_err(|e| TerminationReason::Internal {
            error: format!("failed to encode kickoff turn: {e}"),
        })?;
        upstream_tx
            .lock()
            .await
            .send(kickoff)
            .await
            .map_err(|e| TerminationReason::UpstreamFailed { error: e.0 })?;
    }

    Ok((upstream_tx, upstream_rx))
}

/// Reads the client while the upstream is being set up. Returns once the
/// client goes away; data frames are kept for the relay in arrival order.
async fn watch_client(client_rx: &mut FrameStream, early: &mut Vec<Frame>) -> TerminationReason {
    loop {
        match client_rx.next().await {
            None | Some(Ok(Frame::Close(_))) => {
                info!("Client left during setup");
                return TerminationReason::ClientClosed;
            }
            Some(Err(e)) => return TerminationReason::ClientFailed { error: e.0 },
            Some(Ok(frame)) => early.push(frame),
        }
    }
}

fn handshake_failed(
    telemetry: &SessionTelemetry,
    started: Instant,
    error: SessionError,
) -> TerminationReason {
    let Some(signal) = error.failure_signal() else {
        return TerminationReason::MissingCredential;
    };
    let outcome = match signal.kind {
        FailureKind::QuotaExceeded => HandshakeOutcome::QuotaExceeded,
        FailureKind::SetupError => HandshakeOutcome::SetupError,
        FailureKind::TransportError => HandshakeOutcome::TransportError,
    };
    telemetry.emit(TelemetryEvent::Handshake {
        outcome,
        elapsed: started.elapsed(),
    });
    TerminationReason::Handshake(signal)
}

fn advance(phase: &mut SessionPhase, to: SessionState) {
    if let Err(e) = phase.advance(to) {
        warn!(error = %e, "Ignoring session transition");
    }
}
