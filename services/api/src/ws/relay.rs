//! The two directional frame pumps of an active session.

use super::{SharedSink, shutdown_requested};
use futures_util::{SinkExt, StreamExt};
use robai_core::{
    ClientSignal, Direction, FailureSignal, Frame, FrameStream, SessionTelemetry, TelemetryEvent,
    TerminationReason,
    classify::{close_failure, inspect_upstream},
    telemetry::{RelayTotals, TurnBoundary},
};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::{sync::watch, task::JoinError};
use tracing::debug;

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The source sent a close frame or ended.
    SourceClosed,
    SourceFailed(String),
    SinkFailed(String),
    /// The upstream reported a fatal error mid-session.
    UpstreamFailure(FailureSignal),
}

impl ExitReason {
    fn into_termination(self, direction: Direction) -> TerminationReason {
        match (direction, self) {
            (Direction::ClientToUpstream, ExitReason::SourceClosed) => {
                TerminationReason::ClientClosed
            }
            (Direction::ClientToUpstream, ExitReason::SourceFailed(error))
            | (Direction::UpstreamToClient, ExitReason::SinkFailed(error)) => {
                TerminationReason::ClientFailed { error }
            }
            (Direction::UpstreamToClient, ExitReason::SourceClosed) => {
                TerminationReason::UpstreamClosed
            }
            (Direction::UpstreamToClient, ExitReason::SourceFailed(error))
            | (Direction::ClientToUpstream, ExitReason::SinkFailed(error)) => {
                TerminationReason::UpstreamFailed { error }
            }
            (_, ExitReason::UpstreamFailure(signal)) => TerminationReason::UpstreamFailure(signal),
        }
    }
}

/// Frame counters shared by both pumps and the coordinator. They outlive an
/// aborted pump.
#[derive(Debug, Default)]
pub struct RelayCounters {
    client_to_upstream: AtomicU64,
    upstream_to_client: AtomicU64,
    interruptions: AtomicU64,
    turns_completed: AtomicU64,
}

impl RelayCounters {
    pub fn totals(&self) -> RelayTotals {
        RelayTotals {
            client_to_upstream: self.client_to_upstream.load(Ordering::Relaxed),
            upstream_to_client: self.upstream_to_client.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
        }
    }

    fn forwarded(&self, direction: Direction) {
        let counter = match direction {
            Direction::ClientToUpstream => &self.client_to_upstream,
            Direction::UpstreamToClient => &self.upstream_to_client,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct DuplexRelay {
    client_tx: SharedSink,
    client_rx: FrameStream,
    upstream_tx: SharedSink,
    upstream_rx: FrameStream,
    telemetry: SessionTelemetry,
    counters: Arc<RelayCounters>,
}

impl DuplexRelay {
    pub fn new(
        (client_tx, client_rx): (SharedSink, FrameStream),
        (upstream_tx, upstream_rx): (SharedSink, FrameStream),
        telemetry: SessionTelemetry,
        counters: Arc<RelayCounters>,
    ) -> Self {
        Self {
            client_tx,
            client_rx,
            upstream_tx,
            upstream_rx,
            telemetry,
            counters,
        }
    }

    /// Runs both pumps until the first one stops or shutdown is requested,
    /// then aborts the other.
    ///
    /// An upstream that stops accepting frames may still have frames in
    /// flight towards the client, so in that case the upstream->client pump
    /// keeps running until its source ends.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> TerminationReason {
        let mut to_upstream = tokio::spawn(pump_client_frames(
            self.client_rx,
            self.upstream_tx,
            self.counters.clone(),
        ));
        let mut to_client = tokio::spawn(pump_upstream_frames(
            self.upstream_rx,
            self.client_tx,
            self.telemetry,
            self.counters,
        ));

        let reason = tokio::select! {
            exit = &mut to_upstream => match exit {
                Ok(ExitReason::SinkFailed(error)) => {
                    debug!(%error, "Upstream stopped accepting frames, draining what it sent");
                    tokio::select! {
                        exit = &mut to_client => termination(Direction::UpstreamToClient, exit),
                        _ = shutdown_requested(shutdown.clone()) => TerminationReason::Shutdown,
                    }
                }
                exit => termination(Direction::ClientToUpstream, exit),
            },
            exit = &mut to_client => termination(Direction::UpstreamToClient, exit),
            _ = shutdown_requested(shutdown.clone()) => TerminationReason::Shutdown,
        };
        to_upstream.abort();
        to_client.abort();
        reason
    }
}

fn termination(direction: Direction, exit: Result<ExitReason, JoinError>) -> TerminationReason {
    match exit {
        Ok(exit) => {
            debug!(%direction, ?exit, "Pump stopped");
            exit.into_termination(direction)
        }
        Err(e) => TerminationReason::Internal {
            error: format!("{direction} pump failed: {e}"),
        },
    }
}

pub(crate) async fn pump_client_frames(
    mut source: FrameStream,
    sink: SharedSink,
    counters: Arc<RelayCounters>,
) -> ExitReason {
    loop {
        let frame = match source.next().await {
            None | Some(Ok(Frame::Close(_))) => return ExitReason::SourceClosed,
            Some(Err(e)) => return ExitReason::SourceFailed(e.0),
            Some(Ok(frame)) => frame,
        };
        if let Err(e) = sink.lock().await.send(frame).await {
            return ExitReason::SinkFailed(e.0);
        }
        counters.forwarded(Direction::ClientToUpstream);
    }
}

pub(crate) async fn pump_upstream_frames(
    mut source: FrameStream,
    sink: SharedSink,
    telemetry: SessionTelemetry,
    counters: Arc<RelayCounters>,
) -> ExitReason {
    loop {
        let frame = match source.next().await {
            None => return ExitReason::SourceClosed,
            Some(Err(e)) => return ExitReason::SourceFailed(e.0),
            Some(Ok(Frame::Close(close))) => {
                return match close_failure(close.as_ref()) {
                    Some(signal) => {
                        telemetry.emit(TelemetryEvent::UpstreamError(signal.clone()));
                        ExitReason::UpstreamFailure(signal)
                    }
                    None => ExitReason::SourceClosed,
                };
            }
            Some(Ok(frame)) => frame,
        };

        if let Err(e) = sink.lock().await.send(frame.clone()).await {
            return ExitReason::SinkFailed(e.0);
        }
        counters.forwarded(Direction::UpstreamToClient);

        let inspection = inspect_upstream(&frame);
        if inspection.is_quiet() {
            continue;
        }
        if inspection.interrupted {
            counters.interruptions.fetch_add(1, Ordering::Relaxed);
            telemetry.emit(TelemetryEvent::TurnBoundary(TurnBoundary::Interrupted));
        }
        if inspection.turn_complete {
            counters.turns_completed.fetch_add(1, Ordering::Relaxed);
            telemetry.emit(TelemetryEvent::TurnBoundary(TurnBoundary::TurnComplete));
        }
        if let Some(error) = inspection.malformed {
            telemetry.emit(TelemetryEvent::MalformedFrame { error });
        }
        if let Some(signal) = inspection.failure {
            telemetry.emit(TelemetryEvent::UpstreamError(signal.clone()));
            if signal.is_quota() {
                return ExitReason::UpstreamFailure(signal);
            }
            if let Some(notice) = ClientSignal::for_failure(&signal) {
                if let Err(e) = sink.lock().await.send(notice.into_frame()).await {
                    return ExitReason::SinkFailed(e.0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::shared;
    use bytes::Bytes;
    use robai_core::{FailureKind, Transport, Utf8Text, telemetry::RecordingSink};
    use uuid::Uuid;

    struct Harness {
        client: Transport,
        upstream: Transport,
        sink: Arc<RecordingSink>,
        counters: Arc<RelayCounters>,
        relay: DuplexRelay,
    }

    fn harness() -> Harness {
        let (client_proxy, client) = Transport::in_memory_pair();
        let (upstream_proxy, upstream) = Transport::in_memory_pair();
        let sink = Arc::new(RecordingSink::new());
        let counters = Arc::new(RelayCounters::default());
        let (client_tx, client_rx) = client_proxy.split();
        let (upstream_tx, upstream_rx) = upstream_proxy.split();
        let relay = DuplexRelay::new(
            (shared(client_tx), client_rx),
            (shared(upstream_tx), upstream_rx),
            SessionTelemetry::new(Uuid::new_v4(), sink.clone()),
            counters.clone(),
        );
        Harness {
            client,
            upstream,
            sink,
            counters,
            relay,
        }
    }

    fn text(s: &str) -> Frame {
        Frame::Text(s.into())
    }

    async fn next(transport: &mut Transport) -> Frame {
        transport.stream.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn frames_are_forwarded_verbatim_and_in_order() {
        let Harness {
            mut client,
            mut upstream,
            counters,
            relay,
            ..
        } = harness();
        let (_stop, shutdown) = watch::channel(false);
        let running = tokio::spawn(relay.run(shutdown));

        let outbound = [
            text(r#"{"realtime_input":{"media_chunks":[]}}"#),
            Frame::Binary(Bytes::from_static(&[1, 2, 3, 4])),
            text(r#"{"client_content":{"turn_complete":true}}"#),
        ];
        for frame in outbound.clone() {
            client.sink.send(frame).await.unwrap();
        }
        for expected in outbound {
            assert_eq!(next(&mut upstream).await, expected);
        }

        let inbound = [
            text(r#"{"serverContent":{"modelTurn":{"parts":[{"text":"hi"}]}}}"#),
            Frame::Binary(Bytes::from_static(&[0, 0, 255, 255])),
        ];
        for frame in inbound.clone() {
            upstream.sink.send(frame).await.unwrap();
        }
        for expected in inbound {
            assert_eq!(next(&mut client).await, expected);
        }

        client.sink.send(Frame::close(1000)).await.unwrap();
        assert_eq!(running.await.unwrap(), TerminationReason::ClientClosed);
        let totals = counters.totals();
        assert_eq!(totals.client_to_upstream, 3);
        assert_eq!(totals.upstream_to_client, 2);
    }

    #[tokio::test]
    async fn audio_sent_before_upstream_close_is_delivered() {
        let Harness {
            mut client,
            mut upstream,
            relay,
            ..
        } = harness();
        let (_stop, shutdown) = watch::channel(false);
        let running = tokio::spawn(relay.run(shutdown));

        for i in 0..32u8 {
            upstream
                .sink
                .send(Frame::Binary(Bytes::from(vec![i; 64])))
                .await
                .unwrap();
        }
        upstream.sink.send(Frame::close(1000)).await.unwrap();

        for i in 0..32u8 {
            assert_eq!(next(&mut client).await, Frame::Binary(Bytes::from(vec![i; 64])));
        }
        assert_eq!(running.await.unwrap(), TerminationReason::UpstreamClosed);
    }

    #[tokio::test]
    async fn upstream_refusing_writes_still_drains_its_queued_frames() {
        let Harness {
            mut client,
            upstream,
            relay,
            ..
        } = harness();
        let (_stop, shutdown) = watch::channel(false);

        let mut upstream_tx = upstream.sink;
        for i in 0..2000u32 {
            upstream_tx
                .send(Frame::Binary(Bytes::copy_from_slice(&i.to_be_bytes())))
                .await
                .unwrap();
        }
        drop(upstream_tx);
        drop(upstream.stream);
        client
            .sink
            .send(text(r#"{"client_content":{"turn_complete":true}}"#))
            .await
            .unwrap();

        let running = tokio::spawn(relay.run(shutdown));

        for i in 0..2000u32 {
            assert_eq!(
                next(&mut client).await,
                Frame::Binary(Bytes::copy_from_slice(&i.to_be_bytes()))
            );
        }
        assert_eq!(running.await.unwrap(), TerminationReason::UpstreamClosed);
    }

    #[tokio::test]
    async fn inspected_text_is_forwarded_without_a_copy() {
        let Harness {
            mut client,
            mut upstream,
            sink,
            relay,
            ..
        } = harness();
        let (_stop, shutdown) = watch::channel(false);
        let running = tokio::spawn(relay.run(shutdown));

        let payload = Utf8Text::from(r#"{"serverContent":{"turnComplete":true}}"#.to_string());
        upstream.sink.send(Frame::Text(payload.clone())).await.unwrap();

        let Frame::Text(delivered) = next(&mut client).await else {
            panic!("expected a text frame");
        };
        assert_eq!(delivered.as_ptr(), payload.as_ptr());

        drop(upstream);
        running.await.unwrap();
        assert!(sink.events().contains(&TelemetryEvent::TurnBoundary(
            TurnBoundary::TurnComplete
        )));
    }

    #[tokio::test]
    async fn generic_upstream_error_is_reported_and_relay_continues() {
        let Harness {
            mut client,
            mut upstream,
            sink,
            relay,
            ..
        } = harness();
        let (_stop, shutdown) = watch::channel(false);
        let running = tokio::spawn(relay.run(shutdown));

        let error = text(r#"{"error":{"message":"content blocked"}}"#);
        upstream.sink.send(error.clone()).await.unwrap();
        assert_eq!(next(&mut client).await, error);
        assert_eq!(next(&mut client).await, text(r#"{"error":"content blocked"}"#));

        let after = text(r#"{"serverContent":{"turnComplete":true}}"#);
        upstream.sink.send(after.clone()).await.unwrap();
        assert_eq!(next(&mut client).await, after);
        assert!(!running.is_finished());

        drop(upstream);
        assert_eq!(running.await.unwrap(), TerminationReason::UpstreamClosed);
        assert!(sink.events().contains(&TelemetryEvent::TurnBoundary(
            TurnBoundary::TurnComplete
        )));
    }

    #[tokio::test]
    async fn quota_error_mid_session_ends_the_relay() {
        let Harness {
            mut client,
            mut upstream,
            counters,
            relay,
            ..
        } = harness();
        let (_stop, shutdown) = watch::channel(false);
        let running = tokio::spawn(relay.run(shutdown));

        let quota = text(r#"{"error":{"message":"Quota exceeded for requests per minute"}}"#);
        upstream.sink.send(quota.clone()).await.unwrap();

        assert_eq!(next(&mut client).await, quota);
        match running.await.unwrap() {
            TerminationReason::UpstreamFailure(signal) => {
                assert_eq!(signal.kind, FailureKind::QuotaExceeded)
            }
            other => panic!("expected an upstream failure, got {other:?}"),
        }
        assert_eq!(counters.totals().upstream_to_client, 1);
    }

    #[tokio::test]
    async fn quota_close_reason_is_an_upstream_failure() {
        let Harness {
            client: _client,
            mut upstream,
            relay,
            ..
        } = harness();
        let (_stop, shutdown) = watch::channel(false);
        let running = tokio::spawn(relay.run(shutdown));

        upstream
            .sink
            .send(Frame::Close(Some(robai_core::CloseFrame {
                code: 1011,
                reason: "Resource has been exhausted (e.g. check quota).".into(),
            })))
            .await
            .unwrap();

        assert!(matches!(
            running.await.unwrap(),
            TerminationReason::UpstreamFailure(signal) if signal.is_quota()
        ));
    }

    #[tokio::test]
    async fn interruptions_and_malformed_frames_reach_telemetry() {
        let Harness {
            mut client,
            mut upstream,
            sink,
            counters,
            relay,
        } = harness();
        let (_stop, shutdown) = watch::channel(false);
        let running = tokio::spawn(relay.run(shutdown));

        upstream
            .sink
            .send(text(r#"{"serverContent":{"interrupted":true}}"#))
            .await
            .unwrap();
        upstream.sink.send(text("not json")).await.unwrap();
        next(&mut client).await;
        assert_eq!(next(&mut client).await, text("not json"));

        drop(upstream);
        running.await.unwrap();
        assert_eq!(counters.totals().interruptions, 1);
        let events = sink.events();
        assert!(events.contains(&TelemetryEvent::TurnBoundary(TurnBoundary::Interrupted)));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, TelemetryEvent::MalformedFrame { .. }))
        );
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_relay() {
        let Harness {
            client: _client,
            upstream: _upstream,
            relay,
            ..
        } = harness();
        let (stop, shutdown) = watch::channel(false);
        let running = tokio::spawn(relay.run(shutdown));

        stop.send(true).unwrap();
        assert_eq!(running.await.unwrap(), TerminationReason::Shutdown);
    }

    #[test]
    fn exit_reasons_map_to_the_failing_side() {
        assert_eq!(
            ExitReason::SinkFailed("reset".into()).into_termination(Direction::ClientToUpstream),
            TerminationReason::UpstreamFailed {
                error: "reset".into()
            }
        );
        assert_eq!(
            ExitReason::SinkFailed("gone".into()).into_termination(Direction::UpstreamToClient),
            TerminationReason::ClientFailed {
                error: "gone".into()
            }
        );
        assert_eq!(
            ExitReason::SourceClosed.into_termination(Direction::UpstreamToClient),
            TerminationReason::UpstreamClosed
        );
    }
}
