use super::SharedSink;
use futures_util::SinkExt;
use robai_core::{Frame, SessionTelemetry, TeardownLatch, TerminationReason, frame::CLOSE_NORMAL};
use std::sync::OnceLock;
use tracing::debug;

/// Closes both sides of a session. Only the first call does anything.
pub struct SessionTeardown {
    latch: TeardownLatch,
    telemetry: SessionTelemetry,
    client: SharedSink,
    upstream: OnceLock<SharedSink>,
}

impl SessionTeardown {
    pub fn new(telemetry: SessionTelemetry, client: SharedSink) -> Self {
        Self {
            latch: TeardownLatch::new(),
            telemetry,
            client,
            upstream: OnceLock::new(),
        }
    }

    /// Registers the upstream sink once it exists.
    pub fn attach_upstream(&self, upstream: SharedSink) {
        let _ = self.upstream.set(upstream);
    }

    /// Notifies and closes the client, then closes the upstream. Returns
    /// `false` if teardown already ran.
    pub async fn run(&self, reason: &TerminationReason) -> bool {
        if !self.latch.claim() {
            debug!(%reason, "Teardown already done");
            return false;
        }

        if reason.client_reachable() {
            let mut client = self.client.lock().await;
            if let Some(notice) = reason.client_notice() {
                if let Err(e) = client.send(notice.into_frame()).await {
                    self.telemetry.suppressed("notify_client", e);
                }
            }
            if let Err(e) = client.send(Frame::close(reason.close_code())).await {
                self.telemetry.suppressed("close_client", e);
            }
        }

        if let Some(upstream) = self.upstream.get() {
            if let Err(e) = upstream.lock().await.send(Frame::close(CLOSE_NORMAL)).await {
                self.telemetry.suppressed("close_upstream", e);
            }
        }
        true
    }
}
