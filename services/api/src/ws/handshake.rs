//! Upstream session setup: connect, send the setup frame, wait for the one
//! acknowledgment.

use crate::upstream::UpstreamConnector;
use futures_util::{SinkExt, StreamExt};
use robai_core::{
    AckOutcome, Credential, Frame, FrameStream, Profile, SessionError, Transport,
    classify::classify_ack, protocol::setup_frame,
};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use super::SharedSink;

pub struct UpstreamHandshake<'a> {
    connector: &'a dyn UpstreamConnector,
    ack_timeout: Duration,
}

impl<'a> UpstreamHandshake<'a> {
    pub fn new(connector: &'a dyn UpstreamConnector, ack_timeout: Duration) -> Self {
        Self {
            connector,
            ack_timeout,
        }
    }

    /// Opens the upstream transport. No retry.
    pub async fn connect(&self, credential: &Credential) -> Result<Transport, SessionError> {
        Ok(self.connector.connect(credential).await?)
    }

    /// Sends the setup frame and returns the first frame the upstream sends
    /// back, whatever it is.
    pub async fn negotiate(
        &self,
        upstream_tx: &SharedSink,
        upstream_rx: &mut FrameStream,
        profile: &Profile,
    ) -> Result<Frame, SessionError> {
        let setup = setup_frame(profile)
            .map_err(|e| SessionError::Setup(format!("failed to encode setup frame: {e}")))?;
        debug!(model = %profile.model, bytes = setup.len(), "Sending setup frame");
        upstream_tx.lock().await.send(setup).await?;

        match timeout(self.ack_timeout, upstream_rx.next()).await {
            Err(_) => Err(SessionError::Setup(format!(
                "upstream did not acknowledge setup within {:?}",
                self.ack_timeout
            ))),
            Ok(None) => Err(SessionError::Transport(
                "upstream closed before acknowledging setup".to_string(),
            )),
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(Some(Ok(ack))) => Ok(ack),
        }
    }

    pub fn classify(ack: &Frame) -> AckOutcome {
        classify_ack(ack)
    }
}
