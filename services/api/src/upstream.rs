//! Opening the upstream live session socket.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt, future};
use robai_core::{CloseFrame, Credential, Frame, Transport, TransportError, Utf8Text};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Utf8Bytes,
        protocol::{CloseFrame as WsCloseFrame, Message as WsMessage, frame::coding::CloseCode},
    },
};
use tracing::{debug, info};

/// Opens one upstream transport per session.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self, credential: &Credential) -> Result<Transport, TransportError>;
}

/// Connects to the `BidiGenerateContent` WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct GeminiConnector {
    base_url: String,
    api_version: String,
}

impl GeminiConnector {
    pub fn new(base_url: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_version: api_version.into(),
        }
    }

    /// The endpoint URL without the key, safe to log.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/ws/google.ai.generativelanguage.{}.GenerativeService.BidiGenerateContent",
            self.base_url.trim_end_matches('/'),
            self.api_version
        )
    }

    fn url(&self, credential: &Credential) -> String {
        format!("{}?key={}", self.endpoint(), credential.expose())
    }
}

#[async_trait]
impl UpstreamConnector for GeminiConnector {
    async fn connect(&self, credential: &Credential) -> Result<Transport, TransportError> {
        debug!(endpoint = %self.endpoint(), key = %credential.preview(), "Connecting upstream");
        let (ws_stream, _) = connect_async(self.url(credential))
            .await
            .map_err(TransportError::new)?;
        info!(api_version = %self.api_version, "Connected to upstream live API");

        let (ws_tx, ws_rx) = ws_stream.split();
        let sink = ws_tx
            .sink_map_err(TransportError::new)
            .with(|frame: Frame| future::ready(to_ws_message(frame)));
        let stream = ws_rx.filter_map(|msg| {
            future::ready(match msg {
                Ok(msg) => from_ws_message(msg).transpose(),
                Err(e) => Some(Err(TransportError::new(e))),
            })
        });
        Ok(Transport::new(sink, stream))
    }
}

pub(crate) fn to_ws_message(frame: Frame) -> Result<WsMessage, TransportError> {
    Ok(match frame {
        Frame::Text(text) => {
            WsMessage::Text(Utf8Bytes::try_from(Bytes::from(text)).map_err(TransportError::new)?)
        }
        Frame::Binary(data) => WsMessage::Binary(data),
        Frame::Close(close) => WsMessage::Close(close.map(|c| WsCloseFrame {
            code: CloseCode::from(c.code),
            reason: c.reason.into(),
        })),
    })
}

/// Ping and pong are answered by tungstenite itself and are not relayed.
pub(crate) fn from_ws_message(msg: WsMessage) -> Result<Option<Frame>, TransportError> {
    Ok(match msg {
        WsMessage::Text(text) => Some(Frame::Text(
            Utf8Text::try_from(Bytes::from(text)).map_err(TransportError::new)?,
        )),
        WsMessage::Binary(data) => Some(Frame::Binary(data)),
        WsMessage::Close(close) => Some(Frame::Close(close.map(|c| CloseFrame {
            code: u16::from(c.code),
            reason: c.reason.as_str().to_owned(),
        }))),
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: Frame) -> Option<Frame> {
        from_ws_message(to_ws_message(frame).unwrap()).unwrap()
    }

    #[test]
    fn endpoint_uses_configured_version() {
        let connector = GeminiConnector::new("wss://example.test/", "v1beta");
        assert_eq!(
            connector.endpoint(),
            "wss://example.test/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent"
        );
        let url = connector.url(&Credential::new("k123"));
        assert!(url.ends_with("BidiGenerateContent?key=k123"));
    }

    #[test]
    fn frames_keep_their_type_across_conversion() {
        let text = Frame::Text(r#"{"realtime_input":{}}"#.into());
        assert_eq!(round_trip(text.clone()), Some(text));

        let binary = Frame::Binary(Bytes::from_static(&[0, 1, 2, 255]));
        assert_eq!(round_trip(binary.clone()), Some(binary));

        let close = Frame::Close(Some(CloseFrame {
            code: 1011,
            reason: "quota".into(),
        }));
        assert_eq!(round_trip(close.clone()), Some(close));
    }

    #[test]
    fn control_frames_are_not_relayed() {
        assert_eq!(from_ws_message(WsMessage::Ping(Bytes::new())), Ok(None));
        assert_eq!(from_ws_message(WsMessage::Pong(Bytes::new())), Ok(None));
    }

    #[test]
    fn upstream_text_is_not_copied() {
        let payload = Bytes::from(r#"{"setupComplete":{}}"#.to_string());
        let inbound = WsMessage::Text(Utf8Bytes::try_from(payload.clone()).unwrap());

        let Ok(Some(Frame::Text(text))) = from_ws_message(inbound) else {
            panic!("expected a text frame");
        };
        assert_eq!(text.as_ptr(), payload.as_ptr());
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_transport_error() {
        let connector = GeminiConnector::new("ws://127.0.0.1:9", "v1alpha");
        let err = connector.connect(&Credential::new("key")).await.unwrap_err();
        assert!(!err.0.is_empty());
    }
}
