//! Adapts the browser's axum WebSocket into a [`Transport`].

use axum::extract::ws::{CloseFrame as AxumCloseFrame, Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt, future};
use robai_core::{CloseFrame, Frame, Transport, TransportError, Utf8Text};

pub fn client_transport(socket: WebSocket) -> Transport {
    let (socket_tx, socket_rx) = socket.split();
    let sink = socket_tx
        .sink_map_err(TransportError::new)
        .with(|frame: Frame| future::ready(to_axum_message(frame)));
    let stream = socket_rx.filter_map(|msg| {
        future::ready(match msg {
            Ok(msg) => from_axum_message(msg).transpose(),
            Err(e) => Some(Err(TransportError::new(e))),
        })
    });
    Transport::new(sink, stream)
}

/// Text payloads move between the two types without copying.
fn to_axum_message(frame: Frame) -> Result<Message, TransportError> {
    Ok(match frame {
        Frame::Text(text) => {
            Message::Text(Utf8Bytes::try_from(Bytes::from(text)).map_err(TransportError::new)?)
        }
        Frame::Binary(data) => Message::Binary(data),
        Frame::Close(close) => Message::Close(close.map(|c| AxumCloseFrame {
            code: c.code,
            reason: c.reason.into(),
        })),
    })
}

fn from_axum_message(msg: Message) -> Result<Option<Frame>, TransportError> {
    Ok(match msg {
        Message::Text(text) => Some(Frame::Text(
            Utf8Text::try_from(Bytes::from(text)).map_err(TransportError::new)?,
        )),
        Message::Binary(data) => Some(Frame::Binary(data)),
        Message::Close(close) => Some(Frame::Close(close.map(|c| CloseFrame {
            code: c.code,
            reason: c.reason.as_str().to_owned(),
        }))),
        Message::Ping(_) | Message::Pong(_) => None,
    })
}
