//! Frames and the transports that carry them.
//!
//! Both sides of a session (the browser socket and the upstream socket) are
//! reduced to the same shape: a sink that accepts [`Frame`]s and a stream that
//! yields them. The service crate adapts its concrete WebSocket types into a
//! [`Transport`], which keeps the relay logic independent of axum and
//! tungstenite.

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt, channel::mpsc};
use std::{fmt, ops::Deref, pin::Pin, str::Utf8Error};

/// Close code sent on an orderly close.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code sent when the proxy itself is shutting down.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code sent when no usable credential is configured.
pub const CLOSE_MISSING_CREDENTIAL: u16 = 4003;

/// A single unit of data on one direction of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(Utf8Text),
    Binary(Bytes),
    /// The peer is closing this direction. Never relayed.
    Close(Option<CloseFrame>),
}

impl Frame {
    /// Builds a close frame with the given code and an empty reason.
    pub fn close(code: u16) -> Self {
        Frame::Close(Some(CloseFrame {
            code,
            reason: String::new(),
        }))
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Frame::Close(_))
    }

    /// Size of the payload in bytes, for log lines.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
            Frame::Close(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// UTF-8 text held in shared [`Bytes`]. Cloning a text frame bumps a
/// reference count instead of copying the payload.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Utf8Text(Bytes);

impl Utf8Text {
    pub const fn from_static(text: &'static str) -> Self {
        Self(Bytes::from_static(text.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: every constructor takes a `str` or validates the bytes.
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }
}

impl Deref for Utf8Text {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for Utf8Text {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Debug for Utf8Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for Utf8Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Utf8Text {
    fn from(text: String) -> Self {
        Self(Bytes::from(text))
    }
}

impl From<&str> for Utf8Text {
    fn from(text: &str) -> Self {
        Self(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl TryFrom<Bytes> for Utf8Text {
    type Error = Utf8Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        std::str::from_utf8(&bytes)?;
        Ok(Self(bytes))
    }
}

impl From<Utf8Text> for Bytes {
    fn from(text: Utf8Text) -> Self {
        text.0
    }
}

impl PartialEq<str> for Utf8Text {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Utf8Text {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// Which way a frame is travelling through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToUpstream => write!(f, "client->upstream"),
            Direction::UpstreamToClient => write!(f, "upstream->client"),
        }
    }
}

/// An I/O failure on either transport, carried as text so that errors from
/// different WebSocket stacks share one type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(err: impl fmt::Display) -> Self {
        Self(err.to_string())
    }
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// One bidirectional connection, split into its writing and reading halves.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Frame, Error = TransportError> + Send + 'static,
        St: Stream<Item = Result<Frame, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    pub fn split(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }

    /// Two transports wired back to back over unbounded in-memory channels:
    /// whatever is sent on one is received on the other.
    pub fn in_memory_pair() -> (Transport, Transport) {
        let (left_tx, left_rx) = mpsc::unbounded::<Frame>();
        let (right_tx, right_rx) = mpsc::unbounded::<Frame>();
        let left = Transport::new(
            right_tx.sink_map_err(TransportError::new),
            left_rx.map(Ok),
        );
        let right = Transport::new(
            left_tx.sink_map_err(TransportError::new),
            right_rx.map(Ok),
        );
        (left, right)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}
