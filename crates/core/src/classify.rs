//! Classification of upstream frames.
//!
//! Two consumers share this module. The handshake calls [`classify_ack`] on
//! the single acknowledgment frame to decide whether the session may become
//! active. The upstream->client pump calls [`inspect_upstream`] on every frame
//! it forwards, purely to observe errors and turn boundaries.
//!
//! Quota detection is a case-insensitive substring match on the error text.
//! The upstream protocol exposes no structured quota code, so the heuristic
//! is confined to [`is_quota_message`].

use crate::frame::{CloseFrame, Frame};
use crate::protocol::UpstreamMessage;
use serde::Serialize;
use std::fmt;

/// What went wrong, as surfaced to the client and to telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    QuotaExceeded,
    SetupError,
    TransportError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::QuotaExceeded => write!(f, "quota_exceeded"),
            FailureKind::SetupError => write!(f, "setup_error"),
            FailureKind::TransportError => write!(f, "transport_error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSignal {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureSignal {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classifies an upstream error text as quota exhaustion or a generic
    /// rejection.
    pub fn from_upstream_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_quota_message(&message) {
            Self::new(FailureKind::QuotaExceeded, message)
        } else {
            Self::new(FailureKind::SetupError, message)
        }
    }

    pub fn is_quota(&self) -> bool {
        self.kind == FailureKind::QuotaExceeded
    }
}

impl fmt::Display for FailureSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

pub fn is_quota_message(message: &str) -> bool {
    message.to_lowercase().contains("quota")
}

/// Result of classifying the setup acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Ready,
    QuotaExceeded(String),
    SetupError(String),
}

impl AckOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, AckOutcome::Ready)
    }

    pub fn into_result(self) -> Result<(), FailureSignal> {
        match self {
            AckOutcome::Ready => Ok(()),
            AckOutcome::QuotaExceeded(message) => {
                Err(FailureSignal::new(FailureKind::QuotaExceeded, message))
            }
            AckOutcome::SetupError(message) => {
                Err(FailureSignal::new(FailureKind::SetupError, message))
            }
        }
    }

    fn from_signal(signal: FailureSignal) -> Self {
        match signal.kind {
            FailureKind::QuotaExceeded => AckOutcome::QuotaExceeded(signal.message),
            _ => AckOutcome::SetupError(signal.message),
        }
    }
}

const CLOSED_DURING_SETUP: &str = "upstream closed during setup";

/// Classifies the acknowledgment returned after the setup frame.
///
/// A payload that does not parse still counts as `Ready`: receiving any
/// response at all proves the upstream accepted the connection. A close frame
/// is never `Ready`.
pub fn classify_ack(ack: &Frame) -> AckOutcome {
    match ack {
        Frame::Text(text) => classify_ack_payload(text.as_bytes()),
        Frame::Binary(data) => classify_ack_payload(data),
        Frame::Close(close) => {
            let reason = close
                .as_ref()
                .map(|c| c.reason.trim())
                .filter(|r| !r.is_empty())
                .unwrap_or(CLOSED_DURING_SETUP);
            AckOutcome::from_signal(FailureSignal::from_upstream_message(reason))
        }
    }
}

fn classify_ack_payload(payload: &[u8]) -> AckOutcome {
    match serde_json::from_slice::<UpstreamMessage>(payload) {
        Ok(message) => match message.failure() {
            Some(signal) => AckOutcome::from_signal(signal),
            None => AckOutcome::Ready,
        },
        Err(_) => AckOutcome::Ready,
    }
}

/// Observations made on one upstream->client frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inspection {
    pub failure: Option<FailureSignal>,
    pub interrupted: bool,
    pub turn_complete: bool,
    /// Parse error text for a text frame that was not valid protocol JSON.
    pub malformed: Option<String>,
}

impl Inspection {
    pub fn is_quiet(&self) -> bool {
        self == &Inspection::default()
    }
}

/// Inspects a frame travelling to the client. Never fails.
///
/// Text frames are always parsed. Binary frames are parsed only when they
/// look like a JSON object, since the upstream may deliver its messages in
/// binary frames; raw audio is skipped, and a binary frame that merely
/// started with `{` is not reported as malformed.
pub fn inspect_upstream(frame: &Frame) -> Inspection {
    match frame {
        Frame::Text(text) => match serde_json::from_str::<UpstreamMessage>(text) {
            Ok(message) => inspect_message(&message),
            Err(e) => Inspection {
                malformed: Some(e.to_string()),
                ..Default::default()
            },
        },
        Frame::Binary(data) if looks_like_json(data) => {
            serde_json::from_slice::<UpstreamMessage>(data)
                .map(|message| inspect_message(&message))
                .unwrap_or_default()
        }
        Frame::Binary(_) | Frame::Close(_) => Inspection::default(),
    }
}

/// A close from the upstream is only a failure when its reason mentions
/// quota exhaustion; any other close is an ordinary end of session.
pub fn close_failure(close: Option<&CloseFrame>) -> Option<FailureSignal> {
    close
        .filter(|c| is_quota_message(&c.reason))
        .map(|c| FailureSignal::new(FailureKind::QuotaExceeded, c.reason.clone()))
}

fn inspect_message(message: &UpstreamMessage) -> Inspection {
    let content = message.server_content.as_ref();
    Inspection {
        failure: message.failure(),
        interrupted: content.and_then(|c| c.interrupted).unwrap_or(false),
        turn_complete: content.and_then(|c| c.turn_complete).unwrap_or(false),
        malformed: None,
    }
}

fn looks_like_json(data: &[u8]) -> bool {
    data.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{')
}
