//! Wire formats on both sides of the proxy.
//!
//! Outbound to the upstream: the `setup` frame and the optional kickoff turn.
//! Inbound from the upstream: just enough of each message to spot errors and
//! turn boundaries; everything else is ignored because frames are relayed
//! verbatim. Outbound to the client: the three signals the proxy itself
//! emits.

use crate::classify::{FailureKind, FailureSignal};
use crate::frame::Frame;
use crate::profile::{GenerationConfig, Profile};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Client-visible error text for quota exhaustion.
pub const QUOTA_EXCEEDED: &str = "QUOTA_EXCEEDED";

const UNSPECIFIED_REJECTION: &str = "upstream rejected setup";

// --- Upstream, outbound ---

#[derive(Serialize, Debug)]
struct SetupMessage<'a> {
    setup: Setup<'a>,
}

#[derive(Serialize, Debug)]
struct Setup<'a> {
    model: &'a str,
    generation_config: &'a GenerationConfig,
    system_instruction: Content<'a>,
}

#[derive(Serialize, Debug)]
struct ClientContentMessage<'a> {
    client_content: ClientContent<'a>,
}

#[derive(Serialize, Debug)]
struct ClientContent<'a> {
    turns: Vec<Content<'a>>,
    turn_complete: bool,
}

#[derive(Serialize, Debug)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize, Debug)]
struct Part<'a> {
    text: &'a str,
}

/// Builds the single setup frame that opens an upstream session.
pub fn setup_frame(profile: &Profile) -> serde_json::Result<Frame> {
    let message = SetupMessage {
        setup: Setup {
            model: &profile.model,
            generation_config: &profile.generation_config,
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: &profile.instruction,
                }],
            },
        },
    };
    Ok(Frame::Text(serde_json::to_string(&message)?.into()))
}

/// Builds a completed user turn carrying `text`, used to prompt the model to
/// speak first.
pub fn kickoff_frame(text: &str) -> serde_json::Result<Frame> {
    let message = ClientContentMessage {
        client_content: ClientContent {
            turns: vec![Content {
                role: Some("user"),
                parts: vec![Part { text }],
            }],
            turn_complete: true,
        },
    };
    Ok(Frame::Text(serde_json::to_string(&message)?.into()))
}

// --- Upstream, inbound ---

/// The subset of an upstream message the proxy looks at.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamMessage {
    #[serde(default)]
    pub error: Option<ErrorBody>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum ErrorBody {
    Plain(String),
    Detailed {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        status: Option<String>,
    },
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub interrupted: Option<bool>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
}

impl ErrorBody {
    pub fn message(&self) -> &str {
        let text = match self {
            ErrorBody::Plain(message) => Some(message.as_str()),
            ErrorBody::Detailed { message, status } => message
                .as_deref()
                .filter(|m| !m.trim().is_empty())
                .or(status.as_deref()),
        };
        text.filter(|t| !t.trim().is_empty())
            .unwrap_or(UNSPECIFIED_REJECTION)
    }
}

impl UpstreamMessage {
    pub fn failure(&self) -> Option<FailureSignal> {
        self.error
            .as_ref()
            .map(|e| FailureSignal::from_upstream_message(e.message()))
    }
}

// --- Client, outbound ---

/// Messages the proxy itself sends to the client, as opposed to frames it
/// relays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientSignal {
    /// `{"setupComplete": true}`
    SetupComplete,
    /// `{"error": "QUOTA_EXCEEDED"}`
    QuotaExceeded,
    /// `{"error": <message>}`
    Error(String),
}

impl ClientSignal {
    /// The notice matching a failure, if the client should hear about it.
    /// Transport failures are reported by closing, not by a message.
    pub fn for_failure(signal: &FailureSignal) -> Option<Self> {
        match signal.kind {
            FailureKind::QuotaExceeded => Some(ClientSignal::QuotaExceeded),
            FailureKind::SetupError => Some(ClientSignal::Error(signal.message.clone())),
            FailureKind::TransportError => None,
        }
    }

    pub fn into_frame(self) -> Frame {
        let value = match self {
            ClientSignal::SetupComplete => json!({ "setupComplete": true }),
            ClientSignal::QuotaExceeded => json!({ "error": QUOTA_EXCEEDED }),
            ClientSignal::Error(message) => json!({ "error": message }),
        };
        Frame::Text(value.to_string().into())
    }
}
