use crate::classify::{FailureKind, FailureSignal};
use crate::frame::TransportError;

/// Fatal errors that end a session before or during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no usable upstream credential is configured")]
    MissingCredential,
    #[error("upstream setup failed: {0}")]
    Setup(String),
    #[error("upstream quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl SessionError {
    /// The failure to report, for every error except a missing credential
    /// (which is answered with a close code instead).
    pub fn failure_signal(&self) -> Option<FailureSignal> {
        match self {
            SessionError::MissingCredential => None,
            SessionError::Setup(message) => {
                Some(FailureSignal::new(FailureKind::SetupError, message.clone()))
            }
            SessionError::QuotaExceeded(message) => {
                Some(FailureSignal::new(FailureKind::QuotaExceeded, message.clone()))
            }
            SessionError::Transport(message) => {
                Some(FailureSignal::new(FailureKind::TransportError, message.clone()))
            }
        }
    }
}

impl From<FailureSignal> for SessionError {
    fn from(signal: FailureSignal) -> Self {
        match signal.kind {
            FailureKind::QuotaExceeded => SessionError::QuotaExceeded(signal.message),
            FailureKind::SetupError => SessionError::Setup(signal.message),
            FailureKind::TransportError => SessionError::Transport(signal.message),
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Transport(err.0)
    }
}
