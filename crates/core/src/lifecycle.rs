//! Session lifecycle: the state machine, termination reasons, and the latch
//! that makes teardown happen once.

use crate::classify::FailureSignal;
use crate::frame::{CLOSE_GOING_AWAY, CLOSE_MISSING_CREDENTIAL, CLOSE_NORMAL};
use crate::protocol::ClientSignal;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid session transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Tracks where a session is. Transitions only move forward.
#[derive(Debug, Clone)]
pub struct SessionPhase {
    current: SessionState,
    reached_active: bool,
}

impl Default for SessionPhase {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionPhase {
    pub fn new() -> Self {
        Self {
            current: SessionState::Connecting,
            reached_active: false,
        }
    }

    pub fn current(&self) -> SessionState {
        self.current
    }

    pub fn reached_active(&self) -> bool {
        self.reached_active
    }

    pub fn advance(&mut self, to: SessionState) -> Result<(), InvalidTransition> {
        use SessionState::*;
        let allowed = matches!(
            (self.current, to),
            (Connecting, Handshaking)
                | (Connecting, Closing)
                | (Handshaking, Active)
                | (Handshaking, Closing)
                | (Active, Closing)
                | (Closing, Closed)
        );
        if !allowed {
            return Err(InvalidTransition {
                from: self.current,
                to,
            });
        }
        self.current = to;
        self.reached_active |= to == Active;
        Ok(())
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminationReason {
    MissingCredential,
    /// The handshake failed; the session never became active.
    Handshake(FailureSignal),
    ClientClosed,
    ClientFailed { error: String },
    UpstreamClosed,
    UpstreamFailed { error: String },
    /// The upstream reported a fatal error while the session was active.
    UpstreamFailure(FailureSignal),
    Shutdown,
    Internal { error: String },
}

impl TerminationReason {
    /// Whether the client is still there to be told anything.
    pub fn client_reachable(&self) -> bool {
        !matches!(
            self,
            TerminationReason::ClientClosed | TerminationReason::ClientFailed { .. }
        )
    }

    /// The single message to send the client before closing, if any.
    pub fn client_notice(&self) -> Option<ClientSignal> {
        match self {
            TerminationReason::Handshake(signal) | TerminationReason::UpstreamFailure(signal) => {
                ClientSignal::for_failure(signal)
            }
            _ => None,
        }
    }

    pub fn close_code(&self) -> u16 {
        match self {
            TerminationReason::MissingCredential => CLOSE_MISSING_CREDENTIAL,
            TerminationReason::Shutdown => CLOSE_GOING_AWAY,
            _ => CLOSE_NORMAL,
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::MissingCredential => write!(f, "missing credential"),
            TerminationReason::Handshake(signal) => write!(f, "handshake failed ({signal})"),
            TerminationReason::ClientClosed => write!(f, "client closed"),
            TerminationReason::ClientFailed { error } => {
                write!(f, "client transport failed: {error}")
            }
            TerminationReason::UpstreamClosed => write!(f, "upstream closed"),
            TerminationReason::UpstreamFailed { error } => {
                write!(f, "upstream transport failed: {error}")
            }
            TerminationReason::UpstreamFailure(signal) => write!(f, "upstream error ({signal})"),
            TerminationReason::Shutdown => write!(f, "proxy shutting down"),
            TerminationReason::Internal { error } => write!(f, "internal error: {error}"),
        }
    }
}

/// Lets exactly one caller through, no matter how many race for it.
#[derive(Debug, Default)]
pub struct TeardownLatch(AtomicBool);

impl TeardownLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for the first caller only.
    pub fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FailureKind;
    use std::sync::Arc;

    #[test]
    fn happy_path_transitions() {
        let mut phase = SessionPhase::new();
        for next in [
            SessionState::Handshaking,
            SessionState::Active,
            SessionState::Closing,
            SessionState::Closed,
        ] {
            phase.advance(next).unwrap();
        }
        assert_eq!(phase.current(), SessionState::Closed);
        assert!(phase.reached_active());
    }

    #[test]
    fn setup_failure_skips_active() {
        let mut phase = SessionPhase::new();
        phase.advance(SessionState::Handshaking).unwrap();
        phase.advance(SessionState::Closing).unwrap();
        phase.advance(SessionState::Closed).unwrap();
        assert!(!phase.reached_active());
    }

    #[test]
    fn states_are_never_revisited() {
        let mut phase = SessionPhase::new();
        phase.advance(SessionState::Handshaking).unwrap();
        phase.advance(SessionState::Active).unwrap();

        let err = phase.advance(SessionState::Handshaking).unwrap_err();
        assert_eq!(err.from, SessionState::Active);
        assert!(phase.advance(SessionState::Active).is_err());
        assert!(phase.advance(SessionState::Closed).is_err());
        assert_eq!(phase.current(), SessionState::Active);
    }

    #[test]
    fn notices_and_close_codes() {
        let quota = FailureSignal::new(FailureKind::QuotaExceeded, "Quota exceeded");
        assert_eq!(
            TerminationReason::Handshake(quota.clone()).client_notice(),
            Some(ClientSignal::QuotaExceeded)
        );
        assert_eq!(
            TerminationReason::UpstreamFailure(quota).client_notice(),
            Some(ClientSignal::QuotaExceeded)
        );
        assert_eq!(TerminationReason::UpstreamClosed.client_notice(), None);

        assert_eq!(TerminationReason::MissingCredential.close_code(), 4003);
        assert_eq!(TerminationReason::Shutdown.close_code(), 1001);
        assert_eq!(TerminationReason::UpstreamClosed.close_code(), 1000);

        assert!(!TerminationReason::ClientClosed.client_reachable());
        assert!(
            !TerminationReason::ClientFailed {
                error: "reset".into()
            }
            .client_reachable()
        );
        assert!(TerminationReason::UpstreamClosed.client_reachable());
    }

    #[test]
    fn latch_admits_exactly_one_of_many_racers() {
        let latch = Arc::new(TeardownLatch::new());
        let winners: usize = (0..16)
            .map(|_| {
                let latch = latch.clone();
                std::thread::spawn(move || latch.claim())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
        assert!(!latch.claim());
    }
}
