//! RobAI Core
//!
//! Transport-agnostic building blocks for proxying a live multimedia session
//! between a browser client and the upstream bidirectional generation API.
//! Nothing in this crate opens sockets or binds ports: the service crate
//! supplies concrete transports, and this crate decides what to do with the
//! frames flowing through them.

pub mod classify;
pub mod credential;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod profile;
pub mod protocol;
pub mod telemetry;

pub use classify::{AckOutcome, FailureKind, FailureSignal, Inspection};
pub use credential::{Credential, CredentialGate, CredentialProvider};
pub use error::SessionError;
pub use frame::{
    CloseFrame, Direction, Frame, FrameSink, FrameStream, Transport, TransportError, Utf8Text,
};
pub use lifecycle::{SessionPhase, SessionState, TeardownLatch, TerminationReason};
pub use profile::{Profile, ProfileCatalog};
pub use protocol::ClientSignal;
pub use telemetry::{SessionTelemetry, TelemetryEvent, TelemetrySink};
