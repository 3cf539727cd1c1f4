//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the read-only
//! resources every session borrows: configuration, the profile catalog, the
//! credential gate, the upstream connector and the telemetry sink.

use crate::{config::Config, upstream::UpstreamConnector};
use robai_core::{CredentialGate, ProfileCatalog, TelemetrySink};
use std::sync::Arc;
use tokio::sync::watch;

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<ProfileCatalog>,
    pub credentials: CredentialGate,
    pub connector: Arc<dyn UpstreamConnector>,
    pub telemetry: Arc<dyn TelemetrySink>,
    /// Flips to `true` once the process starts shutting down.
    pub shutdown: watch::Receiver<bool>,
}
