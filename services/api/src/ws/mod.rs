//! WebSocket Session Proxying
//!
//! Each browser connection becomes one proxied live session:
//!
//! - `client`: adapts the axum socket into a `Transport`.
//! - `handshake`: opens the upstream and negotiates setup.
//! - `relay`: the two frame pumps that run while the session is active.
//! - `teardown`: closes both sides exactly once.
//! - `session`: the coordinator tying the stages together.

mod client;
mod handshake;
mod relay;
pub mod session;
mod teardown;

use robai_core::FrameSink;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

pub use handshake::UpstreamHandshake;
pub use relay::{DuplexRelay, ExitReason, RelayCounters};
pub use session::{SessionReport, run_session, ws_handler};
pub use teardown::SessionTeardown;

/// A sink shared between the pump that owns it and teardown.
pub type SharedSink = Arc<Mutex<FrameSink>>;

pub(crate) fn shared(sink: FrameSink) -> SharedSink {
    Arc::new(Mutex::new(sink))
}

/// Resolves once shutdown has been requested. Never resolves if the sender
/// is gone without ever requesting it.
pub(crate) async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
