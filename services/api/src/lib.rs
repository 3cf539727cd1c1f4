//! RobAI API Library Crate
//!
//! This library contains the WebSocket proxy service: configuration, the
//! environment credential provider, the upstream connector, the per-session
//! coordinator and routing. The `api` binary is a thin wrapper around this
//! library.

pub mod config;
pub mod credentials;
pub mod router;
pub mod state;
pub mod upstream;
pub mod ws;
