//! Per-session credential lookup.

use crate::error::SessionError;
use secrecy::{ExposeSecret, SecretString};
use std::{fmt, sync::Arc};

/// Values that ship in sample `.env` files and must never reach the upstream.
pub const PLACEHOLDER_CREDENTIALS: &[&str] = &["your_api_key_here"];

/// Source of the upstream credential. Queried once per session so that a
/// rotated key is picked up without a restart.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialProvider: Send + Sync {
    fn fetch(&self) -> Option<String>;
}

/// An upstream API key. Redacted in `Debug` output.
#[derive(Clone)]
pub struct Credential(SecretString);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(SecretString::from(secret.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// The first few characters, safe to log.
    pub fn preview(&self) -> String {
        self.expose().chars().take(4).collect()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({}...)", self.preview())
    }
}

/// Turns whatever the provider returns into a usable credential or
/// [`SessionError::MissingCredential`].
#[derive(Clone)]
pub struct CredentialGate {
    provider: Arc<dyn CredentialProvider>,
}

impl CredentialGate {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self { provider }
    }

    pub fn authorize(&self) -> Result<Credential, SessionError> {
        let raw = self.provider.fetch().ok_or(SessionError::MissingCredential)?;
        let trimmed = raw.trim();
        if trimmed.is_empty() || PLACEHOLDER_CREDENTIALS.contains(&trimmed) {
            return Err(SessionError::MissingCredential);
        }
        Ok(Credential::new(trimmed))
    }
}
