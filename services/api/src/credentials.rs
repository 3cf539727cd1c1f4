//! Environment-backed credential provider.

use robai_core::CredentialProvider;
use tracing::warn;

/// Reads the upstream API key from an environment variable on every call,
/// re-reading `.env` first so an edited key applies to the next session.
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    var: String,
    reload_dotenv: bool,
}

impl EnvCredentialProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            reload_dotenv: true,
        }
    }

    /// Reads the process environment only, without touching `.env`.
    pub fn without_dotenv(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            reload_dotenv: false,
        }
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn fetch(&self) -> Option<String> {
        if self.reload_dotenv {
            if let Err(e) = dotenvy::dotenv_override() {
                if !e.not_found() {
                    warn!(error = %e, "Failed to re-read .env");
                }
            }
        }
        std::env::var(&self.var).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robai_core::{CredentialGate, SessionError};
    use serial_test::serial;
    use std::{env, sync::Arc};

    const VAR: &str = "ROBAI_TEST_CREDENTIAL";

    #[test]
    #[serial]
    fn reads_the_configured_variable_each_time() {
        let gate = CredentialGate::new(Arc::new(EnvCredentialProvider::without_dotenv(VAR)));

        unsafe { env::set_var(VAR, "first-key") };
        assert_eq!(gate.authorize().unwrap().expose(), "first-key");

        unsafe { env::set_var(VAR, "rotated-key") };
        assert_eq!(gate.authorize().unwrap().expose(), "rotated-key");

        unsafe { env::remove_var(VAR) };
    }

    #[test]
    #[serial]
    fn unset_and_placeholder_values_are_missing() {
        let gate = CredentialGate::new(Arc::new(EnvCredentialProvider::without_dotenv(VAR)));

        unsafe { env::remove_var(VAR) };
        assert!(matches!(gate.authorize(), Err(SessionError::MissingCredential)));

        unsafe { env::set_var(VAR, "your_api_key_here") };
        assert!(matches!(gate.authorize(), Err(SessionError::MissingCredential)));

        unsafe { env::remove_var(VAR) };
    }
}
