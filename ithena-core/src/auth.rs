//! Auth token storage.
//!
//! The platform token lives in the OS secret store under service
//! `"ithena-cli"`, key `"authToken"`. The sink reads it at every flush to
//! decide between remote delivery and local persistence, so access goes
//! through the [`TokenProvider`] trait: the keyring-backed implementation is
//! used in production and an in-memory one in tests.

use std::sync::Mutex;

/// Secret-store service name.
pub const KEYRING_SERVICE: &str = "ithena-cli";

/// Secret-store entry key for the platform auth token.
pub const KEYRING_TOKEN_KEY: &str = "authToken";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to access the OS secret store: {0}")]
    Keyring(#[from] keyring::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// TokenProvider
// ─────────────────────────────────────────────────────────────────────────────

/// Read/write access to the stored auth token.
pub trait TokenProvider: Send + Sync {
    /// The current token, or `Ok(None)` when no (non-empty) token is stored.
    fn token(&self) -> Result<Option<String>, AuthError>;

    /// Persist a token, replacing any existing one.
    fn store(&self, token: &str) -> Result<(), AuthError>;

    /// Remove the stored token. Returns `Ok(false)` when nothing was stored.
    fn clear(&self) -> Result<bool, AuthError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyring-backed provider
// ─────────────────────────────────────────────────────────────────────────────

/// Production provider backed by the OS secret store.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringTokenProvider;

impl KeyringTokenProvider {
    pub fn new() -> Self {
        KeyringTokenProvider
    }

    fn entry() -> Result<keyring::Entry, keyring::Error> {
        keyring::Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_KEY)
    }
}

impl TokenProvider for KeyringTokenProvider {
    fn token(&self) -> Result<Option<String>, AuthError> {
        match Self::entry()?.get_password() {
            Ok(token) if token.is_empty() => Ok(None),
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, token: &str) -> Result<(), AuthError> {
        Self::entry()?.set_password(token)?;
        Ok(())
    }

    fn clear(&self) -> Result<bool, AuthError> {
        match Self::entry()?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory provider
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local provider for tests and environments without a secret store.
#[derive(Debug, Default)]
pub struct MemoryTokenProvider {
    token: Mutex<Option<String>>,
}

impl MemoryTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider pre-loaded with a token.
    pub fn with_token(token: &str) -> Self {
        MemoryTokenProvider {
            token: Mutex::new(Some(token.to_string())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TokenProvider for MemoryTokenProvider {
    fn token(&self) -> Result<Option<String>, AuthError> {
        Ok(self.lock().clone().filter(|t| !t.is_empty()))
    }

    fn store(&self, token: &str) -> Result<(), AuthError> {
        *self.lock() = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<bool, AuthError> {
        Ok(self.lock().take().is_some())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
