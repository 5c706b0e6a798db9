//! Credential material used to authorize outbound backend calls.
//!
//! Acquisition and rotation live outside this crate; a [`CredentialProvider`]
//! hands out the current credential whenever a client handle is requested.

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Access key pair plus an optional session token
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_key_id: String,
    access_key_secret: String,
    security_token: Option<String>,
}

impl Credential {
    pub fn new(access_key_id: impl Into<String>, access_key_secret: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
            security_token: None,
        }
    }

    pub fn with_security_token(mut self, token: impl Into<String>) -> Self {
        self.security_token = Some(token.into());
        self
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn access_key_secret(&self) -> &str {
        &self.access_key_secret
    }

    pub fn security_token(&self) -> Option<&str> {
        self.security_token.as_deref()
    }

    /// Stable identity used to key cached client handles.
    ///
    /// Only a truncated digest is exposed, never the secret itself.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.access_key_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.access_key_secret.as_bytes());
        hasher.update([0u8]);
        if let Some(token) = &self.security_token {
            hasher.update(token.as_bytes());
        }
        hex::encode(&hasher.finalize()[..16])
    }
}

// Secrets stay out of logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .field(
                "security_token",
                &self.security_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Source of the credential currently in effect
pub trait CredentialProvider: Send + Sync {
    fn credential(&self) -> Credential;
}

/// Provider returning one fixed credential for the process lifetime
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credential: Credential,
}

impl StaticCredentialProvider {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }

    pub fn shared(credential: Credential) -> Arc<dyn CredentialProvider> {
        Arc::new(Self::new(credential))
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn credential(&self) -> Credential {
        self.credential.clone()
    }
}
