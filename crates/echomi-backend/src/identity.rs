//! Identity provider seam and the bearer credential it hands out.

use crate::BackendError;
use async_trait::async_trait;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A bearer ID token. Wiped from memory on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Value for the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    pub fn is_empty(&self) -> bool {
        self.token.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Produces the signed-in user's identity on demand.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The user's uid, if someone is signed in
    async fn current_uid(&self) -> Option<String>;

    /// A bearer token for authenticated calls.
    ///
    /// `force_refresh` asks the provider to mint a fresh token rather than
    /// return a cached one.
    async fn id_token(&self, force_refresh: bool) -> Result<Credential, BackendError>;
}

/// Identity fixed at startup (headless daemon, tests)
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    uid: Option<String>,
    token: Option<Credential>,
}

impl StaticIdentity {
    pub fn new(uid: Option<String>, token: Option<String>) -> Self {
        Self {
            uid: uid.filter(|u| !u.trim().is_empty()),
            token: token.map(Credential::new).filter(|c| !c.is_empty()),
        }
    }

    /// No signed-in user
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_uid(&self) -> Option<String> {
        self.uid.clone()
    }

    async fn id_token(&self, _force_refresh: bool) -> Result<Credential, BackendError> {
        self.token.clone().ok_or(BackendError::AuthUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_redacted() {
        let cred = Credential::new("secret-token");
        assert_eq!(format!("{:?}", cred), "Credential(<redacted>)");
        assert_eq!(cred.bearer(), "Bearer secret-token");
    }

    #[tokio::test]
    async fn test_static_identity() {
        let id = StaticIdentity::new(Some("uid-1".into()), Some("tok".into()));
        assert_eq!(id.current_uid().await.as_deref(), Some("uid-1"));
        assert_eq!(id.id_token(true).await.unwrap().bearer(), "Bearer tok");
    }

    #[tokio::test]
    async fn test_anonymous_identity() {
        let id = StaticIdentity::new(Some("  ".into()), Some(String::new()));
        assert!(id.current_uid().await.is_none());
        assert!(matches!(
            id.id_token(false).await,
            Err(BackendError::AuthUnavailable)
        ));
    }
}
