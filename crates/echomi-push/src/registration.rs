//! Push token registration, so the backend knows where to deliver events.

use crate::scope::TaskScope;
use echomi_backend::{Backend, IdentityProvider};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered,
    /// Blank token from the host
    EmptyToken,
    /// Nobody signed in; nothing was sent
    NoCredential,
    Failed(String),
}

/// Sends each new push token to the backend once
#[derive(Clone)]
pub struct PushTokenRegistrar {
    backend: Arc<dyn Backend>,
    identity: Arc<dyn IdentityProvider>,
    scope: Arc<TaskScope>,
}

impl PushTokenRegistrar {
    pub fn new(
        backend: Arc<dyn Backend>,
        identity: Arc<dyn IdentityProvider>,
        scope: Arc<TaskScope>,
    ) -> Self {
        Self {
            backend,
            identity,
            scope,
        }
    }

    /// Register `token` in the background
    pub fn on_new_token(&self, token: String) -> JoinHandle<RegistrationOutcome> {
        let this = self.clone();
        self.scope.spawn(async move { this.register(&token).await })
    }

    pub async fn register(&self, token: &str) -> RegistrationOutcome {
        let token = token.trim();
        if token.is_empty() {
            log::warn!("Ignoring empty push token");
            return RegistrationOutcome::EmptyToken;
        }

        let credential = match self.identity.id_token(false).await {
            Ok(credential) => credential,
            Err(e) => {
                log::warn!("Cannot register push token: {}", e);
                return RegistrationOutcome::NoCredential;
            }
        };

        match self.backend.register_push_token(&credential, token).await {
            Ok(()) => {
                log::info!("Push token registered with backend");
                RegistrationOutcome::Registered
            }
            Err(e) => {
                log::error!("Failed to register push token: {}", e);
                RegistrationOutcome::Failed(e.to_string())
            }
        }
    }
}
