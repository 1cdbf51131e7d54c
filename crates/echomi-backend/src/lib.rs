//! Echomi Backend Client
//!
//! Narrow client for the call-screening backend the companion reports to:
//! - Approval decisions for OTP sharing
//! - Delivery OTP lookup
//! - Batched upload of local SMS for an active call
//! - OTP relay from incoming SMS
//! - Push token registration
//! - Health check
//!
//! # Example
//!
//! ```ignore
//! use echomi_backend::{Backend, HttpBackend, OtpQuery};
//! use std::time::Duration;
//!
//! let backend = HttpBackend::new("https://api.echomi.app", Duration::from_secs(30))?;
//! backend.health_check().await?;
//! let result = backend.fetch_otp(&OtpQuery::new("uid-1").with_sender("AMAZON")).await?;
//! ```

mod http;
pub mod identity;
pub mod types;

pub use http::HttpBackend;
pub use identity::{Credential, IdentityProvider, StaticIdentity};
pub use types::{
    ApprovalAck, ApprovalDecision, OtpQuery, OtpReport, OtpResult, PushTokenRegistration,
    SmsBatch, SmsDirection, SmsRecord, StorageType,
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors from backend operations
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Backend rejected request: {0}")]
    Rejected(String),

    #[error("Identity credential unavailable")]
    AuthUnavailable,

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

impl BackendError {
    /// Whether a retry could plausibly succeed (network trouble or a 5xx)
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            BackendError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// The backend collaborator as seen by the push orchestrator.
///
/// Every call is a single request; retry policy belongs to the caller.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `POST approval`: submit the user's OTP-sharing decision
    async fn submit_approval(&self, decision: &ApprovalDecision)
        -> Result<ApprovalAck, BackendError>;

    /// `GET delivery/otp/{identity}`: look up the latest delivery OTP
    async fn fetch_otp(&self, query: &OtpQuery) -> Result<OtpResult, BackendError>;

    /// `POST api/sms/call/store`: upload one batch of local SMS (bearer auth)
    async fn upload_sms_batch(
        &self,
        credential: &Credential,
        batch: &SmsBatch,
    ) -> Result<(), BackendError>;

    /// `POST delivery/otp`: relay an OTP extracted from an incoming SMS
    async fn relay_otp(&self, report: &OtpReport) -> Result<(), BackendError>;

    /// `PUT api/settings/fcm-token`: tell the backend where to push (bearer auth)
    async fn register_push_token(
        &self,
        credential: &Credential,
        push_token: &str,
    ) -> Result<(), BackendError>;

    /// `GET /`: 2xx when the backend is reachable
    async fn health_check(&self) -> Result<(), BackendError>;
}
