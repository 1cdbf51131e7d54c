//! Echomi Push Orchestrator
//!
//! Reacts to server push events on behalf of the call-screening service:
//!
//! | event | reaction |
//! |---|---|
//! | `emergency_alert` | loud alarm (max 120s) and a call-back notification |
//! | `otp_approval_request` | actionable Approve / Deny notification, expires after 60s |
//! | `delivery_otp_ready` | OTP lookup with up to 3 attempts, result notification |
//! | `fetch_sms_request` | background upload of the most recent local SMS |
//!
//! Incoming delivery SMS are additionally scanned for OTPs, which are relayed
//! to the backend, and every new push token is registered with it.
//!
//! # Example
//!
//! ```ignore
//! use echomi_push::{Collaborators, Orchestrator, OrchestratorConfig};
//! use std::sync::Arc;
//!
//! let orchestrator = Arc::new(Orchestrator::new(collaborators, OrchestratorConfig::default()));
//! let router = orchestrator.router();
//! router.handle(&payload);
//! // ...
//! orchestrator.shutdown();
//! ```

pub mod alarm;
pub mod approval;
pub mod collection;
pub mod events;
pub mod orchestrator;
pub mod otp;
pub mod registration;
pub mod relay;
pub mod router;
pub mod scope;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use alarm::{AlarmConfig, AlarmController, AlarmDevice, AlarmError};
pub use approval::{ApprovalConfig, ApprovalCoordinator, ApprovalState, Decision, SubmitOutcome};
pub use collection::{
    BackgroundCollector, CollectionConfig, JobHandle, JobOutcome, LocalMessage, Mailbox,
    MessageStore, StoreError,
};
pub use events::{ApprovalRequest, CollectionJob, EventKind, PushEvent, ValidationError};
pub use orchestrator::{ActionError, Collaborators, HostAction, Orchestrator, OrchestratorConfig};
pub use otp::{OtpFetchCoordinator, OtpOutcome, RetryPolicy};
pub use registration::{PushTokenRegistrar, RegistrationOutcome};
pub use relay::{IncomingSms, IncomingSmsRelay, RelayOutcome};
pub use router::{PushEventRouter, PushHandler};
pub use scope::TaskScope;
