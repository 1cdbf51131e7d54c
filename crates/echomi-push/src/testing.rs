//! Deterministic fakes for every collaborator of the orchestrator.
//!
//! Enabled for this crate's own tests and, through the `test-utils`
//! feature, for downstream test crates.

use crate::alarm::{AlarmDevice, AlarmError};
use crate::collection::{LocalMessage, Mailbox, MessageStore, StoreError};
use crate::orchestrator::{Collaborators, Orchestrator, OrchestratorConfig};
use crate::router::PushEventRouter;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use echomi_backend::{
    ApprovalAck, ApprovalDecision, Backend, BackendError, Credential, IdentityProvider, OtpQuery,
    OtpReport, OtpResult, SmsBatch,
};
use echomi_notify::MemorySink;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Scripted reply to one OTP lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOtp {
    Found(String),
    NotFound,
    /// 503, worth retrying
    Fail,
    /// 400, permanent
    Reject,
}

/// In-memory backend that records every call
#[derive(Default)]
pub struct FakeBackend {
    otp_script: Mutex<VecDeque<FakeOtp>>,
    otp_queries: Mutex<Vec<OtpQuery>>,
    approvals: Mutex<Vec<ApprovalDecision>>,
    uploads: Mutex<Vec<(String, SmsBatch)>>,
    relays: Mutex<Vec<OtpReport>>,
    push_tokens: Mutex<Vec<(String, String)>>,
    health_checks: AtomicUsize,
    fail_approvals: AtomicBool,
    fail_uploads: AtomicBool,
    fail_push_tokens: AtomicBool,
    fail_health: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies for successive OTP lookups; once exhausted every lookup is
    /// not found
    pub fn script_otp(&self, replies: Vec<FakeOtp>) {
        *lock(&self.otp_script) = replies.into();
    }

    pub fn fail_approvals(&self, fail: bool) {
        self.fail_approvals.store(fail, Ordering::SeqCst);
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_push_tokens(&self, fail: bool) {
        self.fail_push_tokens.store(fail, Ordering::SeqCst);
    }

    pub fn fail_health(&self, fail: bool) {
        self.fail_health.store(fail, Ordering::SeqCst);
    }

    pub fn otp_queries(&self) -> Vec<OtpQuery> {
        lock(&self.otp_queries).clone()
    }

    pub fn approvals(&self) -> Vec<ApprovalDecision> {
        lock(&self.approvals).clone()
    }

    /// Bearer header and batch of every upload attempt
    pub fn uploads(&self) -> Vec<(String, SmsBatch)> {
        lock(&self.uploads).clone()
    }

    pub fn relays(&self) -> Vec<OtpReport> {
        lock(&self.relays).clone()
    }

    /// Bearer header and token of every registration attempt
    pub fn push_tokens(&self) -> Vec<(String, String)> {
        lock(&self.push_tokens).clone()
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    fn unavailable() -> BackendError {
        BackendError::Status {
            status: 503,
            body: "unavailable".into(),
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn submit_approval(
        &self,
        decision: &ApprovalDecision,
    ) -> Result<ApprovalAck, BackendError> {
        lock(&self.approvals).push(decision.clone());
        if self.fail_approvals.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(ApprovalAck {
            success: true,
            message: None,
            action: Some(if decision.approved { "approved" } else { "denied" }.into()),
        })
    }

    async fn fetch_otp(&self, query: &OtpQuery) -> Result<OtpResult, BackendError> {
        lock(&self.otp_queries).push(query.clone());
        let reply = lock(&self.otp_script)
            .pop_front()
            .unwrap_or(FakeOtp::NotFound);
        match reply {
            FakeOtp::Found(code) => Ok(OtpResult::found(code)),
            FakeOtp::NotFound => Ok(OtpResult::not_found()),
            FakeOtp::Fail => Err(Self::unavailable()),
            FakeOtp::Reject => Err(BackendError::Status {
                status: 400,
                body: "bad request".into(),
            }),
        }
    }

    async fn upload_sms_batch(
        &self,
        credential: &Credential,
        batch: &SmsBatch,
    ) -> Result<(), BackendError> {
        lock(&self.uploads).push((credential.bearer(), batch.clone()));
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(())
    }

    async fn relay_otp(&self, report: &OtpReport) -> Result<(), BackendError> {
        lock(&self.relays).push(report.clone());
        Ok(())
    }

    async fn register_push_token(
        &self,
        credential: &Credential,
        push_token: &str,
    ) -> Result<(), BackendError> {
        lock(&self.push_tokens).push((credential.bearer(), push_token.to_string()));
        if self.fail_push_tokens.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        if self.fail_health.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(())
    }
}

/// Identity with a fixed uid and token, recording token requests
#[derive(Default)]
pub struct FakeIdentity {
    uid: Option<String>,
    token: Option<String>,
    token_requests: Mutex<Vec<bool>>,
}

impl FakeIdentity {
    pub fn signed_in(uid: &str, token: &str) -> Self {
        Self {
            uid: Some(uid.to_string()),
            token: Some(token.to_string()),
            ..Self::default()
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    /// `force_refresh` flag of every token request, in order
    pub fn token_requests(&self) -> Vec<bool> {
        lock(&self.token_requests).clone()
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn current_uid(&self) -> Option<String> {
        self.uid.clone()
    }

    async fn id_token(&self, force_refresh: bool) -> Result<Credential, BackendError> {
        lock(&self.token_requests).push(force_refresh);
        self.token
            .as_deref()
            .map(Credential::new)
            .ok_or(BackendError::AuthUnavailable)
    }
}

/// Counts every host audio / power call
#[derive(Default)]
pub struct FakeAlarmDevice {
    audible_forced: AtomicUsize,
    keep_awake_acquired: AtomicUsize,
    keep_awake_released: AtomicUsize,
    tone_started: AtomicUsize,
    tone_stopped: AtomicUsize,
    fail_keep_awake: AtomicBool,
    fail_tone: AtomicBool,
}

impl FakeAlarmDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_keep_awake(&self, fail: bool) {
        self.fail_keep_awake.store(fail, Ordering::SeqCst);
    }

    pub fn fail_tone(&self, fail: bool) {
        self.fail_tone.store(fail, Ordering::SeqCst);
    }

    pub fn audible_forced(&self) -> usize {
        self.audible_forced.load(Ordering::SeqCst)
    }

    pub fn keep_awake_acquired(&self) -> usize {
        self.keep_awake_acquired.load(Ordering::SeqCst)
    }

    pub fn keep_awake_released(&self) -> usize {
        self.keep_awake_released.load(Ordering::SeqCst)
    }

    pub fn tone_stopped(&self) -> usize {
        self.tone_stopped.load(Ordering::SeqCst)
    }

    /// Keep-awake currently held
    pub fn is_held(&self) -> bool {
        self.keep_awake_acquired() > self.keep_awake_released()
    }

    pub fn tone_playing(&self) -> bool {
        self.tone_started.load(Ordering::SeqCst) > self.tone_stopped()
    }
}

impl AlarmDevice for FakeAlarmDevice {
    fn force_audible(&self) -> Result<(), AlarmError> {
        self.audible_forced.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn acquire_keep_awake(&self) -> Result<(), AlarmError> {
        if self.fail_keep_awake.load(Ordering::SeqCst) {
            return Err(AlarmError::KeepAwake("denied".into()));
        }
        self.keep_awake_acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release_keep_awake(&self) {
        self.keep_awake_released.fetch_add(1, Ordering::SeqCst);
    }

    fn start_tone(&self) -> Result<(), AlarmError> {
        if self.fail_tone.load(Ordering::SeqCst) {
            return Err(AlarmError::Tone("no audio focus".into()));
        }
        self.tone_started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_tone(&self) {
        self.tone_stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Message store backed by a vector
#[derive(Default)]
pub struct FakeMessageStore {
    messages: Mutex<Vec<LocalMessage>>,
    delay: Mutex<Option<Duration>>,
    fail: AtomicBool,
}

impl FakeMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_messages(&self, messages: Vec<LocalMessage>) {
        *lock(&self.messages) = messages;
    }

    /// Make each read take `delay` (tokio time)
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageStore for FakeMessageStore {
    async fn read_recent(&self, limit: usize) -> Result<Vec<LocalMessage>, StoreError> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::PermissionDenied);
        }
        let mut messages = lock(&self.messages).clone();
        messages.sort_by(|a, b| b.date.cmp(&a.date));
        messages.truncate(limit);
        Ok(messages)
    }
}

/// A local message `offset_secs` after a fixed epoch
pub fn message(address: &str, body: &str, offset_secs: i64, mailbox: Mailbox) -> LocalMessage {
    let base: DateTime<Utc> = Utc
        .timestamp_opt(1_700_000_000, 0)
        .single()
        .unwrap_or_default();
    LocalMessage {
        address: address.to_string(),
        body: body.to_string(),
        date: base + chrono::Duration::seconds(offset_secs),
        mailbox,
    }
}

/// Push payload from key/value pairs
pub fn payload(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A fully faked orchestrator and handles on every fake
pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub identity: Arc<FakeIdentity>,
    pub sink: Arc<MemorySink>,
    pub device: Arc<FakeAlarmDevice>,
    pub store: Arc<FakeMessageStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    /// Signed in as `uid-1` with token `token-1`, default timings
    pub fn new() -> Self {
        Self::with(
            FakeIdentity::signed_in("uid-1", "token-1"),
            OrchestratorConfig::default(),
        )
    }

    pub fn with(identity: FakeIdentity, config: OrchestratorConfig) -> Self {
        let backend = Arc::new(FakeBackend::new());
        let identity = Arc::new(identity);
        let sink = Arc::new(MemorySink::new());
        let device = Arc::new(FakeAlarmDevice::new());
        let store = Arc::new(FakeMessageStore::new());

        let orchestrator = Arc::new(Orchestrator::new(
            Collaborators {
                backend: backend.clone(),
                identity: identity.clone(),
                sink: sink.clone(),
                alarm_device: device.clone(),
                store: store.clone(),
            },
            config,
        ));

        Self {
            backend,
            identity,
            sink,
            device,
            store,
            orchestrator,
        }
    }

    pub fn router(&self) -> PushEventRouter {
        PushEventRouter::new(self.orchestrator.clone())
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Let spawned tasks run until they block on a timer or finish
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
