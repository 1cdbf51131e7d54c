//! OTP-sharing approvals: one notification, one decision, one submission.
//!
//! Each approval id moves `Pending -> Approved | Denied | Expired` exactly
//! once. The decision is posted to the backend a single time; a failed
//! submission is logged and not retried. Expiry is local only.
//!
//! Settled approvals are kept as redelivery keys for
//! [`ApprovalConfig::retention`], then forgotten.

use crate::events::ApprovalRequest;
use crate::scope::TaskScope;
use echomi_backend::{ApprovalAck, ApprovalDecision, Backend, IdentityProvider};
use echomi_notify::notification::{
    EXTRA_APPROVAL_ID, EXTRA_CALLER_NUMBER, EXTRA_CALL_SID, EXTRA_COMPANY,
};
use echomi_notify::{
    templates, ActionKind, Channel, Notification, NotificationAction, NotificationPresenter,
    SlotId,
};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

/// Default time an approval stays actionable
pub const DEFAULT_APPROVAL_EXPIRY: Duration = Duration::from_secs(60);

/// Default time a settled approval id is remembered
pub const DEFAULT_APPROVAL_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalConfig {
    pub expiry: Duration,
    /// How long settled ids stay in the ledger
    pub retention: Duration,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            expiry: DEFAULT_APPROVAL_EXPIRY,
            retention: DEFAULT_APPROVAL_RETENTION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ApprovalState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalState::Pending)
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Approved => "approved",
            ApprovalState::Denied => "denied",
            ApprovalState::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// The user's answer from the notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
}

impl Decision {
    pub fn approved(&self) -> bool {
        matches!(self, Decision::Approve)
    }

    fn state(&self) -> ApprovalState {
        match self {
            Decision::Approve => ApprovalState::Approved,
            Decision::Deny => ApprovalState::Denied,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.approved() { "approve" } else { "deny" })
    }
}

/// Result of the single backend submission for a decision
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Submitted(ApprovalAck),
    Failed(String),
}

impl SubmitOutcome {
    pub fn is_submitted(&self) -> bool {
        matches!(self, SubmitOutcome::Submitted(_))
    }
}

struct Tracked {
    /// `None` for decisions on ids this process never saw
    request: Option<ApprovalRequest>,
    state: ApprovalState,
    expiry: Option<AbortHandle>,
    /// Last state change
    touched: Instant,
}

impl Tracked {
    fn settle(&mut self, state: ApprovalState) {
        self.state = state;
        self.touched = Instant::now();
        if let Some(expiry) = self.expiry.take() {
            expiry.abort();
        }
    }
}

#[derive(Default)]
struct Ledger {
    entries: HashMap<String, Tracked>,
    /// Approval id currently occupying the approval slot
    displayed: Option<String>,
}

impl Ledger {
    /// Forget settled approvals older than `retention`
    fn prune(&mut self, retention: Duration) {
        let before = self.entries.len();
        self.entries
            .retain(|_, t| !t.state.is_terminal() || t.touched.elapsed() < retention);
        let pruned = before - self.entries.len();
        if pruned > 0 {
            log::debug!("Forgot {} settled approvals", pruned);
        }
    }
}

/// Owns every approval seen by this process
#[derive(Clone)]
pub struct ApprovalCoordinator {
    backend: Arc<dyn Backend>,
    identity: Arc<dyn IdentityProvider>,
    presenter: Arc<NotificationPresenter>,
    scope: Arc<TaskScope>,
    config: ApprovalConfig,
    ledger: Arc<Mutex<Ledger>>,
}

impl ApprovalCoordinator {
    pub fn new(
        backend: Arc<dyn Backend>,
        identity: Arc<dyn IdentityProvider>,
        presenter: Arc<NotificationPresenter>,
        scope: Arc<TaskScope>,
        config: ApprovalConfig,
    ) -> Self {
        Self {
            backend,
            identity,
            presenter,
            scope,
            config,
            ledger: Arc::new(Mutex::new(Ledger::default())),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Show the approval notification and start its expiry timer.
    ///
    /// A redelivered request (same id) is ignored. Returns whether the
    /// request was new.
    pub fn handle_request(&self, request: ApprovalRequest) -> bool {
        let id = request.approval_id.clone();
        {
            let mut ledger = self.ledger();
            ledger.prune(self.config.retention);
            if ledger.entries.contains_key(&id) {
                log::info!("Approval {} already seen; ignoring redelivery", id);
                return false;
            }
            ledger.entries.insert(
                id.clone(),
                Tracked {
                    request: Some(request.clone()),
                    state: ApprovalState::Pending,
                    expiry: None,
                    touched: Instant::now(),
                },
            );
            ledger.displayed = Some(id.clone());
        }

        log::info!(
            "Approval {} requested by {} (call {})",
            id,
            request.company,
            request.call_sid
        );
        self.presenter.post(approval_notification(&request));

        let expiry = self
            .scope
            .spawn(self.clone().expire_after(id.clone()))
            .abort_handle();
        if let Some(tracked) = self.ledger().entries.get_mut(&id) {
            tracked.expiry = Some(expiry);
        }
        true
    }

    async fn expire_after(self, id: String) {
        tokio::time::sleep(self.config.expiry).await;

        let clear_slot = {
            let mut guard = self.ledger();
            let ledger = &mut *guard;
            match ledger.entries.get_mut(&id) {
                Some(tracked) if tracked.state == ApprovalState::Pending => {
                    // Our own handle; never abort the running task
                    tracked.expiry = None;
                    tracked.settle(ApprovalState::Expired);
                    let shown = ledger.displayed.as_deref() == Some(id.as_str());
                    if shown {
                        ledger.displayed = None;
                    }
                    Some(shown)
                }
                _ => None,
            }
        };

        if let Some(shown) = clear_slot {
            log::info!("Approval {} expired without a decision", id);
            if shown {
                self.presenter.cancel(SlotId::APPROVAL);
            }
        }
    }

    /// Record the user's decision and submit it in the background.
    ///
    /// Returns `None` when the approval already reached a terminal state.
    /// Ids never seen by this process are accepted and recorded.
    pub fn handle_decision(
        &self,
        approval_id: &str,
        company: &str,
        decision: Decision,
    ) -> Option<JoinHandle<SubmitOutcome>> {
        {
            let mut ledger = self.ledger();
            match ledger.entries.entry(approval_id.to_string()) {
                Entry::Occupied(mut entry) => {
                    let tracked = entry.get_mut();
                    if tracked.state.is_terminal() {
                        log::info!(
                            "Approval {} already {}; ignoring {}",
                            approval_id,
                            tracked.state,
                            decision
                        );
                        return None;
                    }
                    tracked.settle(decision.state());
                }
                Entry::Vacant(entry) => {
                    log::warn!(
                        "Decision for unknown approval {}; submitting anyway",
                        approval_id
                    );
                    entry.insert(Tracked {
                        request: None,
                        state: decision.state(),
                        expiry: None,
                        touched: Instant::now(),
                    });
                }
            }
        }

        let this = self.clone();
        let id = approval_id.to_string();
        let company = company.to_string();
        Some(
            self.scope
                .spawn(async move { this.submit(id, company, decision).await }),
        )
    }

    async fn submit(self, id: String, company: String, decision: Decision) -> SubmitOutcome {
        let body = ApprovalDecision {
            approval_id: id.clone(),
            approved: decision.approved(),
            user_id: self.identity.current_uid().await,
        };

        let result = self.backend.submit_approval(&body).await;

        // The decision is final either way, so the buttons go
        if self.release_slot(&id) {
            self.presenter.cancel(SlotId::APPROVAL);
        }

        match result {
            Ok(ack) => {
                log::info!("Approval {} submitted ({})", id, decision);
                self.presenter.post(Notification::new(
                    Channel::Approval,
                    SlotId::APPROVAL_CONFIRMATION,
                    templates::approval_confirmation(&company, decision.approved()),
                ));
                SubmitOutcome::Submitted(ack)
            }
            Err(e) => {
                log::error!("Failed to submit approval {}: {}", id, e);
                SubmitOutcome::Failed(e.to_string())
            }
        }
    }

    /// Whether the approval slot should be cleared for `id`.
    /// A newer request occupying the slot is left alone.
    fn release_slot(&self, id: &str) -> bool {
        let mut ledger = self.ledger();
        match ledger.displayed.as_deref() {
            Some(shown) if shown != id => false,
            _ => {
                ledger.displayed = None;
                true
            }
        }
    }

    /// The original request behind a detail tap
    pub fn detail(&self, approval_id: &str) -> Option<ApprovalRequest> {
        self.ledger()
            .entries
            .get(approval_id)
            .and_then(|t| t.request.clone())
    }

    pub fn state(&self, approval_id: &str) -> Option<ApprovalState> {
        self.ledger().entries.get(approval_id).map(|t| t.state)
    }

    pub fn pending(&self) -> usize {
        self.ledger()
            .entries
            .values()
            .filter(|t| t.state == ApprovalState::Pending)
            .count()
    }
}

fn approval_notification(request: &ApprovalRequest) -> Notification {
    let decision = |kind: ActionKind, label: &str| {
        NotificationAction::new(kind, label)
            .with_extra(EXTRA_APPROVAL_ID, &request.approval_id)
            .with_extra(EXTRA_COMPANY, &request.company)
    };

    Notification::new(
        Channel::Approval,
        SlotId::APPROVAL,
        templates::approval_request(&request.company, &request.caller_number),
    )
    .with_action(decision(ActionKind::Approve, "Approve"))
    .with_action(decision(ActionKind::Deny, "Deny"))
    .with_content_action(
        NotificationAction::new(ActionKind::OpenDetail, "Details")
            .with_extra(EXTRA_APPROVAL_ID, &request.approval_id)
            .with_extra(EXTRA_COMPANY, &request.company)
            .with_extra(EXTRA_CALLER_NUMBER, &request.caller_number)
            .with_extra(EXTRA_CALL_SID, &request.call_sid),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeIdentity};
    use chrono::Utc;
    use echomi_notify::MemorySink;

    struct Setup {
        backend: Arc<FakeBackend>,
        sink: Arc<MemorySink>,
        approvals: ApprovalCoordinator,
    }

    fn setup() -> Setup {
        let backend = Arc::new(FakeBackend::new());
        let sink = Arc::new(MemorySink::new());
        let approvals = ApprovalCoordinator::new(
            backend.clone(),
            Arc::new(FakeIdentity::signed_in("uid-1", "token-1")),
            Arc::new(NotificationPresenter::new(sink.clone())),
            Arc::new(TaskScope::new()),
            ApprovalConfig::default(),
        );
        Setup {
            backend,
            sink,
            approvals,
        }
    }

    fn request(id: &str) -> ApprovalRequest {
        ApprovalRequest {
            approval_id: id.to_string(),
            company: "Amazon".into(),
            caller_number: "+15550100".into(),
            call_sid: "CA1".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_posts_actionable_notification() {
        let s = setup();
        assert!(s.approvals.handle_request(request("abc123")));

        let shown = s.sink.active(SlotId::APPROVAL).unwrap();
        assert_eq!(shown.channel, Channel::Approval);
        assert_eq!(shown.message.body, "Amazon delivery needs OTP access");

        let deny = shown.action(ActionKind::Deny).unwrap();
        assert_eq!(deny.extra(EXTRA_APPROVAL_ID), Some("abc123"));
        assert_eq!(deny.extra(EXTRA_COMPANY), Some("Amazon"));
        assert!(shown.action(ActionKind::Approve).is_some());

        let detail = shown.content_action.unwrap();
        assert_eq!(detail.kind, ActionKind::OpenDetail);
        assert_eq!(detail.extra(EXTRA_CALL_SID), Some("CA1"));

        assert_eq!(s.approvals.state("abc123"), Some(ApprovalState::Pending));
        assert_eq!(s.approvals.detail("abc123").unwrap().caller_number, "+15550100");
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivery_ignored() {
        let s = setup();
        assert!(s.approvals.handle_request(request("abc123")));
        assert!(!s.approvals.handle_request(request("abc123")));
        assert_eq!(s.sink.posted_to(SlotId::APPROVAL).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deny_submits_once_and_confirms() {
        let s = setup();
        s.approvals.handle_request(request("abc123"));

        let outcome = s
            .approvals
            .handle_decision("abc123", "Amazon", Decision::Deny)
            .unwrap()
            .await
            .unwrap();
        assert!(outcome.is_submitted());

        assert_eq!(
            s.backend.approvals(),
            vec![ApprovalDecision {
                approval_id: "abc123".into(),
                approved: false,
                user_id: Some("uid-1".into()),
            }]
        );
        assert!(s.sink.active(SlotId::APPROVAL).is_none());
        let confirmation = s.sink.active(SlotId::APPROVAL_CONFIRMATION).unwrap();
        assert_eq!(confirmation.message.title, "OTP Sharing Denied");
        assert_eq!(s.approvals.state("abc123"), Some(ApprovalState::Denied));

        // A second tap is a no-op
        assert!(s
            .approvals
            .handle_decision("abc123", "Amazon", Decision::Approve)
            .is_none());
        assert_eq!(s.backend.approvals().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_local_only() {
        let s = setup();
        s.approvals.handle_request(request("abc123"));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(s.approvals.state("abc123"), Some(ApprovalState::Pending));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(s.approvals.state("abc123"), Some(ApprovalState::Expired));
        assert!(s.sink.active(SlotId::APPROVAL).is_none());
        assert!(s.backend.approvals().is_empty());

        assert!(s
            .approvals
            .handle_decision("abc123", "Amazon", Decision::Approve)
            .is_none());
        assert!(s.backend.approvals().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_decision_cancels_expiry() {
        let s = setup();
        s.approvals.handle_request(request("abc123"));
        s.approvals
            .handle_decision("abc123", "Amazon", Decision::Approve)
            .unwrap()
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(s.approvals.state("abc123"), Some(ApprovalState::Approved));
        assert_eq!(s.sink.cancellations(), vec![SlotId::APPROVAL]);
        assert_eq!(
            s.sink.active(SlotId::APPROVAL_CONFIRMATION).unwrap().message.title,
            "OTP Sharing Approved"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_submission_is_not_retried() {
        let s = setup();
        s.backend.fail_approvals(true);
        s.approvals.handle_request(request("abc123"));

        let outcome = s
            .approvals
            .handle_decision("abc123", "Amazon", Decision::Approve)
            .unwrap()
            .await
            .unwrap();
        assert!(!outcome.is_submitted());

        assert_eq!(s.backend.approvals().len(), 1);
        assert!(s.sink.active(SlotId::APPROVAL).is_none());
        assert!(s.sink.active(SlotId::APPROVAL_CONFIRMATION).is_none());
        assert_eq!(s.approvals.state("abc123"), Some(ApprovalState::Approved));

        // Nothing left to tap, and the slot stays clear
        assert!(s
            .approvals
            .handle_decision("abc123", "Amazon", Decision::Approve)
            .is_none());
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(s.sink.active(SlotId::APPROVAL).is_none());
        assert_eq!(s.backend.approvals().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_ids_forgotten_after_retention() {
        let s = setup();
        s.approvals.handle_request(request("abc123"));
        s.approvals
            .handle_decision("abc123", "Amazon", Decision::Deny)
            .unwrap()
            .await
            .unwrap();
        s.approvals.handle_request(request("pending-1"));

        tokio::time::sleep(Duration::from_secs(23 * 60 * 60)).await;
        s.approvals.handle_request(request("other"));
        assert_eq!(s.approvals.state("abc123"), Some(ApprovalState::Denied));

        tokio::time::sleep(Duration::from_secs(2 * 60 * 60)).await;
        s.approvals.handle_request(request("later"));
        assert_eq!(s.approvals.state("abc123"), None);
        assert_eq!(s.approvals.state("pending-1"), None);
        assert_eq!(s.approvals.state("other"), Some(ApprovalState::Expired));
        assert_eq!(s.approvals.state("later"), Some(ApprovalState::Pending));

        // A forgotten id is treated as new again
        assert!(s.approvals.handle_request(request("abc123")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_id_is_submitted() {
        let s = setup();
        let outcome = s
            .approvals
            .handle_decision("stale-1", "Swiggy", Decision::Deny)
            .unwrap()
            .await
            .unwrap();
        assert!(outcome.is_submitted());
        assert_eq!(s.approvals.state("stale-1"), Some(ApprovalState::Denied));
        assert!(s.approvals.detail("stale-1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_request_keeps_slot() {
        let s = setup();
        s.approvals.handle_request(request("first"));
        s.approvals.handle_request(request("second"));

        s.approvals
            .handle_decision("first", "Amazon", Decision::Approve)
            .unwrap()
            .await
            .unwrap();

        let shown = s.sink.active(SlotId::APPROVAL).unwrap();
        assert_eq!(
            shown.action(ActionKind::Approve).unwrap().extra(EXTRA_APPROVAL_ID),
            Some("second")
        );
        assert_eq!(s.approvals.pending(), 1);
    }
}
