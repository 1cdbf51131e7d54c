//! Delivery OTP lookup with a bounded retry

use crate::scope::TaskScope;
use echomi_backend::{Backend, IdentityProvider, OtpQuery, OtpResult};
use echomi_notify::{templates, Channel, Notification, NotificationPresenter, SlotId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How often and how patiently the OTP lookup is attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause after a failed attempt before the next one
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpOutcome {
    Found(OtpResult),
    NotFound { attempts: u32 },
    /// Nobody signed in; nothing was queried or shown
    NoIdentity,
}

#[derive(Clone)]
pub struct OtpFetchCoordinator {
    backend: Arc<dyn Backend>,
    identity: Arc<dyn IdentityProvider>,
    presenter: Arc<NotificationPresenter>,
    scope: Arc<TaskScope>,
    policy: RetryPolicy,
}

impl OtpFetchCoordinator {
    pub fn new(
        backend: Arc<dyn Backend>,
        identity: Arc<dyn IdentityProvider>,
        presenter: Arc<NotificationPresenter>,
        scope: Arc<TaskScope>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            identity,
            presenter,
            scope,
            policy,
        }
    }

    /// Run [`fetch`](Self::fetch) in the background
    pub fn handle(
        &self,
        sender: Option<String>,
        order_id: Option<String>,
    ) -> JoinHandle<OtpOutcome> {
        let this = self.clone();
        self.scope
            .spawn(async move { this.fetch(sender, order_id).await })
    }

    /// Look up the OTP, retrying failed or empty attempts, and notify the
    /// user of the result
    pub async fn fetch(&self, sender: Option<String>, order_id: Option<String>) -> OtpOutcome {
        let Some(uid) = self.identity.current_uid().await else {
            log::warn!("No signed-in user; skipping delivery OTP lookup");
            return OtpOutcome::NoIdentity;
        };

        let query = OtpQuery {
            identity: uid,
            sender,
            order_id,
        };
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.backend.fetch_otp(&query).await {
                Ok(result) if result.found => {
                    log::info!("Delivery OTP found on attempt {}/{}", attempt, attempts);
                    self.show_found(&query, &result);
                    return OtpOutcome::Found(result);
                }
                Ok(_) => log::info!("No OTP yet (attempt {}/{})", attempt, attempts),
                // Every failure still counts as an attempt; a permanent
                // one is only logged louder
                Err(e) if e.is_transient() => log::warn!(
                    "OTP lookup failed (attempt {}/{}): {}",
                    attempt,
                    attempts,
                    e
                ),
                Err(e) => log::error!(
                    "OTP lookup rejected (attempt {}/{}): {}",
                    attempt,
                    attempts,
                    e
                ),
            }

            if attempt < attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        log::warn!("Giving up on delivery OTP after {} attempts", attempts);
        self.presenter.post(Notification::new(
            Channel::Delivery,
            SlotId::DELIVERY,
            templates::otp_not_found(query.sender.as_deref(), query.order_id.as_deref()),
        ));
        OtpOutcome::NotFound { attempts }
    }

    fn show_found(&self, query: &OtpQuery, result: &OtpResult) {
        let sender = result.sender.as_deref().or(query.sender.as_deref());
        let order_id = result.order_id.as_deref().or(query.order_id.as_deref());
        self.presenter.post(Notification::new(
            Channel::Delivery,
            SlotId::DELIVERY,
            templates::otp_found(result.code.as_deref().unwrap_or_default(), sender, order_id),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeIdentity, FakeOtp};
    use echomi_notify::MemorySink;
    use tokio::time::Instant;

    fn setup(identity: FakeIdentity) -> (Arc<FakeBackend>, Arc<MemorySink>, OtpFetchCoordinator) {
        let backend = Arc::new(FakeBackend::new());
        let sink = Arc::new(MemorySink::new());
        let otp = OtpFetchCoordinator::new(
            backend.clone(),
            Arc::new(identity),
            Arc::new(NotificationPresenter::new(sink.clone())),
            Arc::new(TaskScope::new()),
            RetryPolicy::default(),
        );
        (backend, sink, otp)
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_after_three_attempts() {
        let (backend, sink, otp) = setup(FakeIdentity::signed_in("uid-1", "t"));
        let start = Instant::now();

        let outcome = otp
            .handle(Some("AMAZON".into()), Some("123".into()))
            .await
            .unwrap();
        assert_eq!(outcome, OtpOutcome::NotFound { attempts: 3 });

        // Two pauses between three attempts
        assert_eq!(start.elapsed(), Duration::from_secs(4));

        let queries = backend.otp_queries();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0].identity, "uid-1");
        assert_eq!(queries[0].sender.as_deref(), Some("AMAZON"));

        let shown = sink.active(SlotId::DELIVERY).unwrap();
        assert_eq!(shown.message.body, "No OTP found for AMAZON (Order 123)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_found_after_transient_failure() {
        let (backend, sink, otp) = setup(FakeIdentity::signed_in("uid-1", "t"));
        backend.script_otp(vec![FakeOtp::Fail, FakeOtp::Found("482913".into())]);
        let start = Instant::now();

        let outcome = otp.fetch(Some("AMAZON".into()), None).await;
        assert!(matches!(outcome, OtpOutcome::Found(ref r) if r.code.as_deref() == Some("482913")));
        assert_eq!(backend.otp_queries().len(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(2));

        assert_eq!(
            sink.active(SlotId::DELIVERY).unwrap().message.body,
            "OTP 482913 for AMAZON"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_lookups_still_use_every_attempt() {
        let (backend, sink, otp) = setup(FakeIdentity::signed_in("uid-1", "t"));
        backend.script_otp(vec![FakeOtp::Reject, FakeOtp::Reject, FakeOtp::Reject]);
        let start = Instant::now();

        let outcome = otp.fetch(Some("SWIGGY".into()), None).await;
        assert_eq!(outcome, OtpOutcome::NotFound { attempts: 3 });
        assert_eq!(start.elapsed(), Duration::from_secs(4));
        assert_eq!(
            sink.active(SlotId::DELIVERY).unwrap().message.body,
            "No OTP found for SWIGGY"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_found_first_try_does_not_wait() {
        let (backend, _sink, otp) = setup(FakeIdentity::signed_in("uid-1", "t"));
        backend.script_otp(vec![FakeOtp::Found("1111".into())]);
        let start = Instant::now();

        otp.fetch(None, None).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(backend.otp_queries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_identity_is_silent() {
        let (backend, sink, otp) = setup(FakeIdentity::anonymous());

        let outcome = otp.fetch(Some("AMAZON".into()), None).await;
        assert_eq!(outcome, OtpOutcome::NoIdentity);
        assert!(backend.otp_queries().is_empty());
        assert!(sink.history().is_empty());
    }
}
