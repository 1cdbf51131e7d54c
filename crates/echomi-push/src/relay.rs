//! Relays OTPs from incoming delivery SMS to the backend, so a later lookup
//! can find them.

use crate::scope::TaskScope;
use echomi_backend::{Backend, IdentityProvider, OtpReport};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tokio::task::JoinHandle;

/// Canonical sender and the keywords that identify it in an address or body
const KNOWN_SENDERS: &[(&str, &[&str])] = &[
    ("AMAZON", &["AMAZON", "AMZN"]),
    ("SWIGGY", &["SWIGGY"]),
];

static OTP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9]{4,6}\b").expect("valid OTP regex"));

static ORDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\border\s*(?:id|no\.?|number)?\s*[:#]?\s*([a-z0-9-]*[0-9][a-z0-9-]*)")
        .expect("valid order id regex")
});

/// First standalone run of 4 to 6 digits
pub fn extract_otp(body: &str) -> Option<String> {
    OTP_RE.find(body).map(|m| m.as_str().to_string())
}

/// Order reference such as `Order ID: 403-1234` or `order #98765`
pub fn extract_order_id(body: &str) -> Option<String> {
    ORDER_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Canonical sender when the address or body mentions a known one
pub fn classify_sender(address: &str, body: &str) -> Option<&'static str> {
    let address = address.to_uppercase();
    let body = body.to_uppercase();
    KNOWN_SENDERS
        .iter()
        .find(|(_, keywords)| {
            keywords
                .iter()
                .any(|k| address.contains(k) || body.contains(k))
        })
        .map(|(sender, _)| *sender)
}

/// A received SMS, multi-part bodies already in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingSms {
    pub address: String,
    pub parts: Vec<String>,
}

impl IncomingSms {
    pub fn new(address: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            parts: vec![body.into()],
        }
    }

    pub fn body(&self) -> String {
        self.parts.concat()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Relayed(OtpReport),
    NoOtp,
    UnknownSender,
    NoIdentity,
    Failed(String),
}

#[derive(Clone)]
pub struct IncomingSmsRelay {
    backend: Arc<dyn Backend>,
    identity: Arc<dyn IdentityProvider>,
    scope: Arc<TaskScope>,
}

impl IncomingSmsRelay {
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

    pub fn on_sms_received(&self, sms: IncomingSms) -> JoinHandle<RelayOutcome> {
        let this = self.clone();
        self.scope.spawn(async move { this.relay(sms).await })
    }

    pub async fn relay(&self, sms: IncomingSms) -> RelayOutcome {
        let body = sms.body();

        let Some(otp) = extract_otp(&body) else {
            log::debug!("No OTP in SMS from {}", sms.address);
            return RelayOutcome::NoOtp;
        };
        let Some(sender) = classify_sender(&sms.address, &body) else {
            log::debug!("SMS from {} is not from a known sender; skipping", sms.address);
            return RelayOutcome::UnknownSender;
        };
        let Some(firebase_uid) = self.identity.current_uid().await else {
            log::error!("No signed-in user; cannot relay OTP");
            return RelayOutcome::NoIdentity;
        };

        let report = OtpReport {
            firebase_uid,
            sender: sender.to_string(),
            otp,
            order_id: extract_order_id(&body),
        };

        match self.backend.relay_otp(&report).await {
            Ok(()) => {
                log::info!("Relayed {} OTP to backend", report.sender);
                RelayOutcome::Relayed(report)
            }
            Err(e) => {
                log::error!("Failed to relay {} OTP: {}", report.sender, e);
                RelayOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeIdentity};

    #[test]
    fn test_extract_otp() {
        assert_eq!(
            extract_otp("Your Amazon OTP is 482913. Do not share."),
            Some("482913".into())
        );
        assert_eq!(extract_otp("Code: 1234"), Some("1234".into()));
        assert_eq!(extract_otp("Call 1800123456 for help"), None);
        assert_eq!(extract_otp("ref AB12345"), None);
        assert_eq!(extract_otp("no digits here"), None);
    }

    #[test]
    fn test_extract_order_id() {
        assert_eq!(
            extract_order_id("OTP 4821 for Order ID: 403-998877"),
            Some("403-998877".into())
        );
        assert_eq!(extract_order_id("your order #55123 is near"), Some("55123".into()));
        assert_eq!(extract_order_id("Your order has shipped"), None);
    }

    #[test]
    fn test_classify_sender() {
        assert_eq!(classify_sender("AX-AMZN", "OTP 1234"), Some("AMAZON"));
        assert_eq!(classify_sender("+15550100", "Swiggy: OTP 1234"), Some("SWIGGY"));
        assert_eq!(classify_sender("VM-BANK", "OTP 1234"), None);
    }

    fn setup(identity: FakeIdentity) -> (Arc<FakeBackend>, IncomingSmsRelay) {
        let backend = Arc::new(FakeBackend::new());
        let relay = IncomingSmsRelay::new(
            backend.clone(),
            Arc::new(identity),
            Arc::new(TaskScope::new()),
        );
        (backend, relay)
    }

    #[tokio::test]
    async fn test_relays_multipart_sms() {
        let (backend, relay) = setup(FakeIdentity::signed_in("uid-1", "t"));
        let sms = IncomingSms {
            address: "AX-AMAZON".into(),
            parts: vec!["Your delivery OTP is 48".into(), "2913 for Order ID: 123".into()],
        };

        let outcome = relay.on_sms_received(sms).await.unwrap();
        let expected = OtpReport {
            firebase_uid: "uid-1".into(),
            sender: "AMAZON".into(),
            otp: "482913".into(),
            order_id: Some("123".into()),
        };
        assert_eq!(outcome, RelayOutcome::Relayed(expected.clone()));
        assert_eq!(backend.relays(), vec![expected]);
    }

    #[tokio::test]
    async fn test_skips_without_otp_sender_or_identity() {
        let (backend, relay) = setup(FakeIdentity::signed_in("uid-1", "t"));
        assert_eq!(
            relay.relay(IncomingSms::new("AMAZON", "Out for delivery")).await,
            RelayOutcome::NoOtp
        );
        assert_eq!(
            relay.relay(IncomingSms::new("VM-BANK", "OTP 1234")).await,
            RelayOutcome::UnknownSender
        );
        assert!(backend.relays().is_empty());

        let (backend, relay) = setup(FakeIdentity::anonymous());
        assert_eq!(
            relay.relay(IncomingSms::new("AMAZON", "OTP 1234")).await,
            RelayOutcome::NoIdentity
        );
        assert!(backend.relays().is_empty());
    }
}
