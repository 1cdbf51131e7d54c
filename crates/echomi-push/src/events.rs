//! Push events delivered by the server, and their validation

use chrono::{DateTime, Utc};
use echomi_backend::StorageType;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Payload key carrying the event type tag
pub const TYPE_KEY: &str = "type";
/// Accepted alias for [`TYPE_KEY`]
pub const KIND_KEY: &str = "kind";

/// SMS collected per job when the event carries no `limit`
pub const DEFAULT_COLLECTION_LIMIT: usize = 50;

/// Why an inbound payload was dropped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing event type tag")]
    MissingKind,

    #[error("unrecognized event type: {0}")]
    UnknownKind(String),

    #[error("{kind} event missing required field `{field}`")]
    MissingField {
        kind: EventKind,
        field: &'static str,
    },

    #[error("{kind} event has invalid `{field}`: {value:?}")]
    InvalidField {
        kind: EventKind,
        field: &'static str,
        value: String,
    },
}

/// The four event kinds the companion reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    EmergencyAlert,
    ApprovalRequest,
    DeliveryOtpReady,
    CollectSms,
}

impl EventKind {
    /// Wire tag for this kind
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::EmergencyAlert => "emergency_alert",
            EventKind::ApprovalRequest => "otp_approval_request",
            EventKind::DeliveryOtpReady => "delivery_otp_ready",
            EventKind::CollectSms => "fetch_sms_request",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "emergency_alert" => Some(EventKind::EmergencyAlert),
            "otp_approval_request" => Some(EventKind::ApprovalRequest),
            "delivery_otp_ready" => Some(EventKind::DeliveryOtpReady),
            "fetch_sms_request" => Some(EventKind::CollectSms),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A request to share a delivery OTP with a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    /// Unique per request; never reused
    pub approval_id: String,
    pub company: String,
    pub caller_number: String,
    pub call_sid: String,
    pub created_at: DateTime<Utc>,
}

/// A bounded SMS collection for one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionJob {
    pub call_sid: String,
    pub user_id: String,
    pub storage_type: StorageType,
    /// Always > 0
    pub limit: usize,
}

/// A validated push event. Consumed once by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    EmergencyAlert {
        title: String,
        body: String,
        caller_number: String,
    },
    ApprovalRequest(ApprovalRequest),
    DeliveryOtpReady {
        sender: Option<String>,
        order_id: Option<String>,
    },
    CollectSms(CollectionJob),
}

/// Non-blank value of `key`, trimmed
fn field(payload: &HashMap<String, String>, key: &str) -> Option<String> {
    payload
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(
    payload: &HashMap<String, String>,
    kind: EventKind,
    key: &'static str,
) -> Result<String, ValidationError> {
    field(payload, key).ok_or(ValidationError::MissingField { kind, field: key })
}

impl PushEvent {
    /// Validate a raw push payload.
    ///
    /// Fails on a missing or unknown type tag, or on any missing required
    /// field for that kind.
    pub fn parse(payload: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let tag = field(payload, TYPE_KEY)
            .or_else(|| field(payload, KIND_KEY))
            .ok_or(ValidationError::MissingKind)?;
        let kind = EventKind::from_tag(&tag).ok_or(ValidationError::UnknownKind(tag))?;

        let event = match kind {
            EventKind::EmergencyAlert => PushEvent::EmergencyAlert {
                title: required(payload, kind, "title")?,
                body: required(payload, kind, "body")?,
                caller_number: required(payload, kind, "callerNumber")?,
            },
            EventKind::ApprovalRequest => PushEvent::ApprovalRequest(ApprovalRequest {
                approval_id: required(payload, kind, "approvalId")?,
                company: required(payload, kind, "company")?,
                caller_number: required(payload, kind, "callerNumber")?,
                call_sid: required(payload, kind, "callSid")?,
                created_at: Utc::now(),
            }),
            EventKind::DeliveryOtpReady => PushEvent::DeliveryOtpReady {
                sender: field(payload, "sender"),
                order_id: field(payload, "orderId"),
            },
            EventKind::CollectSms => {
                let call_sid = required(payload, kind, "callSid")?;
                let user_id = required(payload, kind, "userId")?;

                let storage_type = match field(payload, "storageType") {
                    None => StorageType::default(),
                    Some(raw) => raw.parse().map_err(|_| ValidationError::InvalidField {
                        kind,
                        field: "storageType",
                        value: raw.clone(),
                    })?,
                };

                let limit = match field(payload, "limit") {
                    None => DEFAULT_COLLECTION_LIMIT,
                    Some(raw) => match raw.parse::<usize>() {
                        Ok(n) if n > 0 => n,
                        _ => {
                            return Err(ValidationError::InvalidField {
                                kind,
                                field: "limit",
                                value: raw,
                            })
                        }
                    },
                };

                PushEvent::CollectSms(CollectionJob {
                    call_sid,
                    user_id,
                    storage_type,
                    limit,
                })
            }
        };

        Ok(event)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            PushEvent::EmergencyAlert { .. } => EventKind::EmergencyAlert,
            PushEvent::ApprovalRequest(_) => EventKind::ApprovalRequest,
            PushEvent::DeliveryOtpReady { .. } => EventKind::DeliveryOtpReady,
            PushEvent::CollectSms(_) => EventKind::CollectSms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_missing_and_unknown_kind() {
        assert_eq!(
            PushEvent::parse(&payload(&[("title", "x")])),
            Err(ValidationError::MissingKind)
        );
        assert_eq!(
            PushEvent::parse(&payload(&[("type", "  ")])),
            Err(ValidationError::MissingKind)
        );
        assert_eq!(
            PushEvent::parse(&payload(&[("type", "marketing_push")])),
            Err(ValidationError::UnknownKind("marketing_push".into()))
        );
    }

    #[test]
    fn test_kind_alias() {
        let event = PushEvent::parse(&payload(&[("kind", "delivery_otp_ready")])).unwrap();
        assert_eq!(event.kind(), EventKind::DeliveryOtpReady);
    }

    #[test]
    fn test_emergency_requires_all_fields() {
        let err = PushEvent::parse(&payload(&[
            ("type", "emergency_alert"),
            ("title", "Emergency"),
            ("body", "Help"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                kind: EventKind::EmergencyAlert,
                field: "callerNumber"
            }
        );
    }

    #[test]
    fn test_approval_request() {
        let event = PushEvent::parse(&payload(&[
            ("type", "otp_approval_request"),
            ("approvalId", "abc123"),
            ("company", "Amazon"),
            ("callerNumber", "+15550100"),
            ("callSid", "CA1"),
        ]))
        .unwrap();
        match event {
            PushEvent::ApprovalRequest(req) => {
                assert_eq!(req.approval_id, "abc123");
                assert_eq!(req.company, "Amazon");
                assert_eq!(req.call_sid, "CA1");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_approval_missing_id() {
        let err = PushEvent::parse(&payload(&[
            ("type", "otp_approval_request"),
            ("company", "Amazon"),
            ("callerNumber", "+15550100"),
            ("callSid", "CA1"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MissingField {
                field: "approvalId",
                ..
            }
        ));
    }

    #[test]
    fn test_delivery_otp_optional_fields() {
        let event = PushEvent::parse(&payload(&[
            ("type", "delivery_otp_ready"),
            ("sender", "AMAZON"),
            ("orderId", ""),
        ]))
        .unwrap();
        assert_eq!(
            event,
            PushEvent::DeliveryOtpReady {
                sender: Some("AMAZON".into()),
                order_id: None
            }
        );
    }

    #[test]
    fn test_collect_sms_defaults() {
        let event = PushEvent::parse(&payload(&[
            ("type", "fetch_sms_request"),
            ("callSid", "CA1"),
            ("userId", "U1"),
        ]))
        .unwrap();
        assert_eq!(
            event,
            PushEvent::CollectSms(CollectionJob {
                call_sid: "CA1".into(),
                user_id: "U1".into(),
                storage_type: StorageType::Regular,
                limit: DEFAULT_COLLECTION_LIMIT,
            })
        );
    }

    #[test]
    fn test_collect_sms_invalid_limit() {
        for bad in ["0", "-3", "ten"] {
            let err = PushEvent::parse(&payload(&[
                ("type", "fetch_sms_request"),
                ("callSid", "CA1"),
                ("userId", "U1"),
                ("limit", bad),
            ]))
            .unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidField { field: "limit", .. }),
                "limit {:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_collect_sms_storage_type() {
        let event = PushEvent::parse(&payload(&[
            ("type", "fetch_sms_request"),
            ("callSid", "CA1"),
            ("userId", "U1"),
            ("storageType", "emergency"),
            ("limit", "2"),
        ]))
        .unwrap();
        match event {
            PushEvent::CollectSms(job) => {
                assert_eq!(job.storage_type, StorageType::Emergency);
                assert_eq!(job.limit, 2);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let err = PushEvent::parse(&payload(&[
            ("type", "fetch_sms_request"),
            ("callSid", "CA1"),
            ("userId", "U1"),
            ("storageType", "archive"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidField {
                field: "storageType",
                ..
            }
        ));
    }
}
