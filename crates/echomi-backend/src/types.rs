//! Wire types exchanged with the backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The user's answer to an OTP-sharing approval request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecision {
    pub approval_id: String,
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Backend acknowledgement of an approval decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalAck {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

/// Parameters of a delivery OTP lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpQuery {
    /// Identity (user uid) the OTP was stored under
    pub identity: String,
    pub sender: Option<String>,
    pub order_id: Option<String>,
}

impl OtpQuery {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            sender: None,
            order_id: None,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }
}

/// Outcome of a delivery OTP lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OtpResult {
    pub found: bool,
    pub code: Option<String>,
    pub sender: Option<String>,
    pub order_id: Option<String>,
}

impl OtpResult {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn found(code: impl Into<String>) -> Self {
        Self {
            found: true,
            code: Some(code.into()),
            ..Self::default()
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }
}

/// Raw OTP lookup response as served by the backend
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OtpResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub found: Option<bool>,
    #[serde(default)]
    pub otp: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<OtpResponse> for OtpResult {
    fn from(resp: OtpResponse) -> Self {
        let code = resp.otp.filter(|c| !c.trim().is_empty());
        let errored = resp
            .status
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("error") || s.eq_ignore_ascii_case("not_found"))
            .unwrap_or(false);
        let found = resp.found.unwrap_or(true) && !errored && code.is_some();

        if let Some(ref err) = resp.error {
            log::debug!("OTP lookup reported: {}", err);
        }

        OtpResult {
            found,
            code: if found { code } else { None },
            sender: resp.sender,
            order_id: resp.order_id,
        }
    }
}

/// Registers the push token the backend delivers events to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushTokenRegistration {
    pub fcm_token: String,
}

/// An OTP extracted from an incoming SMS, relayed for later lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpReport {
    pub firebase_uid: String,
    pub sender: String,
    pub otp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

/// Which local SMS box a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmsDirection {
    Inbox,
    Sent,
}

/// Where the backend files an SMS batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Regular,
    Emergency,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Regular => "regular",
            StorageType::Emergency => "emergency",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "regular" => Ok(StorageType::Regular),
            "emergency" => Ok(StorageType::Emergency),
            other => Err(format!("unknown storage type: {}", other)),
        }
    }
}

/// One local SMS as uploaded to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsRecord {
    pub phone_number: String,
    pub message: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    pub sms_type: SmsDirection,
}

/// A batch of local SMS collected for one call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsBatch {
    pub user_id: String,
    pub call_sid: String,
    #[serde(rename = "smsMessages")]
    pub messages: Vec<SmsRecord>,
    pub storage_type: StorageType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_approval_decision_wire_shape() {
        let decision = ApprovalDecision {
            approval_id: "abc123".into(),
            approved: false,
            user_id: None,
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json, serde_json::json!({"approvalId": "abc123", "approved": false}));
    }

    #[test]
    fn test_otp_response_found() {
        let raw = r#"{"status":"success","otp":"482913","sender":"AMAZON","orderId":"123"}"#;
        let resp: OtpResponse = serde_json::from_str(raw).unwrap();
        let result = OtpResult::from(resp);
        assert!(result.found);
        assert_eq!(result.code.as_deref(), Some("482913"));
        assert_eq!(result.sender.as_deref(), Some("AMAZON"));
        assert_eq!(result.order_id.as_deref(), Some("123"));
    }

    #[test]
    fn test_otp_response_not_found() {
        let raw = r#"{"status":"error","error":"No OTP stored"}"#;
        let resp: OtpResponse = serde_json::from_str(raw).unwrap();
        assert!(!OtpResult::from(resp).found);

        let raw = r#"{"found":false,"otp":"111111"}"#;
        let resp: OtpResponse = serde_json::from_str(raw).unwrap();
        let result = OtpResult::from(resp);
        assert!(!result.found);
        assert!(result.code.is_none());

        let raw = r#"{"status":"success","otp":"  "}"#;
        let resp: OtpResponse = serde_json::from_str(raw).unwrap();
        assert!(!OtpResult::from(resp).found);
    }

    #[test]
    fn test_storage_type_parse() {
        assert_eq!("regular".parse::<StorageType>(), Ok(StorageType::Regular));
        assert_eq!("Emergency".parse::<StorageType>(), Ok(StorageType::Emergency));
        assert!("archive".parse::<StorageType>().is_err());
        assert_eq!(StorageType::default(), StorageType::Regular);
    }

    #[test]
    fn test_sms_batch_wire_shape() {
        let batch = SmsBatch {
            user_id: "U1".into(),
            call_sid: "CA1".into(),
            messages: vec![SmsRecord {
                phone_number: "+15550001".into(),
                message: "hello".into(),
                sender: "+15550001".into(),
                timestamp: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
                sms_type: SmsDirection::Inbox,
            }],
            storage_type: StorageType::Emergency,
        };
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["userId"], "U1");
        assert_eq!(json["callSid"], "CA1");
        assert_eq!(json["storageType"], "emergency");
        assert_eq!(json["smsMessages"][0]["smsType"], "inbox");
        assert_eq!(json["smsMessages"][0]["phoneNumber"], "+15550001");
    }
}
