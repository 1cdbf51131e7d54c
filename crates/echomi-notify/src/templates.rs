//! Notification message templates

use serde::{Deserialize, Serialize};

/// Notification text ready to post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// Collapsed title
    pub title: String,
    /// Collapsed body
    pub body: String,
    /// Long-form text shown when the notification is expanded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expanded: Option<String>,
}

impl NotificationMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            expanded: None,
        }
    }

    pub fn with_expanded(mut self, text: impl Into<String>) -> Self {
        self.expanded = Some(text.into());
        self
    }
}

/// Emergency call-back alert
pub fn emergency_alert(title: &str, body: &str, caller_number: &str) -> NotificationMessage {
    NotificationMessage::new(
        format!("{} - Call Back Needed", title),
        format!("Caller: {}\n{}", caller_number, body),
    )
}

/// Interactive OTP-sharing request
pub fn approval_request(company: &str, caller_number: &str) -> NotificationMessage {
    NotificationMessage::new(
        "OTP Sharing Request",
        format!("{} delivery needs OTP access", company),
    )
    .with_expanded(format!(
        "A delivery person from {} is requesting OTP verification. Caller: {}",
        company, caller_number
    ))
}

/// Short confirmation once a decision reached the backend
pub fn approval_confirmation(company: &str, approved: bool) -> NotificationMessage {
    if approved {
        NotificationMessage::new(
            "OTP Sharing Approved",
            format!("OTP will be shared with {} delivery", company),
        )
    } else {
        NotificationMessage::new(
            "OTP Sharing Denied",
            format!("OTP will not be shared with {}", company),
        )
    }
}

/// Low-importance indicator shown while SMS are collected
pub fn collection_working(emergency: bool, limit: usize) -> NotificationMessage {
    let title = if emergency {
        "Fetching Emergency SMS"
    } else {
        "Fetching Recent SMS"
    };
    NotificationMessage::new(
        title,
        format!("Processing latest {} SMS for your AI assistant", limit),
    )
}

/// " for AMAZON (Order 123)", either part dropped when absent
fn otp_context(sender: Option<&str>, order_id: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(sender) = sender.filter(|s| !s.is_empty()) {
        out.push_str(" for ");
        out.push_str(sender);
    }
    if let Some(order_id) = order_id.filter(|o| !o.is_empty()) {
        out.push_str(&format!(" (Order {})", order_id));
    }
    out
}

/// Delivery OTP lookup succeeded
pub fn otp_found(code: &str, sender: Option<&str>, order_id: Option<&str>) -> NotificationMessage {
    NotificationMessage::new(
        "Delivery OTP",
        format!("OTP {}{}", code, otp_context(sender, order_id)),
    )
}

/// Delivery OTP lookup gave up
pub fn otp_not_found(sender: Option<&str>, order_id: Option<&str>) -> NotificationMessage {
    NotificationMessage::new(
        "Delivery OTP",
        format!("No OTP found{}", otp_context(sender, order_id)),
    )
}
