//! The notification model handed to the host

use crate::channel::{Channel, SlotId};
use crate::templates::NotificationMessage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const EXTRA_APPROVAL_ID: &str = "approvalId";
pub const EXTRA_COMPANY: &str = "company";
pub const EXTRA_CALLER_NUMBER: &str = "callerNumber";
pub const EXTRA_CALL_SID: &str = "callSid";

/// What a tap on an action asks the companion to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Approve,
    Deny,
    OpenDetail,
    StopAlarm,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Approve => "approve",
            ActionKind::Deny => "deny",
            ActionKind::OpenDetail => "open_detail",
            ActionKind::StopAlarm => "stop_alarm",
        }
    }
}

/// A tappable action. Extras are opaque strings routed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub kind: ActionKind,
    pub label: String,
    pub extras: BTreeMap<String, String>,
}

impl NotificationAction {
    pub fn new(kind: ActionKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            extras: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extras.insert(key.to_string(), value.into());
        self
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extras.get(key).map(String::as_str)
    }
}

/// A notification bound to a channel and a fixed slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: Channel,
    pub slot: SlotId,
    pub message: NotificationMessage,
    /// Buttons, in display order
    pub actions: Vec<NotificationAction>,
    /// Fired when the notification body itself is tapped
    pub content_action: Option<NotificationAction>,
    /// Persistent indicator the user cannot swipe away
    pub ongoing: bool,
}

impl Notification {
    pub fn new(channel: Channel, slot: SlotId, message: NotificationMessage) -> Self {
        Self {
            channel,
            slot,
            message,
            actions: Vec::new(),
            content_action: None,
            ongoing: false,
        }
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_content_action(mut self, action: NotificationAction) -> Self {
        self.content_action = Some(action);
        self
    }

    pub fn ongoing(mut self) -> Self {
        self.ongoing = true;
        self
    }

    /// Find a button by kind
    pub fn action(&self, kind: ActionKind) -> Option<&NotificationAction> {
        self.actions.iter().find(|a| a.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_extras() {
        let action = NotificationAction::new(ActionKind::Deny, "Deny")
            .with_extra(EXTRA_APPROVAL_ID, "abc123")
            .with_extra(EXTRA_COMPANY, "Amazon");
        assert_eq!(action.extra(EXTRA_APPROVAL_ID), Some("abc123"));
        assert_eq!(action.extra(EXTRA_COMPANY), Some("Amazon"));
        assert_eq!(action.extra(EXTRA_CALL_SID), None);
    }

    #[test]
    fn test_find_action() {
        let n = Notification::new(
            Channel::Approval,
            SlotId::APPROVAL,
            NotificationMessage::new("t", "b"),
        )
        .with_action(NotificationAction::new(ActionKind::Approve, "Approve"))
        .with_action(NotificationAction::new(ActionKind::Deny, "Deny"));

        assert_eq!(n.action(ActionKind::Deny).map(|a| a.label.as_str()), Some("Deny"));
        assert!(n.action(ActionKind::StopAlarm).is_none());
        assert!(!n.ongoing);
    }

    #[test]
    fn test_action_kind_names() {
        assert_eq!(ActionKind::OpenDetail.as_str(), "open_detail");
        assert_eq!(ActionKind::StopAlarm.as_str(), "stop_alarm");
    }
}
