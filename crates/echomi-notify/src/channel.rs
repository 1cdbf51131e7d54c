//! Notification channels and their fixed slots

use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert importance, ordered from quietest to loudest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Importance {
    /// No sound, no heads-up
    Low = 1,
    /// Sound, no heads-up
    Default = 2,
    /// Sound and heads-up
    High = 3,
    /// Full-screen capable, overrides quiet modes
    Max = 4,
}

/// Sound played when a notification lands on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sound {
    Silent,
    Default,
    /// Alarm-usage buzzer tone
    Alarm,
}

/// Fixed importance/vibration/sound profile of a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelProfile {
    pub name: &'static str,
    pub description: &'static str,
    pub importance: Importance,
    /// Vibration pattern in milliseconds (off/on alternating), `None` for no vibration
    pub vibration: Option<&'static [u64]>,
    pub sound: Sound,
}

/// The four notification categories the companion posts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Emergency,
    Approval,
    Delivery,
    Background,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Emergency,
        Channel::Approval,
        Channel::Delivery,
        Channel::Background,
    ];

    /// Stable host-side channel identifier
    pub fn id(&self) -> &'static str {
        match self {
            Channel::Emergency => "emergency_channel",
            Channel::Approval => "otp_approval_channel",
            Channel::Delivery => "delivery_otp_channel",
            Channel::Background => "sms_fetch_channel",
        }
    }

    pub fn profile(&self) -> ChannelProfile {
        match self {
            Channel::Emergency => ChannelProfile {
                name: "Emergency Alerts",
                description: "Emergency call notifications",
                importance: Importance::Max,
                vibration: Some(&[0, 1000, 500, 1000]),
                sound: Sound::Alarm,
            },
            Channel::Approval => ChannelProfile {
                name: "OTP Approval Requests",
                description: "Notifications for OTP sharing approval requests",
                importance: Importance::High,
                vibration: Some(&[0, 250, 250, 250]),
                sound: Sound::Default,
            },
            Channel::Delivery => ChannelProfile {
                name: "Delivery OTP",
                description: "Delivery OTP lookups for your AI assistant",
                importance: Importance::Default,
                vibration: None,
                sound: Sound::Default,
            },
            Channel::Background => ChannelProfile {
                name: "SMS Fetch Requests",
                description: "Handles fetching SMS in the background for your AI assistant",
                importance: Importance::Low,
                vibration: None,
                sound: Sound::Silent,
            },
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A fixed notification slot. Posting to an occupied slot replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub u32);

impl SlotId {
    pub const EMERGENCY: SlotId = SlotId(1001);
    pub const BACKGROUND: SlotId = SlotId(1003);
    pub const APPROVAL: SlotId = SlotId(2001);
    pub const APPROVAL_CONFIRMATION: SlotId = SlotId(2002);
    pub const DELIVERY: SlotId = SlotId(3001);
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
