//! Host notification API seam and the two built-in sinks

use crate::channel::{Channel, ChannelProfile, SlotId};
use crate::notification::Notification;
use crate::NotifyError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// The host's notification API.
///
/// Implementations may fail with [`NotifyError::Security`] when the host
/// revokes access between the permission check and the call.
pub trait NotificationSink: Send + Sync {
    /// Runtime notification-permission grant
    fn permission_granted(&self) -> bool;

    /// Register a channel with its fixed profile
    fn create_channel(&self, channel: Channel, profile: &ChannelProfile) -> Result<(), NotifyError>;

    /// Show `notification`, replacing whatever occupies its slot
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Remove whatever occupies `slot`
    fn cancel(&self, slot: SlotId) -> Result<(), NotifyError>;
}

/// Headless sink: writes every notification to the log
#[derive(Debug)]
pub struct LogSink {
    granted: bool,
}

impl LogSink {
    pub fn new(granted: bool) -> Self {
        Self { granted }
    }
}

impl NotificationSink for LogSink {
    fn permission_granted(&self) -> bool {
        self.granted
    }

    fn create_channel(&self, channel: Channel, profile: &ChannelProfile) -> Result<(), NotifyError> {
        log::debug!(
            "Channel {} declared ({:?}, sound {:?})",
            channel,
            profile.importance,
            profile.sound
        );
        Ok(())
    }

    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let actions: Vec<&str> = notification.actions.iter().map(|a| a.label.as_str()).collect();
        log::info!(
            "[{} {}] {}: {}{}",
            notification.channel,
            notification.slot,
            notification.message.title,
            notification.message.body.replace('\n', " / "),
            if actions.is_empty() {
                String::new()
            } else {
                format!(" [{}]", actions.join("|"))
            }
        );
        Ok(())
    }

    fn cancel(&self, slot: SlotId) -> Result<(), NotifyError> {
        log::info!("[{}] cleared", slot);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    channels: Vec<Channel>,
    active: HashMap<SlotId, Notification>,
    history: Vec<Notification>,
    cancellations: Vec<SlotId>,
}

/// In-memory sink that records everything, for tests and dry runs
#[derive(Debug)]
pub struct MemorySink {
    granted: AtomicBool,
    security_failure: AtomicBool,
    state: Mutex<MemoryState>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            granted: AtomicBool::new(true),
            security_failure: AtomicBool::new(false),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Grant or revoke the notification permission
    pub fn set_permission(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }

    /// Make every subsequent host call fail with a security error
    pub fn set_security_failure(&self, fail: bool) {
        self.security_failure.store(fail, Ordering::SeqCst);
    }

    /// What currently occupies `slot`
    pub fn active(&self, slot: SlotId) -> Option<Notification> {
        self.state().active.get(&slot).cloned()
    }

    /// Every notification ever shown, in order
    pub fn history(&self) -> Vec<Notification> {
        self.state().history.clone()
    }

    /// Every notification shown in `slot`, in order
    pub fn posted_to(&self, slot: SlotId) -> Vec<Notification> {
        self.state()
            .history
            .iter()
            .filter(|n| n.slot == slot)
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.state().active.len()
    }

    pub fn cancellations(&self) -> Vec<SlotId> {
        self.state().cancellations.clone()
    }

    pub fn declared_channels(&self) -> Vec<Channel> {
        self.state().channels.clone()
    }

    fn check_security(&self) -> Result<(), NotifyError> {
        if self.security_failure.load(Ordering::SeqCst) {
            return Err(NotifyError::Security("notification access revoked".into()));
        }
        Ok(())
    }
}

impl NotificationSink for MemorySink {
    fn permission_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    fn create_channel(&self, channel: Channel, _profile: &ChannelProfile) -> Result<(), NotifyError> {
        self.state().channels.push(channel);
        Ok(())
    }

    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.check_security()?;
        let mut state = self.state();
        state.active.insert(notification.slot, notification.clone());
        state.history.push(notification.clone());
        Ok(())
    }

    fn cancel(&self, slot: SlotId) -> Result<(), NotifyError> {
        self.check_security()?;
        let mut state = self.state();
        state.active.remove(&slot);
        state.cancellations.push(slot);
        Ok(())
    }
}
