//! Echomi Notification Presenter
//!
//! Posts user-visible alerts for the push orchestrator.
//!
//! # Channels
//!
//! | channel | importance | slots |
//! |---|---|---|
//! | Emergency | max, alarm tone | 1001 |
//! | Approval | high | 2001, 2002 |
//! | Delivery | default | 3001 |
//! | Background | low, silent | 1003 |
//!
//! Each category owns fixed slots, so a repeat post replaces the previous
//! alert instead of stacking. Posting never fails from the caller's point of
//! view: a missing permission is a silent no-op and host security errors are
//! logged at the call site.
//!
//! # Example
//!
//! ```ignore
//! use echomi_notify::{templates, Channel, Notification, NotificationPresenter, SlotId};
//!
//! let presenter = NotificationPresenter::new(sink);
//! presenter.post(Notification::new(
//!     Channel::Delivery,
//!     SlotId::DELIVERY,
//!     templates::otp_not_found(Some("AMAZON"), Some("123")),
//! ));
//! ```

pub mod channel;
pub mod notification;
pub mod sink;
pub mod templates;

pub use channel::{Channel, ChannelProfile, Importance, SlotId, Sound};
pub use notification::{ActionKind, Notification, NotificationAction};
pub use sink::{LogSink, MemorySink, NotificationSink};
pub use templates::NotificationMessage;

use std::sync::{Arc, Once};
use thiserror::Error;

/// Errors from the host notification API
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification permission not granted")]
    PermissionDenied,

    #[error("Security exception from notification API: {0}")]
    Security(String),

    #[error("Notification host error: {0}")]
    Host(String),
}

/// Posts and clears notifications on behalf of every coordinator
pub struct NotificationPresenter {
    sink: Arc<dyn NotificationSink>,
    channels: Once,
}

impl NotificationPresenter {
    /// Create a presenter over the host's notification API
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            channels: Once::new(),
        }
    }

    /// Declare all channels with their profiles (once per process)
    fn ensure_channels(&self) {
        self.channels.call_once(|| {
            for channel in Channel::ALL {
                if let Err(e) = self.sink.create_channel(channel, &channel.profile()) {
                    log::error!("Failed to declare channel {}: {}", channel, e);
                }
            }
            log::debug!("Notification channels created");
        });
    }

    /// Post `notification` into its slot.
    ///
    /// Without the runtime permission this does nothing.
    pub fn post(&self, notification: Notification) {
        self.ensure_channels();

        if !self.sink.permission_granted() {
            log::warn!(
                "Notification permission not granted; dropping {} on {}",
                notification.slot,
                notification.channel
            );
            return;
        }

        match self.sink.notify(&notification) {
            Ok(()) => log::debug!(
                "Notification {} shown on {}",
                notification.slot,
                notification.channel
            ),
            Err(NotifyError::Security(e)) => {
                log::error!("SecurityException when showing {}: {}", notification.slot, e)
            }
            Err(e) => log::error!("Error showing {}: {}", notification.slot, e),
        }
    }

    /// Clear whatever occupies `slot`
    pub fn cancel(&self, slot: SlotId) {
        if !self.sink.permission_granted() {
            log::warn!("Cannot dismiss {}: permission denied", slot);
            return;
        }

        match self.sink.cancel(slot) {
            Ok(()) => log::debug!("Notification {} dismissed", slot),
            Err(NotifyError::Security(e)) => {
                log::error!("SecurityException when dismissing {}: {}", slot, e)
            }
            Err(e) => log::error!("Error dismissing {}: {}", slot, e),
        }
    }
}
