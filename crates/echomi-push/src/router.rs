//! Single entry point for push payloads

use crate::events::{ApprovalRequest, CollectionJob, PushEvent};
use std::collections::HashMap;
use std::sync::Arc;

/// One handler per event kind.
///
/// Implementations must return promptly: anything that touches the network
/// or the device is expected to move onto a background task.
pub trait PushHandler: Send + Sync {
    fn on_emergency_alert(&self, title: String, body: String, caller_number: String);

    fn on_approval_request(&self, request: ApprovalRequest);

    fn on_delivery_otp_ready(&self, sender: Option<String>, order_id: Option<String>);

    fn on_collect_sms(&self, job: CollectionJob);
}

/// Validates payloads and dispatches each valid one to exactly one handler
#[derive(Clone)]
pub struct PushEventRouter {
    handler: Arc<dyn PushHandler>,
}

impl PushEventRouter {
    pub fn new(handler: Arc<dyn PushHandler>) -> Self {
        Self { handler }
    }

    /// Handle one inbound push payload.
    ///
    /// Invalid payloads are logged and dropped without any side effect.
    /// Returns whether the payload was dispatched.
    pub fn handle(&self, payload: &HashMap<String, String>) -> bool {
        let event = match PushEvent::parse(payload) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Dropping push payload: {}", e);
                return false;
            }
        };

        log::info!("Push event received: {}", event.kind());

        match event {
            PushEvent::EmergencyAlert {
                title,
                body,
                caller_number,
            } => self.handler.on_emergency_alert(title, body, caller_number),
            PushEvent::ApprovalRequest(request) => self.handler.on_approval_request(request),
            PushEvent::DeliveryOtpReady { sender, order_id } => {
                self.handler.on_delivery_otp_ready(sender, order_id)
            }
            PushEvent::CollectSms(job) => self.handler.on_collect_sms(job),
        }
        true
    }
}
