//! Wires the coordinators together behind the push router and the host's
//! notification taps.

use crate::alarm::{AlarmConfig, AlarmController, AlarmDevice};
use crate::approval::{ApprovalConfig, ApprovalCoordinator, Decision, SubmitOutcome};
use crate::collection::{BackgroundCollector, CollectionConfig, JobHandle, MessageStore};
use crate::events::{ApprovalRequest, CollectionJob};
use crate::otp::{OtpFetchCoordinator, RetryPolicy};
use crate::registration::{PushTokenRegistrar, RegistrationOutcome};
use crate::relay::{IncomingSms, IncomingSmsRelay, RelayOutcome};
use crate::router::{PushEventRouter, PushHandler};
use crate::scope::TaskScope;
use echomi_backend::{Backend, IdentityProvider};
use echomi_notify::notification::{EXTRA_APPROVAL_ID, EXTRA_CALLER_NUMBER, EXTRA_COMPANY};
use echomi_notify::{
    templates, ActionKind, Channel, Notification, NotificationAction, NotificationPresenter,
    NotificationSink, SlotId,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Host collaborators the orchestrator drives
pub struct Collaborators {
    pub backend: Arc<dyn Backend>,
    pub identity: Arc<dyn IdentityProvider>,
    pub sink: Arc<dyn NotificationSink>,
    pub alarm_device: Arc<dyn AlarmDevice>,
    pub store: Arc<dyn MessageStore>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub alarm: AlarmConfig,
    pub approval: ApprovalConfig,
    pub otp: RetryPolicy,
    pub collection: CollectionConfig,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("{action} tap is missing `{field}`")]
    MissingExtra {
        action: &'static str,
        field: &'static str,
    },
}

/// A notification tap routed back from the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAction {
    Approve { approval_id: String, company: String },
    Deny { approval_id: String, company: String },
    OpenDetail { approval_id: String },
    StopAlarm,
}

impl HostAction {
    /// Rebuild a tap from the action kind and the extras it carried
    pub fn from_extras(
        kind: ActionKind,
        extras: &BTreeMap<String, String>,
    ) -> Result<Self, ActionError> {
        let get = |field: &'static str| {
            extras
                .get(field)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(ActionError::MissingExtra {
                    action: kind.as_str(),
                    field,
                })
        };

        Ok(match kind {
            ActionKind::Approve => HostAction::Approve {
                approval_id: get(EXTRA_APPROVAL_ID)?,
                company: get(EXTRA_COMPANY)?,
            },
            ActionKind::Deny => HostAction::Deny {
                approval_id: get(EXTRA_APPROVAL_ID)?,
                company: get(EXTRA_COMPANY)?,
            },
            ActionKind::OpenDetail => HostAction::OpenDetail {
                approval_id: get(EXTRA_APPROVAL_ID)?,
            },
            ActionKind::StopAlarm => HostAction::StopAlarm,
        })
    }
}

/// The push-triggered action orchestrator.
///
/// All background work is owned by one [`TaskScope`]; [`shutdown`]
/// aborts it and silences the alarm.
///
/// [`shutdown`]: Orchestrator::shutdown
pub struct Orchestrator {
    presenter: Arc<NotificationPresenter>,
    alarm: Arc<AlarmController>,
    approvals: ApprovalCoordinator,
    otp: OtpFetchCoordinator,
    collector: BackgroundCollector,
    relay: IncomingSmsRelay,
    registrar: PushTokenRegistrar,
    scope: Arc<TaskScope>,
}

impl Orchestrator {
    pub fn new(collab: Collaborators, config: OrchestratorConfig) -> Self {
        let presenter = Arc::new(NotificationPresenter::new(collab.sink));
        let scope = Arc::new(TaskScope::new());

        Self {
            alarm: Arc::new(AlarmController::new(collab.alarm_device, config.alarm)),
            approvals: ApprovalCoordinator::new(
                collab.backend.clone(),
                collab.identity.clone(),
                presenter.clone(),
                scope.clone(),
                config.approval,
            ),
            otp: OtpFetchCoordinator::new(
                collab.backend.clone(),
                collab.identity.clone(),
                presenter.clone(),
                scope.clone(),
                config.otp,
            ),
            collector: BackgroundCollector::new(
                collab.backend.clone(),
                collab.identity.clone(),
                collab.store,
                presenter.clone(),
                scope.clone(),
                config.collection,
            ),
            relay: IncomingSmsRelay::new(
                collab.backend.clone(),
                collab.identity.clone(),
                scope.clone(),
            ),
            registrar: PushTokenRegistrar::new(collab.backend, collab.identity, scope.clone()),
            presenter,
            scope,
        }
    }

    /// Router dispatching push payloads to this orchestrator
    pub fn router(self: &Arc<Self>) -> PushEventRouter {
        PushEventRouter::new(self.clone())
    }

    /// Handle a notification tap.
    ///
    /// For approve and deny this returns the pending backend submission,
    /// or `None` when the approval was already settled.
    pub fn handle_action(&self, action: HostAction) -> Option<JoinHandle<SubmitOutcome>> {
        match action {
            HostAction::Approve {
                approval_id,
                company,
            } => self
                .approvals
                .handle_decision(&approval_id, &company, Decision::Approve),
            HostAction::Deny {
                approval_id,
                company,
            } => self
                .approvals
                .handle_decision(&approval_id, &company, Decision::Deny),
            HostAction::OpenDetail { approval_id } => {
                match self.approvals.detail(&approval_id) {
                    Some(request) => log::info!(
                        "Opening approval {}: {} delivery, caller {}, call {}",
                        approval_id,
                        request.company,
                        request.caller_number,
                        request.call_sid
                    ),
                    None => log::warn!("No details for approval {}", approval_id),
                }
                None
            }
            HostAction::StopAlarm => {
                self.alarm.stop();
                None
            }
        }
    }

    /// Relay an OTP from an incoming SMS
    pub fn on_sms_received(&self, sms: IncomingSms) -> JoinHandle<RelayOutcome> {
        self.relay.on_sms_received(sms)
    }

    /// Register a new push token with the backend
    pub fn on_new_push_token(&self, token: String) -> JoinHandle<RegistrationOutcome> {
        self.registrar.on_new_token(token)
    }

    /// Start an SMS collection job directly (push events go through the router)
    pub fn start_collection(&self, job: CollectionJob) -> JobHandle {
        self.collector.start(job)
    }

    pub fn alarm(&self) -> &AlarmController {
        &self.alarm
    }

    pub fn approvals(&self) -> &ApprovalCoordinator {
        &self.approvals
    }

    pub fn collector(&self) -> &BackgroundCollector {
        &self.collector
    }

    /// Background tasks still running
    pub fn pending_tasks(&self) -> usize {
        self.scope.active()
    }

    /// Abort all background work and silence the alarm
    pub fn shutdown(&self) {
        log::info!("Shutting down push orchestrator");
        self.scope.shutdown();
        self.alarm.stop();
    }
}

impl PushHandler for Orchestrator {
    fn on_emergency_alert(&self, title: String, body: String, caller_number: String) {
        let alarm = self.alarm.clone();
        let presenter = self.presenter.clone();
        self.scope.spawn(async move {
            alarm.trigger();
            presenter.post(
                Notification::new(
                    Channel::Emergency,
                    SlotId::EMERGENCY,
                    templates::emergency_alert(&title, &body, &caller_number),
                )
                .with_content_action(
                    NotificationAction::new(ActionKind::StopAlarm, "Open")
                        .with_extra(EXTRA_CALLER_NUMBER, caller_number.as_str()),
                ),
            );
        });
    }

    fn on_approval_request(&self, request: ApprovalRequest) {
        let approvals = self.approvals.clone();
        self.scope.spawn(async move {
            approvals.handle_request(request);
        });
    }

    fn on_delivery_otp_ready(&self, sender: Option<String>, order_id: Option<String>) {
        self.otp.handle(sender, order_id);
    }

    fn on_collect_sms(&self, job: CollectionJob) {
        self.collector.start(job);
    }
}
