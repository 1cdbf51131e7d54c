//! Background collection of recent local SMS for an active call.
//!
//! A job shows a low-importance working indicator for as long as it runs.
//! The indicator is owned by a guard moved into the job's task, so it is
//! cleared on success, failure, cancellation and panic alike.

use crate::events::{CollectionJob, DEFAULT_COLLECTION_LIMIT};
use crate::scope::TaskScope;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use echomi_backend::{Backend, IdentityProvider, SmsBatch, SmsDirection, SmsRecord, StorageType};
use echomi_notify::{templates, Channel, Notification, NotificationPresenter, SlotId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Hard cap on messages read by one job
pub const DEFAULT_MAX_LIMIT: usize = 500;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("SMS read permission not granted")]
    PermissionDenied,

    #[error("Message store unavailable: {0}")]
    Unavailable(String),
}

/// Local mailbox a message lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mailbox {
    Inbox,
    Sent,
    Outbox,
    Draft,
    Failed,
    Queued,
}

impl Mailbox {
    /// Anything that did not arrive in the inbox counts as sent
    pub fn direction(&self) -> SmsDirection {
        match self {
            Mailbox::Inbox => SmsDirection::Inbox,
            _ => SmsDirection::Sent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMessage {
    pub address: String,
    pub body: String,
    pub date: DateTime<Utc>,
    pub mailbox: Mailbox,
}

impl From<LocalMessage> for SmsRecord {
    fn from(msg: LocalMessage) -> Self {
        SmsRecord {
            phone_number: msg.address.clone(),
            sender: msg.address,
            message: msg.body,
            timestamp: msg.date,
            sms_type: msg.mailbox.direction(),
        }
    }
}

/// The device's SMS store
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Up to `limit` messages, newest first
    async fn read_recent(&self, limit: usize) -> Result<Vec<LocalMessage>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_COLLECTION_LIMIT,
            max_limit: DEFAULT_MAX_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Uploaded { count: usize },
    NothingToUpload,
    ReadFailed(String),
    AuthUnavailable,
    UploadFailed(String),
    Cancelled,
    Crashed(String),
}

/// Running collection job. Dropping the handle leaves the job running.
pub struct JobHandle {
    call_sid: String,
    task: JoinHandle<JobOutcome>,
}

impl JobHandle {
    pub fn call_sid(&self) -> &str {
        &self.call_sid
    }

    /// Stop the job. Its indicator is cleared as the task unwinds.
    pub fn cancel(&self) {
        log::info!("Cancelling SMS collection for {}", self.call_sid);
        self.task.abort();
    }

    pub async fn outcome(self) -> JobOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => JobOutcome::Cancelled,
            Err(e) => {
                log::error!("SMS collection for {} panicked: {}", self.call_sid, e);
                JobOutcome::Crashed(e.to_string())
            }
        }
    }
}

/// Clears the working indicator and deregisters the job on drop
struct JobGuard {
    id: u64,
    call_sid: String,
    presenter: Arc<NotificationPresenter>,
    active: Arc<Mutex<HashSet<u64>>>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        {
            // Concurrent jobs share one indicator slot. The cancel happens
            // under the lock so a job starting meanwhile keeps its indicator.
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.remove(&self.id);
            if active.is_empty() {
                self.presenter.cancel(SlotId::BACKGROUND);
            }
        }
        log::info!("SMS collection for {} finished", self.call_sid);
    }
}

/// Starts background collection jobs
#[derive(Clone)]
pub struct BackgroundCollector {
    backend: Arc<dyn Backend>,
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn MessageStore>,
    presenter: Arc<NotificationPresenter>,
    scope: Arc<TaskScope>,
    config: CollectionConfig,
    active: Arc<Mutex<HashSet<u64>>>,
    next_id: Arc<AtomicU64>,
}

impl BackgroundCollector {
    pub fn new(
        backend: Arc<dyn Backend>,
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn MessageStore>,
        presenter: Arc<NotificationPresenter>,
        scope: Arc<TaskScope>,
        config: CollectionConfig,
    ) -> Self {
        Self {
            backend,
            identity,
            store,
            presenter,
            scope,
            config,
            active: Arc::new(Mutex::new(HashSet::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Jobs currently running
    pub fn active_jobs(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Limit actually used for `requested`
    pub fn effective_limit(&self, requested: usize) -> usize {
        let limit = if requested == 0 {
            self.config.default_limit
        } else {
            requested
        };
        limit.clamp(1, self.config.max_limit.max(1))
    }

    /// Show the working indicator and collect in the background
    pub fn start(&self, job: CollectionJob) -> JobHandle {
        let limit = self.effective_limit(job.limit);
        if limit != job.limit {
            log::warn!(
                "Requested limit {} for {} clamped to {}",
                job.limit,
                job.call_sid,
                limit
            );
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.insert(id);
            self.presenter.post(
                Notification::new(
                    Channel::Background,
                    SlotId::BACKGROUND,
                    templates::collection_working(
                        job.storage_type == StorageType::Emergency,
                        limit,
                    ),
                )
                .ongoing(),
            );
        }
        let guard = JobGuard {
            id,
            call_sid: job.call_sid.clone(),
            presenter: self.presenter.clone(),
            active: self.active.clone(),
        };

        log::info!(
            "Collecting up to {} {} SMS for call {}",
            limit,
            job.storage_type,
            job.call_sid
        );

        let call_sid = job.call_sid.clone();
        let this = self.clone();
        let task = self.scope.spawn(async move {
            let _guard = guard;
            this.run(job, limit).await
        });

        JobHandle { call_sid, task }
    }

    async fn run(&self, job: CollectionJob, limit: usize) -> JobOutcome {
        let mut messages = match self.store.read_recent(limit).await {
            Ok(messages) => messages,
            Err(e) => {
                log::error!("Failed to read SMS for {}: {}", job.call_sid, e);
                return JobOutcome::ReadFailed(e.to_string());
            }
        };

        messages.sort_by(|a, b| b.date.cmp(&a.date));
        messages.truncate(limit);

        if messages.is_empty() {
            log::warn!("No SMS messages found for {}", job.call_sid);
            return JobOutcome::NothingToUpload;
        }

        let credential = match self.identity.id_token(true).await {
            Ok(credential) => credential,
            Err(e) => {
                log::error!("Cannot upload SMS for {}: {}", job.call_sid, e);
                return JobOutcome::AuthUnavailable;
            }
        };

        let count = messages.len();
        let batch = SmsBatch {
            user_id: job.user_id,
            call_sid: job.call_sid,
            messages: messages.into_iter().map(SmsRecord::from).collect(),
            storage_type: job.storage_type,
        };

        match self.backend.upload_sms_batch(&credential, &batch).await {
            Ok(()) => {
                log::info!("Uploaded {} SMS for call {}", count, batch.call_sid);
                JobOutcome::Uploaded { count }
            }
            Err(e) => {
                log::error!("SMS upload for {} failed: {}", batch.call_sid, e);
                JobOutcome::UploadFailed(e.to_string())
            }
        }
    }
}
