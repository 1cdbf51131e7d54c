//! Headless stand-ins for the device APIs the orchestrator drives.

use async_trait::async_trait;
use echomi_push::{AlarmDevice, AlarmError, LocalMessage, MessageStore, StoreError};
use std::path::PathBuf;

/// Serves local messages from an optional JSON file (an array of messages).
/// Without a file the store is empty.
#[derive(Debug, Clone)]
pub struct JsonMessageStore {
    path: Option<PathBuf>,
}

impl JsonMessageStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl MessageStore for JsonMessageStore {
    async fn read_recent(&self, limit: usize) -> Result<Vec<LocalMessage>, StoreError> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };

        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let mut messages: Vec<LocalMessage> = serde_json::from_str(&contents)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;

        messages.sort_by(|a, b| b.date.cmp(&a.date));
        messages.truncate(limit);
        Ok(messages)
    }
}

/// Alarm device with no speaker: every call is logged
#[derive(Debug, Default)]
pub struct LogAlarmDevice;

impl AlarmDevice for LogAlarmDevice {
    fn force_audible(&self) -> Result<(), AlarmError> {
        log::info!("Alarm: ringer normal, ring/alarm volume max");
        Ok(())
    }

    fn acquire_keep_awake(&self) -> Result<(), AlarmError> {
        log::info!("Alarm: keep-awake acquired");
        Ok(())
    }

    fn release_keep_awake(&self) {
        log::info!("Alarm: keep-awake released");
    }

    fn start_tone(&self) -> Result<(), AlarmError> {
        log::warn!("Alarm: tone playing");
        Ok(())
    }

    fn stop_tone(&self) {
        log::info!("Alarm: tone stopped");
    }
}
