//! Emergency alarm: audible alert with a hard duration ceiling.
//!
//! While an alarm is active the device is kept awake and an alarm tone
//! loops. Both are held by an [`AlarmSession`] and released when the session
//! drops, whether through [`AlarmController::stop`], the ceiling timer, or
//! the controller itself going away.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Upper bound on how long one alarm may sound
pub const MAX_ALARM_CEILING: Duration = Duration::from_secs(120);

/// Errors from the host audio / power APIs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlarmError {
    #[error("Audio control failed: {0}")]
    Audio(String),

    #[error("Keep-awake unavailable: {0}")]
    KeepAwake(String),

    #[error("Alarm tone failed: {0}")]
    Tone(String),
}

/// Host audio and power controls used by the alarm
pub trait AlarmDevice: Send + Sync {
    /// Ringer to normal, ring and alarm streams to maximum volume
    fn force_audible(&self) -> Result<(), AlarmError>;

    fn acquire_keep_awake(&self) -> Result<(), AlarmError>;

    fn release_keep_awake(&self);

    /// Start the looping alarm tone
    fn start_tone(&self) -> Result<(), AlarmError>;

    fn stop_tone(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmConfig {
    pub ceiling: Duration,
}

impl AlarmConfig {
    /// Ceiling clamped to [`MAX_ALARM_CEILING`]
    pub fn new(ceiling: Duration) -> Self {
        Self {
            ceiling: ceiling.min(MAX_ALARM_CEILING),
        }
    }
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            ceiling: MAX_ALARM_CEILING,
        }
    }
}

/// Keep-awake plus tone, held for the lifetime of the value
pub struct AlarmSession {
    device: Arc<dyn AlarmDevice>,
    started_at: Instant,
    tone: bool,
}

impl AlarmSession {
    fn acquire(device: Arc<dyn AlarmDevice>) -> Result<Self, AlarmError> {
        device.acquire_keep_awake()?;

        let mut session = Self {
            device,
            started_at: Instant::now(),
            tone: false,
        };
        match session.device.start_tone() {
            Ok(()) => session.tone = true,
            // Silent alarm; keep-awake is still released on drop
            Err(e) => log::error!("Failed to start alarm tone: {}", e),
        }
        Ok(session)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Drop for AlarmSession {
    fn drop(&mut self) {
        if self.tone {
            self.device.stop_tone();
        }
        self.device.release_keep_awake();
        log::info!(
            "Emergency alarm released after {}s",
            self.started_at.elapsed().as_secs()
        );
    }
}

struct Active {
    session: AlarmSession,
    ceiling: JoinHandle<()>,
    generation: u64,
}

#[derive(Default)]
struct AlarmState {
    active: Option<Active>,
    generation: u64,
}

fn lock(state: &Mutex<AlarmState>) -> MutexGuard<'_, AlarmState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns at most one live [`AlarmSession`]
pub struct AlarmController {
    device: Arc<dyn AlarmDevice>,
    config: AlarmConfig,
    state: Arc<Mutex<AlarmState>>,
}

impl AlarmController {
    pub fn new(device: Arc<dyn AlarmDevice>, config: AlarmConfig) -> Self {
        Self {
            device,
            config,
            state: Arc::new(Mutex::new(AlarmState::default())),
        }
    }

    /// Sound the alarm, or restart the ceiling timer if it already sounds.
    ///
    /// Failures of the host controls are logged; the alert notification is
    /// posted by the caller regardless.
    pub fn trigger(&self) {
        if let Err(e) = self.device.force_audible() {
            log::error!("Could not force alarm volume: {}", e);
        }

        let mut state = lock(&self.state);
        state.generation += 1;
        let generation = state.generation;

        if let Some(active) = state.active.as_mut() {
            active.ceiling.abort();
            active.generation = generation;
            active.ceiling = self.spawn_ceiling(generation);
            log::info!(
                "Emergency alarm re-triggered; ceiling restarted ({}s)",
                self.config.ceiling.as_secs()
            );
            return;
        }

        match AlarmSession::acquire(self.device.clone()) {
            Ok(session) => {
                state.active = Some(Active {
                    session,
                    ceiling: self.spawn_ceiling(generation),
                    generation,
                });
                log::warn!(
                    "Emergency alarm sounding (max {}s)",
                    self.config.ceiling.as_secs()
                );
            }
            Err(e) => log::error!("Emergency alarm unavailable: {}", e),
        }
    }

    fn spawn_ceiling(&self, generation: u64) -> JoinHandle<()> {
        let state = self.state.clone();
        let ceiling = self.config.ceiling;
        tokio::spawn(async move {
            tokio::time::sleep(ceiling).await;
            let expired = {
                let mut state = lock(&state);
                let current = state.active.as_ref().map(|a| a.generation) == Some(generation);
                if current {
                    state.active.take()
                } else {
                    None
                }
            };
            if let Some(active) = expired {
                log::warn!(
                    "Emergency alarm reached its {}s ceiling; stopping",
                    ceiling.as_secs()
                );
                drop(active.session);
            }
        })
    }

    /// Silence the alarm now. Safe to call when nothing is sounding.
    pub fn stop(&self) {
        let active = lock(&self.state).active.take();
        match active {
            Some(active) => {
                active.ceiling.abort();
                log::info!("Emergency alarm stopped");
                drop(active.session);
            }
            None => log::debug!("Emergency alarm already idle"),
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.state).active.is_some()
    }

    /// How long the current alarm has been sounding
    pub fn elapsed(&self) -> Option<Duration> {
        lock(&self.state)
            .active
            .as_ref()
            .map(|a| a.session.elapsed())
    }
}

impl Drop for AlarmController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAlarmDevice;

    fn setup() -> (Arc<FakeAlarmDevice>, AlarmController) {
        let device = Arc::new(FakeAlarmDevice::new());
        let controller = AlarmController::new(device.clone(), AlarmConfig::default());
        (device, controller)
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_holds_until_ceiling() {
        let (device, alarm) = setup();
        alarm.trigger();

        assert!(alarm.is_active());
        assert!(device.is_held());
        assert!(device.tone_playing());
        assert_eq!(device.audible_forced(), 1);

        tokio::time::sleep(Duration::from_secs(119)).await;
        assert!(device.is_held());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!alarm.is_active());
        assert!(!device.is_held());
        assert!(!device.tone_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (device, alarm) = setup();
        alarm.trigger();
        alarm.stop();
        alarm.stop();

        assert!(!alarm.is_active());
        assert_eq!(device.keep_awake_acquired(), 1);
        assert_eq!(device.keep_awake_released(), 1);

        // The aborted ceiling must not release anything twice
        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(device.keep_awake_released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrigger_restarts_ceiling_without_second_session() {
        let (device, alarm) = setup();
        alarm.trigger();
        tokio::time::sleep(Duration::from_secs(100)).await;

        alarm.trigger();
        assert_eq!(device.keep_awake_acquired(), 1);
        assert_eq!(device.audible_forced(), 2);

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(alarm.is_active(), "first ceiling must not fire");

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert!(!alarm.is_active());
        assert_eq!(device.keep_awake_released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_awake_failure_leaves_alarm_idle() {
        let (device, alarm) = setup();
        device.fail_keep_awake(true);
        alarm.trigger();

        assert!(!alarm.is_active());
        assert!(!device.tone_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tone_failure_still_releases_keep_awake() {
        let (device, alarm) = setup();
        device.fail_tone(true);
        alarm.trigger();
        assert!(device.is_held());

        alarm.stop();
        assert!(!device.is_held());
        assert_eq!(device.tone_stopped(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases() {
        let (device, alarm) = setup();
        alarm.trigger();
        drop(alarm);
        assert!(!device.is_held());
    }

    #[test]
    fn test_config_clamped() {
        let config = AlarmConfig::new(Duration::from_secs(600));
        assert_eq!(config.ceiling, MAX_ALARM_CEILING);
        assert_eq!(AlarmConfig::new(Duration::from_secs(30)).ceiling.as_secs(), 30);
    }
}
