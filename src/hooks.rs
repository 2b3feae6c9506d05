//! Callbacks from the scheduling core into its owner

use crate::capability::SyncCapabilities;
use crate::vibration::VibrationStatus;

/// Manager-level operations and lifecycle notifications
///
/// Called from the scheduler thread only, except where noted.
pub trait VibratorManagerHooks: Send + Sync {
    /// Prepare the listed actuators for a synchronized start
    fn prepare_synced_vibration(&self, required: SyncCapabilities, actuator_ids: &[i32]) -> bool;

    /// Start every prepared actuator at once
    fn trigger_synced_vibration(&self, vibration_id: u64) -> bool;

    /// Abort a prepared synchronized start
    fn cancel_synced_vibration(&self);

    /// Accounting: actuators turned on for `duration_ms` on behalf of `uid`
    fn note_vibrator_on(&self, uid: u32, duration_ms: u64);

    fn note_vibrator_off(&self, uid: u32);

    /// Reported once, when the vibration leaves [`VibrationStatus::Running`]
    fn on_vibration_completed(&self, vibration_id: u64, status: VibrationStatus);

    /// Reported once, after all cleanup, when the scheduler thread is free
    fn on_vibration_thread_released(&self, vibration_id: u64);
}

/// Keeps the system awake while a vibration plays
pub trait WakeLock: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

/// Wake lock for hosts without power management
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingWakeLock;

impl WakeLock for LoggingWakeLock {
    fn acquire(&self) {
        tracing::trace!("Wake lock acquired");
    }

    fn release(&self) {
        tracing::trace!("Wake lock released");
    }
}
