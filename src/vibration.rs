//! Vibration requests and their end states

use std::collections::BTreeMap;
use std::fmt;

use crate::effect::{CombinedVibration, VibrationEffect};
use crate::token::LifecycleToken;

/// End state of a vibration request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VibrationStatus {
    Running,
    Finished,
    CancelledByUser,
    CancelledByScreenOff,
    CancelledBySettingsUpdate,
    CancelledSuperseded,
    CancelledBinderDied,
    /// No actuator could play any part of the request
    IgnoredUnsupported,
    /// The requesting client died before the request started
    IgnoredErrorToken,
}

impl fmt::Display for VibrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VibrationStatus::Running => "running",
            VibrationStatus::Finished => "finished",
            VibrationStatus::CancelledByUser => "cancelled_by_user",
            VibrationStatus::CancelledByScreenOff => "cancelled_by_screen_off",
            VibrationStatus::CancelledBySettingsUpdate => "cancelled_by_settings_update",
            VibrationStatus::CancelledSuperseded => "cancelled_superseded",
            VibrationStatus::CancelledBinderDied => "cancelled_binder_died",
            VibrationStatus::IgnoredUnsupported => "ignored_unsupported",
            VibrationStatus::IgnoredErrorToken => "ignored_error_token",
        };
        f.write_str(name)
    }
}

/// One client request
#[derive(Debug, Clone)]
pub struct Vibration {
    pub id: u64,
    pub effect: CombinedVibration,
    pub uid: u32,
    pub package_name: String,
    pub reason: String,
    pub token: LifecycleToken,
    /// Replacements for prebaked effects the actuators cannot play
    pub fallbacks: BTreeMap<i32, VibrationEffect>,
}

impl Vibration {
    pub fn new(id: u64, effect: CombinedVibration, uid: u32, token: LifecycleToken) -> Self {
        Self {
            id,
            effect,
            uid,
            package_name: String::new(),
            reason: String::new(),
            token,
            fallbacks: BTreeMap::new(),
        }
    }

    pub fn with_fallback(mut self, effect_id: i32, fallback: VibrationEffect) -> Self {
        self.fallbacks.insert(effect_id, fallback);
        self
    }

    pub fn with_package(mut self, package_name: &str, reason: &str) -> Self {
        self.package_name = package_name.to_string();
        self.reason = reason.to_string();
        self
    }
}
