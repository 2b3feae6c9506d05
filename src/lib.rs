//! vibrationd Library
//!
//! Haptic effect scheduling for multi-actuator vibrator hardware: effect
//! model, capability-driven adaptation, and the step conductor played on a
//! dedicated scheduler thread.

pub mod actuator;
pub mod adapter;
pub mod capability;
pub mod conductor;
pub mod config;
pub mod config_watcher;
pub mod effect;
pub mod hooks;
pub mod service;
pub mod simulated;
pub mod thread;
pub mod token;
pub mod vibration;

mod step;

#[cfg(test)]
mod testing;

/// Re-export commonly used types
pub use actuator::{Actuator, CompletionListener, SharedActuator};
pub use adapter::{AdaptError, AdaptedEffect, EffectAdapter};
pub use capability::{ActuatorInfo, Braking, Capabilities, FrequencyProfile, SyncCapabilities};
pub use conductor::{ConductorHandle, StepConductor};
pub use config::{load_shared_config, new_shared_config, ActuatorConfig, Config, ConfigError, SharedConfig, VibrationConfig};
pub use config_watcher::{ConfigWatcher, WatchError};
pub use effect::{Amplitude, CombinedVibration, EffectError, EffectStrength, Segment, VibrationEffect};
pub use hooks::{LoggingWakeLock, VibratorManagerHooks, WakeLock};
pub use service::{CompletionRouter, ServiceError, ServiceEvent, ServiceHooks, VibratorService};
pub use simulated::SimulatedActuator;
pub use thread::SchedulerThread;
pub use token::{DeathRecipient, LifecycleToken, TokenError};
pub use vibration::{Vibration, VibrationStatus};
