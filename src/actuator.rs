//! Actuator hardware interface
//!
//! Every call is synchronous and may be slow; the scheduler thread is the only
//! caller. Calls that start output return the expected on-duration in
//! milliseconds, 0 when nothing was started, and completion is reported later
//! through a [`CompletionListener`].

use std::sync::Arc;

use crate::capability::{ActuatorInfo, Braking};
use crate::effect::{PrebakedSegment, PrimitiveSegment, RampSegment};

/// One haptic output device
pub trait Actuator: Send + Sync {
    fn info(&self) -> &ActuatorInfo;

    fn id(&self) -> i32 {
        self.info().id
    }

    /// Turn on for `duration_ms`
    fn on(&self, duration_ms: u64, vibration_id: u64) -> u64;

    /// Play a firmware effect
    fn perform(&self, effect: &PrebakedSegment, vibration_id: u64) -> u64;

    /// Play a batch of primitives
    fn compose(&self, primitives: &[PrimitiveSegment], vibration_id: u64) -> u64;

    /// Play a batch of PWLE ramps
    fn compose_pwle(&self, ramps: &[RampSegment], braking: Braking, vibration_id: u64) -> u64;

    /// Stop all output; a pending completion callback is dropped
    fn off(&self);

    fn set_amplitude(&self, amplitude: f32);

    /// Amplitude last applied, 0 when off
    fn current_amplitude(&self) -> f32;

    fn is_vibrating(&self) -> bool;
}

/// Receiver of asynchronous "actuator finished" notifications
pub trait CompletionListener: Send + Sync {
    fn on_complete(&self, actuator_id: i32, vibration_id: u64);
}

/// Actuator shared between the service and the scheduler thread
pub type SharedActuator = Arc<dyn Actuator>;
