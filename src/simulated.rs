//! In-process actuator
//!
//! Plays nothing; records every segment and amplitude it is asked to play and
//! reports completion from a timer thread once the on-duration has elapsed.
//! Used by the daemon's dry-run mode and by the scheduling tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::actuator::{Actuator, CompletionListener};
use crate::capability::{ActuatorInfo, Braking, Capabilities};
use crate::config::ActuatorConfig;
use crate::effect::{Amplitude, PrebakedSegment, PrimitiveSegment, RampSegment, Segment, StepSegment};

/// Duration reported for every firmware effect
pub const PREBAKED_DURATION_MS: u64 = 20;

/// Duration of every primitive, excluding its delay
pub const PRIMITIVE_DURATION_MS: u64 = 20;

#[derive(Debug, Default)]
struct SimulatedState {
    /// Bumped on every start and stop, stale timers compare against it
    generation: u64,
    vibrating: bool,
    amplitude: f32,
    segments: BTreeMap<u64, Vec<Segment>>,
    amplitudes: Vec<f32>,
    braking: Vec<Braking>,
    /// Length of every compose and PWLE batch
    batches: Vec<usize>,
    off_count: usize,
}

/// Recording actuator with asynchronous completion callbacks
pub struct SimulatedActuator {
    info: ActuatorInfo,
    latency: Duration,
    listener: Arc<dyn CompletionListener>,
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedActuator {
    pub fn new(info: ActuatorInfo, listener: Arc<dyn CompletionListener>) -> Self {
        Self {
            info,
            latency: Duration::ZERO,
            listener,
            state: Arc::new(Mutex::new(SimulatedState::default())),
        }
    }

    pub fn from_config(config: &ActuatorConfig, listener: Arc<dyn CompletionListener>) -> Self {
        Self::new(config.to_info(), listener).with_latency(Duration::from_millis(config.latency_ms))
    }

    /// Delay added to every hardware call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Segments played for one vibration, in call order
    pub fn effect_segments(&self, vibration_id: u64) -> Vec<Segment> {
        self.lock().segments.get(&vibration_id).cloned().unwrap_or_default()
    }

    /// Every amplitude applied since creation
    pub fn amplitudes(&self) -> Vec<f32> {
        self.lock().amplitudes.clone()
    }

    /// Braking passed to each PWLE call
    pub fn braking(&self) -> Vec<Braking> {
        self.lock().braking.clone()
    }

    /// Size of each `compose`/`compose_pwle` call, in call order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batches.clone()
    }

    pub fn off_count(&self) -> usize {
        self.lock().off_count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
    }

    /// Record segments and arm the completion timer
    fn start(&self, vibration_id: u64, segments: impl IntoIterator<Item = Segment>, duration_ms: u64) -> u64 {
        let generation = {
            let mut state = self.lock();
            state.generation += 1;
            state.vibrating = true;
            state.segments.entry(vibration_id).or_default().extend(segments);
            state.generation
        };

        let state = Arc::clone(&self.state);
        let listener = Arc::clone(&self.listener);
        let actuator_id = self.info.id;
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(duration_ms));
            {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                if state.generation != generation {
                    return;
                }
                state.vibrating = false;
            }
            listener.on_complete(actuator_id, vibration_id);
        });

        duration_ms
    }
}

impl Actuator for SimulatedActuator {
    fn info(&self) -> &ActuatorInfo {
        &self.info
    }

    fn on(&self, duration_ms: u64, vibration_id: u64) -> u64 {
        self.simulate_latency();
        if duration_ms == 0 {
            return 0;
        }
        tracing::debug!(actuator = self.info.id, vibration_id, duration_ms, "on");
        let step = Segment::Step(StepSegment {
            amplitude: Amplitude::Default,
            frequency_hz: 0.0,
            duration_ms,
        });
        self.start(vibration_id, [step], duration_ms)
    }

    fn perform(&self, effect: &PrebakedSegment, vibration_id: u64) -> u64 {
        self.simulate_latency();
        if !self.info.is_effect_supported(effect.effect_id) {
            return 0;
        }
        tracing::debug!(actuator = self.info.id, vibration_id, effect_id = effect.effect_id, "perform");
        self.start(vibration_id, [Segment::Prebaked(*effect)], PREBAKED_DURATION_MS)
    }

    fn compose(&self, primitives: &[PrimitiveSegment], vibration_id: u64) -> u64 {
        self.simulate_latency();
        if primitives.is_empty() || !self.info.has_capability(Capabilities::COMPOSE_EFFECTS) {
            return 0;
        }
        let duration_ms = primitives.iter().fold(0u64, |total, primitive| {
            total.saturating_add(primitive.delay_ms.saturating_add(PRIMITIVE_DURATION_MS))
        });
        tracing::debug!(actuator = self.info.id, vibration_id, count = primitives.len(), "compose");
        self.lock().batches.push(primitives.len());
        self.start(
            vibration_id,
            primitives.iter().copied().map(Segment::Primitive),
            duration_ms,
        )
    }

    fn compose_pwle(&self, ramps: &[RampSegment], braking: Braking, vibration_id: u64) -> u64 {
        self.simulate_latency();
        if ramps.is_empty() || !self.info.has_capability(Capabilities::COMPOSE_PWLE_EFFECTS) {
            return 0;
        }
        let duration_ms = ramps
            .iter()
            .fold(0u64, |total, ramp| total.saturating_add(ramp.duration_ms));
        tracing::debug!(actuator = self.info.id, vibration_id, count = ramps.len(), ?braking, "compose_pwle");
        {
            let mut state = self.lock();
            state.braking.push(braking);
            state.batches.push(ramps.len());
        }
        self.start(vibration_id, ramps.iter().copied().map(Segment::Ramp), duration_ms)
    }

    fn off(&self) {
        self.simulate_latency();
        let mut state = self.lock();
        state.generation += 1;
        state.vibrating = false;
        state.amplitude = 0.0;
        state.off_count += 1;
    }

    fn set_amplitude(&self, amplitude: f32) {
        let mut state = self.lock();
        if self.info.has_capability(Capabilities::AMPLITUDE_CONTROL) {
            state.amplitudes.push(amplitude);
        }
        state.amplitude = amplitude;
    }

    fn current_amplitude(&self) -> f32 {
        self.lock().amplitude
    }

    fn is_vibrating(&self) -> bool {
        self.lock().vibrating
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{effect_ids, primitive_ids, EffectStrength};
    use std::sync::mpsc;

    struct ChannelListener(Mutex<mpsc::Sender<(i32, u64)>>);

    impl CompletionListener for ChannelListener {
        fn on_complete(&self, actuator_id: i32, vibration_id: u64) {
            let _ = self.0.lock().unwrap().send((actuator_id, vibration_id));
        }
    }

    fn actuator(info: ActuatorInfo) -> (SimulatedActuator, mpsc::Receiver<(i32, u64)>) {
        let (tx, rx) = mpsc::channel();
        let listener = Arc::new(ChannelListener(Mutex::new(tx)));
        (SimulatedActuator::new(info, listener), rx)
    }

    #[test]
    fn test_on_records_and_completes() {
        let (actuator, rx) = actuator(ActuatorInfo::new(3));
        assert_eq!(actuator.on(10, 7), 10);
        assert!(actuator.is_vibrating());
        assert_eq!(
            actuator.effect_segments(7),
            vec![Segment::Step(StepSegment {
                amplitude: Amplitude::Default,
                frequency_hz: 0.0,
                duration_ms: 10,
            })]
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), (3, 7));
        assert!(!actuator.is_vibrating());
    }

    #[test]
    fn test_off_drops_pending_callback() {
        let (actuator, rx) = actuator(ActuatorInfo::new(1));
        actuator.on(30, 1);
        actuator.off();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(actuator.off_count(), 1);
        assert_eq!(actuator.current_amplitude(), 0.0);
    }

    #[test]
    fn test_unsupported_calls_return_zero() {
        let (actuator, _rx) = actuator(ActuatorInfo::new(1));
        let click = PrebakedSegment {
            effect_id: effect_ids::CLICK,
            strength: EffectStrength::Medium,
            fallback: true,
        };
        assert_eq!(actuator.perform(&click, 1), 0);
        let primitive = PrimitiveSegment {
            primitive_id: primitive_ids::CLICK,
            scale: 1.0,
            delay_ms: 0,
        };
        assert_eq!(actuator.compose(&[primitive], 1), 0);
        assert!(actuator.effect_segments(1).is_empty());
    }

    #[test]
    fn test_compose_duration_includes_delays() {
        let info = ActuatorInfo::new(1)
            .with_capabilities(Capabilities::COMPOSE_EFFECTS)
            .with_primitives(&[primitive_ids::CLICK]);
        let (actuator, _rx) = actuator(info);
        let primitives = [
            PrimitiveSegment { primitive_id: primitive_ids::CLICK, scale: 1.0, delay_ms: 0 },
            PrimitiveSegment { primitive_id: primitive_ids::CLICK, scale: 0.5, delay_ms: 15 },
        ];
        assert_eq!(actuator.compose(&primitives, 2), 55);
        assert_eq!(actuator.effect_segments(2).len(), 2);
        assert_eq!(actuator.batch_sizes(), vec![2]);
    }

    #[test]
    fn test_amplitude_recorded_only_with_control() {
        let (plain, _rx) = actuator(ActuatorInfo::new(1));
        plain.set_amplitude(0.5);
        assert!(plain.amplitudes().is_empty());
        assert_eq!(plain.current_amplitude(), 0.5);

        let (controlled, _rx) =
            actuator(ActuatorInfo::new(2).with_capabilities(Capabilities::AMPLITUDE_CONTROL));
        controlled.set_amplitude(0.5);
        controlled.set_amplitude(0.25);
        assert_eq!(controlled.amplitudes(), vec![0.5, 0.25]);
    }
}
