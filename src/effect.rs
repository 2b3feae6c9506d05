//! Vibration effect model
//!
//! Immutable descriptions of haptic output. A [`VibrationEffect`] is an ordered
//! list of [`Segment`]s with an optional repeat index; a [`CombinedVibration`]
//! maps effects onto one or more actuators, in parallel or in sequence.
//!
//! Effects deserialize from JSON so the daemon can play effect files:
//!
//! ```json
//! { "type": "mono", "effect": { "segments": [
//!     { "type": "step", "amplitude": { "level": 0.4 }, "duration_ms": 10 }
//! ] } }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Constants
// ============================================================================

/// Largest raw amplitude accepted by the integer waveform builders
pub const MAX_AMPLITUDE: u8 = 255;

/// Longest accepted segment duration, primitive delay or sequential delay
pub const MAX_DURATION_MS: u64 = 3_600_000;

/// Prebaked effect identifiers understood by actuator firmware
pub mod effect_ids {
    pub const CLICK: i32 = 0;
    pub const DOUBLE_CLICK: i32 = 1;
    pub const TICK: i32 = 2;
    pub const THUD: i32 = 3;
    pub const POP: i32 = 4;
    pub const HEAVY_CLICK: i32 = 5;
}

/// Composition primitive identifiers
pub mod primitive_ids {
    pub const NOOP: i32 = 0;
    pub const CLICK: i32 = 1;
    pub const THUD: i32 = 2;
    pub const SPIN: i32 = 3;
    pub const QUICK_RISE: i32 = 4;
    pub const SLOW_RISE: i32 = 5;
    pub const QUICK_FALL: i32 = 6;
    pub const TICK: i32 = 7;
    pub const LOW_TICK: i32 = 8;
}

// ============================================================================
// Segments
// ============================================================================

/// Amplitude of a fixed step, either explicit (0.0-1.0) or the device default
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Amplitude {
    /// Device default amplitude, resolved by the effect adapter
    Default,
    /// Normalized amplitude in 0.0..=1.0
    Level(f32),
}

impl Amplitude {
    /// Normalize a raw 0-255 amplitude
    pub fn from_raw(raw: u8) -> Self {
        Amplitude::Level(raw as f32 / MAX_AMPLITUDE as f32)
    }

    /// True only for an explicit zero level
    pub fn is_zero(&self) -> bool {
        matches!(self, Amplitude::Level(level) if *level == 0.0)
    }

    /// Concrete level, substituting `default` for [`Amplitude::Default`]
    pub fn resolve(&self, default: f32) -> f32 {
        match self {
            Amplitude::Default => default,
            Amplitude::Level(level) => *level,
        }
    }
}

/// Strength requested for a prebaked effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectStrength {
    Light,
    #[default]
    Medium,
    Strong,
}

/// Fixed amplitude held for a duration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepSegment {
    pub amplitude: Amplitude,
    /// Target frequency, 0 means the actuator's resonant frequency
    #[serde(default)]
    pub frequency_hz: f32,
    pub duration_ms: u64,
}

/// Piecewise-linear envelope (PWLE) between two amplitude/frequency points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RampSegment {
    pub start_amplitude: f32,
    pub end_amplitude: f32,
    #[serde(default)]
    pub start_frequency_hz: f32,
    #[serde(default)]
    pub end_frequency_hz: f32,
    pub duration_ms: u64,
}

/// Named effect stored in actuator firmware
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrebakedSegment {
    pub effect_id: i32,
    #[serde(default)]
    pub strength: EffectStrength,
    /// Whether a request-level fallback may replace this effect
    #[serde(default = "default_true")]
    pub fallback: bool,
}

/// Composition primitive with a scale and a leading delay
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveSegment {
    pub primitive_id: i32,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default)]
    pub delay_ms: u64,
}

fn default_true() -> bool { true }
fn default_scale() -> f32 { 1.0 }

/// One atomic piece of haptic output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Step(StepSegment),
    Ramp(RampSegment),
    Prebaked(PrebakedSegment),
    Primitive(PrimitiveSegment),
}

impl Segment {
    /// Declared duration, `None` when only the actuator knows it
    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            Segment::Step(step) => Some(step.duration_ms),
            Segment::Ramp(ramp) => Some(ramp.duration_ms),
            Segment::Prebaked(_) | Segment::Primitive(_) => None,
        }
    }

    /// Whether playing this segment advances time on the actuator
    fn takes_time(&self) -> bool {
        self.duration_ms().map_or(true, |duration| duration > 0)
    }

    fn validate(&self) -> Result<(), EffectError> {
        match self {
            Segment::Step(step) => {
                check_duration(step.duration_ms)?;
                if let Amplitude::Level(level) = step.amplitude {
                    check_unit(level, EffectError::AmplitudeOutOfRange)?;
                }
                check_frequency(step.frequency_hz)
            }
            Segment::Ramp(ramp) => {
                check_duration(ramp.duration_ms)?;
                check_unit(ramp.start_amplitude, EffectError::AmplitudeOutOfRange)?;
                check_unit(ramp.end_amplitude, EffectError::AmplitudeOutOfRange)?;
                check_frequency(ramp.start_frequency_hz)?;
                check_frequency(ramp.end_frequency_hz)
            }
            Segment::Prebaked(_) => Ok(()),
            Segment::Primitive(primitive) => {
                check_duration(primitive.delay_ms)?;
                check_unit(primitive.scale, EffectError::ScaleOutOfRange)
            }
        }
    }
}

fn check_unit(value: f32, err: fn(f32) -> EffectError) -> Result<(), EffectError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(err(value))
    }
}

fn check_duration(duration_ms: u64) -> Result<(), EffectError> {
    if duration_ms <= MAX_DURATION_MS {
        Ok(())
    } else {
        Err(EffectError::DurationTooLong(duration_ms))
    }
}

fn check_frequency(value: f32) -> Result<(), EffectError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(EffectError::FrequencyOutOfRange(value))
    }
}

// ============================================================================
// Single-actuator Effect
// ============================================================================

/// Ordered segment list, optionally looping from `repeat_index` until cancelled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibrationEffect {
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub repeat_index: Option<usize>,
}

impl VibrationEffect {
    /// Single pulse at a fixed amplitude
    pub fn one_shot(duration_ms: u64, amplitude: Amplitude) -> Self {
        Self {
            segments: vec![Segment::Step(StepSegment {
                amplitude,
                frequency_hz: 0.0,
                duration_ms,
            })],
            repeat_index: None,
        }
    }

    /// Timed amplitude steps, amplitudes given as raw 0-255 values
    pub fn waveform(
        timings: &[u64],
        amplitudes: &[u8],
        repeat_index: Option<usize>,
    ) -> Result<Self, EffectError> {
        if timings.len() != amplitudes.len() {
            return Err(EffectError::LengthMismatch {
                timings: timings.len(),
                amplitudes: amplitudes.len(),
            });
        }
        let segments = timings
            .iter()
            .zip(amplitudes)
            .map(|(&duration_ms, &raw)| {
                Segment::Step(StepSegment {
                    amplitude: Amplitude::from_raw(raw),
                    frequency_hz: 0.0,
                    duration_ms,
                })
            })
            .collect();
        Ok(Self { segments, repeat_index })
    }

    /// Alternating off/on timings, starting with an off period
    pub fn waveform_on_off(timings: &[u64], repeat_index: Option<usize>) -> Self {
        let segments = timings
            .iter()
            .enumerate()
            .map(|(i, &duration_ms)| {
                let amplitude = if i % 2 == 0 {
                    Amplitude::Level(0.0)
                } else {
                    Amplitude::Default
                };
                Segment::Step(StepSegment { amplitude, frequency_hz: 0.0, duration_ms })
            })
            .collect();
        Self { segments, repeat_index }
    }

    /// Prebaked effect at medium strength, fallback allowed
    pub fn prebaked(effect_id: i32) -> Self {
        Self::prebaked_with(effect_id, EffectStrength::Medium, true)
    }

    pub fn prebaked_with(effect_id: i32, strength: EffectStrength, fallback: bool) -> Self {
        Self {
            segments: vec![Segment::Prebaked(PrebakedSegment {
                effect_id,
                strength,
                fallback,
            })],
            repeat_index: None,
        }
    }

    pub fn start_composition() -> Composition {
        Composition::default()
    }

    pub fn start_waveform() -> WaveformBuilder {
        WaveformBuilder::starting_at(0.0, 0.0)
    }

    pub fn is_repeating(&self) -> bool {
        self.repeat_index.is_some()
    }

    /// Sum of segment durations, `None` if repeating or any duration is unknown
    pub fn total_duration_ms(&self) -> Option<u64> {
        if self.is_repeating() {
            return None;
        }
        self.segments.iter().try_fold(0u64, |total, segment| {
            segment.duration_ms().map(|duration| total.saturating_add(duration))
        })
    }

    /// Check ranges and structure before the effect is scheduled
    pub fn validate(&self) -> Result<(), EffectError> {
        if self.segments.is_empty() {
            return Err(EffectError::Empty);
        }
        for segment in &self.segments {
            segment.validate()?;
        }
        if let Some(index) = self.repeat_index {
            if index >= self.segments.len() {
                return Err(EffectError::InvalidRepeatIndex {
                    index,
                    len: self.segments.len(),
                });
            }
            // A loop of zero-length steps would spin the scheduler forever
            if !self.segments[index..].iter().any(Segment::takes_time) {
                return Err(EffectError::ZeroDurationLoop);
            }
        }
        Ok(())
    }
}

/// Builder for primitive compositions and concatenated effects
#[derive(Debug, Clone, Default)]
pub struct Composition {
    segments: Vec<Segment>,
    repeat_index: Option<usize>,
    error: Option<EffectError>,
}

impl Composition {
    pub fn add_primitive(self, primitive_id: i32, scale: f32, delay_ms: u64) -> Self {
        self.push(vec![Segment::Primitive(PrimitiveSegment {
            primitive_id,
            scale,
            delay_ms,
        })])
    }

    /// Append a non-repeating effect
    pub fn add_effect(self, effect: VibrationEffect) -> Self {
        if effect.is_repeating() {
            return self.fail(EffectError::NestedRepeat);
        }
        self.push(effect.segments)
    }

    /// Append an effect that loops until cancelled; nothing can follow it
    pub fn repeat_effect_indefinitely(mut self, effect: VibrationEffect) -> Self {
        if effect.is_repeating() {
            return self.fail(EffectError::NestedRepeat);
        }
        let start = self.segments.len();
        self = self.push(effect.segments);
        if self.error.is_none() {
            self.repeat_index = Some(start);
        }
        self
    }

    pub fn compose(self) -> Result<VibrationEffect, EffectError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let effect = VibrationEffect {
            segments: self.segments,
            repeat_index: self.repeat_index,
        };
        effect.validate()?;
        Ok(effect)
    }

    fn push(mut self, segments: Vec<Segment>) -> Self {
        if self.repeat_index.is_some() {
            return self.fail(EffectError::AddAfterRepeat);
        }
        self.segments.extend(segments);
        self
    }

    fn fail(mut self, err: EffectError) -> Self {
        self.error.get_or_insert(err);
        self
    }
}

/// Builder for PWLE waveforms expressed as transitions from the current point
///
/// A zero-duration transition jumps straight to the target without emitting
/// a segment.
#[derive(Debug, Clone)]
pub struct WaveformBuilder {
    segments: Vec<Segment>,
    amplitude: f32,
    frequency_hz: f32,
}

impl WaveformBuilder {
    pub fn starting_at(amplitude: f32, frequency_hz: f32) -> Self {
        Self {
            segments: Vec::new(),
            amplitude,
            frequency_hz,
        }
    }

    /// Linear transition to a new amplitude and frequency
    pub fn add_transition(mut self, duration_ms: u64, amplitude: f32, frequency_hz: f32) -> Self {
        if duration_ms > 0 {
            self.segments.push(Segment::Ramp(RampSegment {
                start_amplitude: self.amplitude,
                end_amplitude: amplitude,
                start_frequency_hz: self.frequency_hz,
                end_frequency_hz: frequency_hz,
                duration_ms,
            }));
        }
        self.amplitude = amplitude;
        self.frequency_hz = frequency_hz;
        self
    }

    pub fn add_amplitude_transition(self, duration_ms: u64, amplitude: f32) -> Self {
        let frequency_hz = self.frequency_hz;
        self.add_transition(duration_ms, amplitude, frequency_hz)
    }

    pub fn add_frequency_transition(self, duration_ms: u64, frequency_hz: f32) -> Self {
        let amplitude = self.amplitude;
        self.add_transition(duration_ms, amplitude, frequency_hz)
    }

    /// Hold the current amplitude and frequency
    pub fn add_sustain(self, duration_ms: u64) -> Self {
        let (amplitude, frequency_hz) = (self.amplitude, self.frequency_hz);
        self.add_transition(duration_ms, amplitude, frequency_hz)
    }

    pub fn build(self) -> Result<VibrationEffect, EffectError> {
        let effect = VibrationEffect {
            segments: self.segments,
            repeat_index: None,
        };
        effect.validate()?;
        Ok(effect)
    }
}

// ============================================================================
// Combined Vibration
// ============================================================================

/// Effect tree addressed to a set of actuators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CombinedVibration {
    /// Same effect on every actuator
    Mono { effect: VibrationEffect },
    /// Per-actuator effects played in parallel
    Stereo { effects: BTreeMap<i32, VibrationEffect> },
    /// Mono/stereo entries played one after another
    Sequential { entries: Vec<SequentialEntry> },
}

/// One entry of a sequential vibration, started `delay_ms` after the previous one ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequentialEntry {
    #[serde(default)]
    pub delay_ms: u64,
    pub vibration: CombinedVibration,
}

impl CombinedVibration {
    pub fn mono(effect: VibrationEffect) -> Self {
        CombinedVibration::Mono { effect }
    }

    pub fn stereo<I>(effects: I) -> Self
    where
        I: IntoIterator<Item = (i32, VibrationEffect)>,
    {
        CombinedVibration::Stereo {
            effects: effects.into_iter().collect(),
        }
    }

    pub fn start_sequential() -> SequentialBuilder {
        SequentialBuilder::default()
    }

    /// Whether this vibration addresses the actuator
    pub fn has_actuator(&self, actuator_id: i32) -> bool {
        match self {
            CombinedVibration::Mono { .. } => true,
            CombinedVibration::Stereo { effects } => effects.contains_key(&actuator_id),
            CombinedVibration::Sequential { entries } => entries
                .iter()
                .any(|entry| entry.vibration.has_actuator(actuator_id)),
        }
    }

    /// Flatten into sequential entries; a mono/stereo vibration becomes one entry
    pub fn into_sequential(self) -> Vec<SequentialEntry> {
        match self {
            CombinedVibration::Sequential { entries } => entries,
            other => vec![SequentialEntry {
                delay_ms: 0,
                vibration: other,
            }],
        }
    }

    /// Effects of a mono/stereo vibration for the given actuators
    pub fn effects_for<'a, I>(&'a self, actuator_ids: I) -> BTreeMap<i32, &'a VibrationEffect>
    where
        I: IntoIterator<Item = i32>,
    {
        match self {
            CombinedVibration::Mono { effect } => {
                actuator_ids.into_iter().map(|id| (id, effect)).collect()
            }
            CombinedVibration::Stereo { effects } => actuator_ids
                .into_iter()
                .filter_map(|id| effects.get(&id).map(|effect| (id, effect)))
                .collect(),
            CombinedVibration::Sequential { .. } => BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), EffectError> {
        match self {
            CombinedVibration::Mono { effect } => effect.validate(),
            CombinedVibration::Stereo { effects } => {
                if effects.is_empty() {
                    return Err(EffectError::Empty);
                }
                effects.values().try_for_each(VibrationEffect::validate)
            }
            CombinedVibration::Sequential { entries } => {
                if entries.is_empty() {
                    return Err(EffectError::Empty);
                }
                for entry in entries {
                    if matches!(entry.vibration, CombinedVibration::Sequential { .. }) {
                        return Err(EffectError::NestedSequential);
                    }
                    check_duration(entry.delay_ms)?;
                    entry.vibration.validate()?;
                }
                Ok(())
            }
        }
    }
}

/// Builder for [`CombinedVibration::Sequential`]
#[derive(Debug, Clone, Default)]
pub struct SequentialBuilder {
    entries: Vec<SequentialEntry>,
}

impl SequentialBuilder {
    pub fn add_next(mut self, vibration: CombinedVibration, delay_ms: u64) -> Self {
        self.entries.push(SequentialEntry { delay_ms, vibration });
        self
    }

    /// Shorthand for a single-actuator entry
    pub fn add_next_on(self, actuator_id: i32, effect: VibrationEffect, delay_ms: u64) -> Self {
        self.add_next(CombinedVibration::stereo([(actuator_id, effect)]), delay_ms)
    }

    pub fn combine(self) -> CombinedVibration {
        CombinedVibration::Sequential {
            entries: self.entries,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Malformed effect error
#[derive(Debug, Clone, PartialEq)]
pub enum EffectError {
    /// Effect or vibration has no content
    Empty,
    /// Waveform timings and amplitudes differ in length
    LengthMismatch { timings: usize, amplitudes: usize },
    /// Repeat index past the end of the segment list
    InvalidRepeatIndex { index: usize, len: usize },
    /// Amplitude outside 0.0-1.0
    AmplitudeOutOfRange(f32),
    /// Duration or delay above [`MAX_DURATION_MS`]
    DurationTooLong(u64),
    /// Negative or non-finite frequency
    FrequencyOutOfRange(f32),
    /// Primitive scale outside 0.0-1.0
    ScaleOutOfRange(f32),
    /// Repeating section never advances time
    ZeroDurationLoop,
    /// Repeating effect nested inside a composition
    NestedRepeat,
    /// Content added after an indefinitely repeating effect
    AddAfterRepeat,
    /// Sequential vibration nested inside a sequential vibration
    NestedSequential,
}

impl fmt::Display for EffectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectError::Empty => write!(f, "Effect has no segments"),
            EffectError::LengthMismatch { timings, amplitudes } => write!(
                f,
                "Waveform has {} timings but {} amplitudes",
                timings, amplitudes
            ),
            EffectError::InvalidRepeatIndex { index, len } => {
                write!(f, "Repeat index {} out of range for {} segments", index, len)
            }
            EffectError::AmplitudeOutOfRange(v) => write!(f, "Amplitude {} out of range", v),
            EffectError::DurationTooLong(ms) => {
                write!(f, "Duration {}ms exceeds {}ms", ms, MAX_DURATION_MS)
            }
            EffectError::FrequencyOutOfRange(v) => write!(f, "Frequency {} out of range", v),
            EffectError::ScaleOutOfRange(v) => write!(f, "Primitive scale {} out of range", v),
            EffectError::ZeroDurationLoop => write!(f, "Repeating section has zero duration"),
            EffectError::NestedRepeat => write!(f, "Repeating effects cannot be nested"),
            EffectError::AddAfterRepeat => {
                write!(f, "Nothing can follow an indefinitely repeating effect")
            }
            EffectError::NestedSequential => {
                write!(f, "Sequential vibrations cannot be nested")
            }
        }
    }
}

impl std::error::Error for EffectError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_normalizes_amplitudes() {
        let effect = VibrationEffect::waveform(&[5, 10], &[255, 0], None).unwrap();
        assert_eq!(effect.segments.len(), 2);
        match effect.segments[0] {
            Segment::Step(step) => assert_eq!(step.amplitude, Amplitude::Level(1.0)),
            other => panic!("unexpected segment {:?}", other),
        }
        assert!(matches!(effect.segments[1], Segment::Step(s) if s.amplitude.is_zero()));
        assert_eq!(effect.total_duration_ms(), Some(15));
    }

    #[test]
    fn test_waveform_length_mismatch() {
        let err = VibrationEffect::waveform(&[5, 10], &[1], None).unwrap_err();
        assert_eq!(err, EffectError::LengthMismatch { timings: 2, amplitudes: 1 });
    }

    #[test]
    fn test_on_off_waveform_starts_off() {
        let effect = VibrationEffect::waveform_on_off(&[10, 20, 30], None);
        assert!(matches!(effect.segments[0], Segment::Step(s) if s.amplitude.is_zero()));
        assert!(matches!(
            effect.segments[1],
            Segment::Step(s) if s.amplitude == Amplitude::Default
        ));
    }

    #[test]
    fn test_total_duration_unknown_for_prebaked_and_repeating() {
        assert_eq!(VibrationEffect::prebaked(effect_ids::CLICK).total_duration_ms(), None);
        let repeating = VibrationEffect::waveform(&[5], &[100], Some(0)).unwrap();
        assert_eq!(repeating.total_duration_ms(), None);
    }

    #[test]
    fn test_zero_duration_transition_emits_no_segment() {
        let effect = VibrationEffect::start_waveform()
            .add_transition(10, 1.0, 100.0)
            .add_transition(0, 0.2, 200.0)
            .add_sustain(30)
            .build()
            .unwrap();

        assert_eq!(effect.segments.len(), 2);
        assert_eq!(
            effect.segments[1],
            Segment::Ramp(RampSegment {
                start_amplitude: 0.2,
                end_amplitude: 0.2,
                start_frequency_hz: 200.0,
                end_frequency_hz: 200.0,
                duration_ms: 30,
            })
        );
    }

    #[test]
    fn test_waveform_builder_rejects_empty() {
        let err = VibrationEffect::start_waveform()
            .add_transition(0, 1.0, 0.0)
            .build()
            .unwrap_err();
        assert_eq!(err, EffectError::Empty);
    }

    #[test]
    fn test_composition_repeat_index() {
        let effect = VibrationEffect::start_composition()
            .add_primitive(primitive_ids::CLICK, 1.0, 0)
            .repeat_effect_indefinitely(VibrationEffect::one_shot(10, Amplitude::Default))
            .compose()
            .unwrap();
        assert_eq!(effect.repeat_index, Some(1));
        assert_eq!(effect.segments.len(), 2);
    }

    #[test]
    fn test_composition_rejects_content_after_repeat() {
        let err = VibrationEffect::start_composition()
            .repeat_effect_indefinitely(VibrationEffect::one_shot(10, Amplitude::Default))
            .add_primitive(primitive_ids::TICK, 0.5, 0)
            .compose()
            .unwrap_err();
        assert_eq!(err, EffectError::AddAfterRepeat);
    }

    #[test]
    fn test_validate_rejects_zero_duration_loop() {
        let effect = VibrationEffect::waveform(&[10, 0], &[100, 100], Some(1)).unwrap();
        assert_eq!(effect.validate(), Err(EffectError::ZeroDurationLoop));
    }

    #[test]
    fn test_validate_rejects_overlong_durations() {
        let half = u64::MAX / 2 + 1;
        let effect = VibrationEffect::waveform(&[half, half], &[100, 100], None).unwrap();
        assert_eq!(effect.validate(), Err(EffectError::DurationTooLong(half)));
        assert_eq!(effect.total_duration_ms(), Some(u64::MAX));

        let at_limit = VibrationEffect::one_shot(MAX_DURATION_MS, Amplitude::Default);
        assert_eq!(at_limit.validate(), Ok(()));

        let delayed = VibrationEffect::start_composition()
            .add_primitive(primitive_ids::CLICK, 1.0, MAX_DURATION_MS + 1)
            .compose();
        assert_eq!(delayed, Err(EffectError::DurationTooLong(MAX_DURATION_MS + 1)));

        let sequential = CombinedVibration::start_sequential()
            .add_next_on(1, VibrationEffect::one_shot(10, Amplitude::Default), MAX_DURATION_MS + 1)
            .combine();
        assert_eq!(sequential.validate(), Err(EffectError::DurationTooLong(MAX_DURATION_MS + 1)));
    }

    #[test]
    fn test_validate_rejects_out_of_range_scale() {
        let err = VibrationEffect::start_composition()
            .add_primitive(primitive_ids::CLICK, 1.5, 0)
            .compose()
            .unwrap_err();
        assert_eq!(err, EffectError::ScaleOutOfRange(1.5));
    }

    #[test]
    fn test_combined_has_actuator() {
        let stereo = CombinedVibration::stereo([(2, VibrationEffect::prebaked(effect_ids::TICK))]);
        assert!(stereo.has_actuator(2));
        assert!(!stereo.has_actuator(1));

        let sequential = CombinedVibration::start_sequential()
            .add_next_on(3, VibrationEffect::prebaked(effect_ids::CLICK), 50)
            .add_next(CombinedVibration::mono(VibrationEffect::prebaked(effect_ids::POP)), 0)
            .combine();
        assert!(sequential.has_actuator(3));
        assert!(sequential.has_actuator(7));
    }

    #[test]
    fn test_nested_sequential_is_invalid() {
        let inner = CombinedVibration::start_sequential()
            .add_next_on(1, VibrationEffect::prebaked(effect_ids::CLICK), 0)
            .combine();
        let outer = CombinedVibration::start_sequential().add_next(inner, 0).combine();
        assert_eq!(outer.validate(), Err(EffectError::NestedSequential));
    }

    #[test]
    fn test_combined_json_parsing() {
        let json = r#"{
            "type": "sequential",
            "entries": [
                { "delay_ms": 50, "vibration": { "type": "mono", "effect": { "segments": [
                    { "type": "prebaked", "effect_id": 0 }
                ] } } },
                { "vibration": { "type": "stereo", "effects": { "2": { "segments": [
                    { "type": "step", "amplitude": { "level": 0.5 }, "duration_ms": 10 },
                    { "type": "primitive", "primitive_id": 7 }
                ] } } } }
            ]
        }"#;
        let vibration: CombinedVibration = serde_json::from_str(json).unwrap();
        assert!(vibration.validate().is_ok());

        let entries = vibration.into_sequential();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].delay_ms, 50);
        assert_eq!(entries[1].delay_ms, 0);

        let effects = entries[1].vibration.effects_for([1, 2]);
        assert_eq!(effects.len(), 1);
        // Defaults fill in missing fields
        assert_eq!(
            effects[&2].segments[1],
            Segment::Primitive(PrimitiveSegment {
                primitive_id: primitive_ids::TICK,
                scale: 1.0,
                delay_ms: 0,
            })
        );
    }
}
