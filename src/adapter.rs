//! Effect adapter
//!
//! Rewrites a user effect into the segment list one actuator can actually
//! play: amplitudes resolved and clipped, ramps quantized when PWLE is not
//! available, unsupported prebaked effects replaced by request fallbacks,
//! unsupported primitives dropped, and a ramp-down tail appended after
//! waveforms that would otherwise stop abruptly.
//!
//! It also decides how an adapted list is cut into hardware batches
//! ([`primitive_batch`], [`pwle_batch`]).

use std::collections::BTreeMap;
use std::fmt;

use crate::capability::{ActuatorInfo, Capabilities, SyncCapabilities};
use crate::config::VibrationConfig;
use crate::effect::{
    Amplitude, PrimitiveSegment, RampSegment, Segment, StepSegment, VibrationEffect,
};

// ============================================================================
// Adapted Effect
// ============================================================================

/// Segment list resolved for one actuator
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptedEffect {
    pub actuator_id: i32,
    /// Resolved segments; step amplitudes are always [`Amplitude::Level`]
    pub segments: Vec<Segment>,
    pub repeat_index: Option<usize>,
    /// Index of the first synthetic ramp-down segment
    pub ramp_down_start: Option<usize>,
}

impl AdaptedEffect {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_repeating(&self) -> bool {
        self.repeat_index.is_some()
    }

    /// Sum of segment durations including the tail, `None` if unknown or repeating
    pub fn total_duration_ms(&self) -> Option<u64> {
        if self.is_repeating() {
            return None;
        }
        self.segments.iter().try_fold(0u64, |total, segment| {
            segment.duration_ms().map(|duration| total.saturating_add(duration))
        })
    }

    /// Segments from `start` onwards, looping back to the repeat index at the end
    pub fn unroll(&self, start: usize) -> Unroll<'_> {
        Unroll { effect: self, index: start }
    }

    /// Index reached after playing `count` segments from `start`
    ///
    /// Returns a value `>= len()` when a non-repeating effect is exhausted.
    pub fn advance(&self, start: usize, count: usize) -> usize {
        let next = start + count;
        let len = self.segments.len();
        match self.repeat_index {
            Some(repeat) if next >= len => {
                let loop_len = len - repeat;
                repeat + (next - len) % loop_len
            }
            _ => next,
        }
    }

    /// Prepare flag needed to start this effect in a synced group
    pub fn sync_prepare_capability(&self) -> SyncCapabilities {
        match self.segments.first() {
            Some(Segment::Step(_)) => SyncCapabilities::PREPARE_ON,
            Some(Segment::Prebaked(_)) => SyncCapabilities::PREPARE_PERFORM,
            Some(Segment::Primitive(_)) | Some(Segment::Ramp(_)) => {
                SyncCapabilities::PREPARE_COMPOSE
            }
            None => SyncCapabilities::empty(),
        }
    }

    fn batch_limit(&self, limit: usize) -> usize {
        if limit == 0 {
            self.segments.len()
        } else {
            limit
        }
    }
}

/// Iterator returned by [`AdaptedEffect::unroll`]
pub struct Unroll<'a> {
    effect: &'a AdaptedEffect,
    index: usize,
}

impl<'a> Iterator for Unroll<'a> {
    type Item = &'a Segment;

    fn next(&mut self) -> Option<&'a Segment> {
        if self.index >= self.effect.segments.len() {
            self.index = self.effect.repeat_index?;
        }
        let segment = self.effect.segments.get(self.index)?;
        self.index += 1;
        Some(segment)
    }
}

// ============================================================================
// Batching
// ============================================================================

/// Consecutive primitives starting at `start`, at most `limit` (0 = unlimited)
pub fn primitive_batch(effect: &AdaptedEffect, start: usize, limit: usize) -> Vec<PrimitiveSegment> {
    let limit = effect.batch_limit(limit);
    effect
        .unroll(start)
        .map_while(|segment| match segment {
            Segment::Primitive(primitive) => Some(*primitive),
            _ => None,
        })
        .take(limit)
        .collect()
}

/// Consecutive ramps starting at `start`, cut at the best boundary when they
/// do not fit in `limit` (0 = unlimited)
pub fn pwle_batch(
    effect: &AdaptedEffect,
    start: usize,
    limit: usize,
    lookahead_fill: f32,
) -> Vec<RampSegment> {
    let limit = effect.batch_limit(limit);
    let mut ramps: Vec<RampSegment> = effect
        .unroll(start)
        .map_while(|segment| match segment {
            Segment::Ramp(ramp) => Some(*ramp),
            _ => None,
        })
        .take(limit + 1)
        .collect();
    if ramps.len() > limit {
        let cut = best_split_point(&ramps[..limit], lookahead_fill);
        ramps.truncate(cut);
    }
    ramps
}

/// Number of ramps to keep from a full batch
///
/// A boundary with zero end amplitude always qualifies. Other boundaries
/// qualify only inside the lookahead window, the last `1 - fill` share of the
/// batch. The lowest end amplitude wins, ties go to the later boundary, and
/// with no candidate the batch is cut at its hard maximum.
pub fn best_split_point(ramps: &[RampSegment], lookahead_fill: f32) -> usize {
    let limit = ramps.len();
    let fill = lookahead_fill.clamp(0.0, 1.0);
    let window_start = ((limit as f32 * fill).ceil() as usize).clamp(1, limit.max(1));
    let mut best: Option<(usize, f32)> = None;
    for (i, ramp) in ramps.iter().enumerate() {
        let position = i + 1;
        let amplitude = ramp.end_amplitude;
        if amplitude != 0.0 && position < window_start {
            continue;
        }
        match best {
            Some((_, best_amplitude)) if amplitude > best_amplitude => {}
            _ => best = Some((position, amplitude)),
        }
    }
    best.map_or(limit, |(position, _)| position)
}

// ============================================================================
// Effect Adapter
// ============================================================================

/// Device-level settings applied while adapting effects
#[derive(Debug, Clone, PartialEq)]
pub struct EffectAdapter {
    ramp_step_duration_ms: u64,
    ramp_down_duration_ms: u64,
    default_amplitude: f32,
    split_lookahead_fill: f32,
}

impl Default for EffectAdapter {
    fn default() -> Self {
        Self::new(&VibrationConfig::default())
    }
}

#[derive(Default)]
struct PrimitiveTally {
    requested: usize,
    kept: usize,
}

impl EffectAdapter {
    pub fn new(config: &VibrationConfig) -> Self {
        Self {
            ramp_step_duration_ms: config.ramp_step_duration_ms.max(1),
            ramp_down_duration_ms: config.ramp_down_duration_ms,
            default_amplitude: config.default_amplitude,
            split_lookahead_fill: config.split_lookahead_fill,
        }
    }

    pub fn ramp_down_duration_ms(&self) -> u64 {
        self.ramp_down_duration_ms
    }

    pub fn split_lookahead_fill(&self) -> f32 {
        self.split_lookahead_fill
    }

    /// Resolve `effect` for the actuator described by `info`
    ///
    /// `fallbacks` maps prebaked effect ids to replacements used when the
    /// actuator cannot play the prebaked effect itself.
    pub fn adapt(
        &self,
        effect: &VibrationEffect,
        info: &ActuatorInfo,
        fallbacks: &BTreeMap<i32, VibrationEffect>,
    ) -> Result<AdaptedEffect, AdaptError> {
        let mut segments = Vec::with_capacity(effect.segments.len());
        let mut repeat_index = None;
        let mut tally = PrimitiveTally::default();

        for (i, segment) in effect.segments.iter().enumerate() {
            if effect.repeat_index == Some(i) {
                repeat_index = Some(segments.len());
            }
            self.adapt_segment(segment, info, Some(fallbacks), &mut segments, &mut tally);
        }

        if tally.requested > 0 && tally.kept == 0 {
            return Err(AdaptError::UnsupportedPrimitives { actuator_id: info.id });
        }
        if segments.is_empty() {
            return Err(AdaptError::NoSupportedSegments { actuator_id: info.id });
        }
        if repeat_index.map_or(false, |index| index >= segments.len()) {
            tracing::warn!(
                actuator = info.id,
                "Repeating section unsupported, playing effect once"
            );
            repeat_index = None;
        }

        let mut adapted = AdaptedEffect {
            actuator_id: info.id,
            segments,
            repeat_index,
            ramp_down_start: None,
        };
        self.append_ramp_down(&mut adapted, info);

        tracing::debug!(
            actuator = info.id,
            segments = adapted.segments.len(),
            repeat_index = ?adapted.repeat_index,
            ramp_down_start = ?adapted.ramp_down_start,
            "Effect adapted"
        );
        Ok(adapted)
    }

    fn adapt_segment(
        &self,
        segment: &Segment,
        info: &ActuatorInfo,
        fallbacks: Option<&BTreeMap<i32, VibrationEffect>>,
        out: &mut Vec<Segment>,
        tally: &mut PrimitiveTally,
    ) {
        match segment {
            Segment::Step(step) => out.push(Segment::Step(self.adapt_step(step, info))),
            Segment::Ramp(ramp) => {
                if info.has_capability(Capabilities::COMPOSE_PWLE_EFFECTS) {
                    out.push(Segment::Ramp(clip_ramp(ramp, info)));
                } else {
                    for step in self.ramp_to_steps(ramp) {
                        out.push(Segment::Step(self.adapt_step(&step, info)));
                    }
                }
            }
            Segment::Prebaked(prebaked) => {
                if info.is_effect_supported(prebaked.effect_id) {
                    out.push(*segment);
                    return;
                }
                // Fallbacks are resolved one level deep
                let fallback = fallbacks
                    .filter(|_| prebaked.fallback)
                    .and_then(|map| map.get(&prebaked.effect_id));
                match fallback {
                    Some(fallback) => {
                        tracing::debug!(
                            actuator = info.id,
                            effect_id = prebaked.effect_id,
                            "Prebaked effect unsupported, using fallback"
                        );
                        for inner in &fallback.segments {
                            self.adapt_segment(inner, info, None, out, tally);
                        }
                    }
                    None => tracing::debug!(
                        actuator = info.id,
                        effect_id = prebaked.effect_id,
                        "Dropping unsupported prebaked effect"
                    ),
                }
            }
            Segment::Primitive(primitive) => {
                tally.requested += 1;
                if info.is_primitive_supported(primitive.primitive_id) {
                    tally.kept += 1;
                    out.push(*segment);
                } else {
                    tracing::debug!(
                        actuator = info.id,
                        primitive_id = primitive.primitive_id,
                        "Dropping unsupported primitive"
                    );
                }
            }
        }
    }

    fn adapt_step(&self, step: &StepSegment, info: &ActuatorInfo) -> StepSegment {
        let requested = step.amplitude.resolve(self.default_amplitude).clamp(0.0, 1.0);
        let amplitude = if info.has_capability(Capabilities::AMPLITUDE_CONTROL) || requested == 0.0 {
            requested
        } else {
            if requested != self.default_amplitude {
                tracing::debug!(
                    actuator = info.id,
                    requested,
                    "No amplitude control, using default amplitude"
                );
            }
            self.default_amplitude
        };
        let frequency_hz = if info.has_capability(Capabilities::FREQUENCY_CONTROL) {
            step.frequency_hz
        } else {
            0.0
        };
        StepSegment {
            amplitude: Amplitude::Level(amplitude),
            frequency_hz,
            duration_ms: step.duration_ms,
        }
    }

    /// Quantize a ramp into fixed-duration steps
    fn ramp_to_steps(&self, ramp: &RampSegment) -> Vec<StepSegment> {
        let step_ms = self.ramp_step_duration_ms;
        if ramp.duration_ms <= step_ms {
            return vec![StepSegment {
                amplitude: Amplitude::Level(ramp.end_amplitude),
                frequency_hz: ramp.end_frequency_hz,
                duration_ms: ramp.duration_ms,
            }];
        }
        let count = (ramp.duration_ms + step_ms - 1) / step_ms;
        let mut steps = Vec::with_capacity(count as usize);
        for i in 0..count - 1 {
            let position = i as f32 / count as f32;
            steps.push(StepSegment {
                amplitude: Amplitude::Level(lerp(ramp.start_amplitude, ramp.end_amplitude, position)),
                frequency_hz: lerp(ramp.start_frequency_hz, ramp.end_frequency_hz, position),
                duration_ms: step_ms,
            });
        }
        steps.push(StepSegment {
            amplitude: Amplitude::Level(ramp.end_amplitude),
            frequency_hz: ramp.end_frequency_hz,
            duration_ms: ramp.duration_ms - step_ms * (count - 1),
        });
        steps
    }

    fn append_ramp_down(&self, effect: &mut AdaptedEffect, info: &ActuatorInfo) {
        if self.ramp_down_duration_ms == 0
            || effect.is_repeating()
            || !info.has_capability(Capabilities::AMPLITUDE_CONTROL)
        {
            return;
        }
        let last = match effect.segments.last() {
            Some(Segment::Step(step)) if step.duration_ms > 0 => *step,
            _ => return,
        };
        let level = last.amplitude.resolve(self.default_amplitude);
        if level <= 0.0 {
            return;
        }

        let step_ms = self.ramp_step_duration_ms;
        let count = (self.ramp_down_duration_ms / step_ms).max(1);
        effect.ramp_down_start = Some(effect.segments.len());
        for i in 0..count {
            let duration_ms = if i + 1 == count {
                self.ramp_down_duration_ms - step_ms * (count - 1)
            } else {
                step_ms
            };
            // Strictly decreasing and never reaching zero
            let amplitude = level * (count - i) as f32 / (count + 1) as f32;
            effect.segments.push(Segment::Step(StepSegment {
                amplitude: Amplitude::Level(amplitude),
                frequency_hz: last.frequency_hz,
                duration_ms,
            }));
        }
    }
}

fn clip_ramp(ramp: &RampSegment, info: &ActuatorInfo) -> RampSegment {
    let start_frequency_hz = info.resolve_frequency(ramp.start_frequency_hz);
    let end_frequency_hz = info.resolve_frequency(ramp.end_frequency_hz);
    RampSegment {
        start_amplitude: ramp.start_amplitude.min(info.max_amplitude(start_frequency_hz)),
        end_amplitude: ramp.end_amplitude.min(info.max_amplitude(end_frequency_hz)),
        start_frequency_hz,
        end_frequency_hz,
        duration_ms: ramp.duration_ms,
    }
}

fn lerp(start: f32, end: f32, position: f32) -> f32 {
    start + (end - start) * position
}

// ============================================================================
// Error Types
// ============================================================================

/// Effect cannot be played on an actuator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdaptError {
    /// The effect composes primitives and none of them is supported
    UnsupportedPrimitives { actuator_id: i32 },
    /// Nothing in the effect can be played
    NoSupportedSegments { actuator_id: i32 },
}

impl fmt::Display for AdaptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdaptError::UnsupportedPrimitives { actuator_id } => write!(
                f,
                "Actuator {} supports none of the requested primitives",
                actuator_id
            ),
            AdaptError::NoSupportedSegments { actuator_id } => {
                write!(f, "Actuator {} cannot play any segment of the effect", actuator_id)
            }
        }
    }
}

impl std::error::Error for AdaptError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::FrequencyProfile;
    use crate::effect::{effect_ids, primitive_ids};

    fn adapter(ramp_down_duration_ms: u64) -> EffectAdapter {
        EffectAdapter::new(&VibrationConfig {
            ramp_down_duration_ms,
            ..VibrationConfig::default()
        })
    }

    fn no_fallbacks() -> BTreeMap<i32, VibrationEffect> {
        BTreeMap::new()
    }

    fn pwle_info(max_amplitudes: Vec<f32>) -> ActuatorInfo {
        ActuatorInfo::new(1)
            .with_capabilities(Capabilities::COMPOSE_PWLE_EFFECTS)
            .with_frequency_profile(FrequencyProfile {
                min_frequency_hz: 100.0,
                resonant_frequency_hz: 150.0,
                frequency_resolution_hz: 50.0,
                max_amplitudes,
            })
    }

    fn step_levels(effect: &AdaptedEffect) -> Vec<f32> {
        effect
            .segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Step(step) => Some(step.amplitude.resolve(-1.0)),
                _ => None,
            })
            .collect()
    }

    fn ramp(end_amplitude: f32) -> Segment {
        Segment::Ramp(RampSegment {
            start_amplitude: end_amplitude,
            end_amplitude,
            start_frequency_hz: 150.0,
            end_frequency_hz: 150.0,
            duration_ms: 10,
        })
    }

    fn adapted(segments: Vec<Segment>, repeat_index: Option<usize>) -> AdaptedEffect {
        AdaptedEffect {
            actuator_id: 1,
            segments,
            repeat_index,
            ramp_down_start: None,
        }
    }

    #[test]
    fn test_amplitude_kept_with_amplitude_control() {
        let info = ActuatorInfo::new(1).with_capabilities(Capabilities::AMPLITUDE_CONTROL);
        let effect = VibrationEffect::waveform(&[5, 5], &[100, 0], None).unwrap();
        let adapted = adapter(0).adapt(&effect, &info, &no_fallbacks()).unwrap();
        assert_eq!(step_levels(&adapted), vec![100.0 / 255.0, 0.0]);
    }

    #[test]
    fn test_amplitude_dropped_without_amplitude_control() {
        let info = ActuatorInfo::new(1);
        let effect = VibrationEffect::waveform(&[5, 5, 5], &[100, 0, 200], None).unwrap();
        let adapted = adapter(0).adapt(&effect, &info, &no_fallbacks()).unwrap();
        assert_eq!(step_levels(&adapted), vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_ramp_quantized_without_pwle() {
        let info = ActuatorInfo::new(1).with_capabilities(Capabilities::AMPLITUDE_CONTROL);
        let effect = VibrationEffect::start_waveform()
            .add_amplitude_transition(20, 1.0)
            .build()
            .unwrap();
        let adapted = adapter(0).adapt(&effect, &info, &no_fallbacks()).unwrap();

        assert_eq!(adapted.segments.len(), 4);
        assert_eq!(step_levels(&adapted), vec![0.0, 0.25, 0.5, 1.0]);
        assert_eq!(adapted.total_duration_ms(), Some(20));
    }

    #[test]
    fn test_short_ramp_becomes_single_step() {
        let info = ActuatorInfo::new(1).with_capabilities(Capabilities::AMPLITUDE_CONTROL);
        let effect = VibrationEffect::start_waveform()
            .add_amplitude_transition(3, 0.6)
            .build()
            .unwrap();
        let adapted = adapter(0).adapt(&effect, &info, &no_fallbacks()).unwrap();
        assert_eq!(step_levels(&adapted), vec![0.6]);
        assert_eq!(adapted.total_duration_ms(), Some(3));
    }

    #[test]
    fn test_ramp_clipped_to_frequency_profile() {
        let info = pwle_info(vec![0.5, 1.0, 0.6]);
        let effect = VibrationEffect::start_waveform()
            .add_transition(10, 1.0, 100.0)
            .add_frequency_transition(20, 120.0)
            .build()
            .unwrap();
        let adapted = adapter(0).adapt(&effect, &info, &no_fallbacks()).unwrap();

        let ramps: Vec<RampSegment> = adapted
            .segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Ramp(ramp) => Some(*ramp),
                _ => None,
            })
            .collect();
        assert_eq!(ramps.len(), 2);
        assert_eq!(ramps[0].start_frequency_hz, 150.0);
        assert_eq!(ramps[0].end_frequency_hz, 100.0);
        assert!((ramps[0].end_amplitude - 0.5).abs() < 1e-6);
        assert!((ramps[1].start_amplitude - 0.5).abs() < 1e-6);
        assert!((ramps[1].end_amplitude - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_prebaked_fallback_substituted() {
        let info = ActuatorInfo::new(1).with_capabilities(Capabilities::AMPLITUDE_CONTROL);
        let mut fallbacks = BTreeMap::new();
        fallbacks.insert(
            effect_ids::CLICK,
            VibrationEffect::one_shot(10, Amplitude::from_raw(100)),
        );
        let effect = VibrationEffect::prebaked(effect_ids::CLICK);
        let adapted = adapter(0).adapt(&effect, &info, &fallbacks).unwrap();
        assert_eq!(step_levels(&adapted), vec![100.0 / 255.0]);

        // Fallback disabled on the segment itself
        let strict = VibrationEffect::prebaked_with(
            effect_ids::CLICK,
            crate::effect::EffectStrength::Strong,
            false,
        );
        assert_eq!(
            adapter(0).adapt(&strict, &info, &fallbacks),
            Err(AdaptError::NoSupportedSegments { actuator_id: 1 })
        );
    }

    #[test]
    fn test_supported_prebaked_kept() {
        let info = ActuatorInfo::new(1).with_effects(&[effect_ids::CLICK]);
        let effect = VibrationEffect::prebaked(effect_ids::CLICK);
        let adapted = adapter(0).adapt(&effect, &info, &no_fallbacks()).unwrap();
        assert_eq!(adapted.segments, effect.segments);
    }

    #[test]
    fn test_unsupported_primitives_fail() {
        let info = ActuatorInfo::new(1).with_capabilities(Capabilities::AMPLITUDE_CONTROL);
        let effect = VibrationEffect::start_composition()
            .add_effect(VibrationEffect::one_shot(10, Amplitude::Default))
            .add_primitive(primitive_ids::CLICK, 1.0, 0)
            .compose()
            .unwrap();
        assert_eq!(
            adapter(0).adapt(&effect, &info, &no_fallbacks()),
            Err(AdaptError::UnsupportedPrimitives { actuator_id: 1 })
        );
    }

    #[test]
    fn test_partially_supported_primitives_dropped() {
        let info = ActuatorInfo::new(1)
            .with_capabilities(Capabilities::COMPOSE_EFFECTS)
            .with_primitives(&[primitive_ids::CLICK]);
        let effect = VibrationEffect::start_composition()
            .add_primitive(primitive_ids::CLICK, 1.0, 0)
            .add_primitive(primitive_ids::SPIN, 0.5, 0)
            .add_primitive(primitive_ids::CLICK, 0.2, 10)
            .compose()
            .unwrap();
        let adapted = adapter(0).adapt(&effect, &info, &no_fallbacks()).unwrap();
        assert_eq!(adapted.segments.len(), 2);
    }

    #[test]
    fn test_repeat_index_remapped_after_expansion() {
        let info = ActuatorInfo::new(1).with_capabilities(Capabilities::AMPLITUDE_CONTROL);
        let ramp_effect = VibrationEffect::start_waveform()
            .add_amplitude_transition(10, 1.0)
            .build()
            .unwrap();
        let effect = VibrationEffect::start_composition()
            .add_effect(ramp_effect)
            .repeat_effect_indefinitely(VibrationEffect::one_shot(10, Amplitude::Default))
            .compose()
            .unwrap();
        let adapted = adapter(0).adapt(&effect, &info, &no_fallbacks()).unwrap();
        // 10ms ramp becomes two 5ms steps
        assert_eq!(adapted.repeat_index, Some(2));
        assert_eq!(adapted.len(), 3);
    }

    #[test]
    fn test_ramp_down_tail_appended() {
        let info = ActuatorInfo::new(1).with_capabilities(Capabilities::AMPLITUDE_CONTROL);
        let effect = VibrationEffect::waveform(&[5, 5, 5], &[60, 120, 240], None).unwrap();
        let adapted = adapter(15).adapt(&effect, &info, &no_fallbacks()).unwrap();

        assert_eq!(adapted.ramp_down_start, Some(3));
        assert_eq!(adapted.total_duration_ms(), Some(30));
        let levels = step_levels(&adapted);
        assert_eq!(levels.len(), 6);
        for pair in levels[2..].windows(2) {
            assert!(pair[1] < pair[0]);
        }
        assert!(levels[5] > 0.0);
    }

    #[test]
    fn test_ramp_down_tail_skipped() {
        let adapter = adapter(15);
        let amplitude = ActuatorInfo::new(1)
            .with_capabilities(Capabilities::AMPLITUDE_CONTROL)
            .with_effects(&[effect_ids::CLICK]);

        let repeating = VibrationEffect::waveform(&[5], &[100], Some(0)).unwrap();
        let ends_at_zero = VibrationEffect::waveform(&[5, 5], &[100, 0], None).unwrap();
        let prebaked = VibrationEffect::prebaked(effect_ids::CLICK);
        for effect in [repeating, ends_at_zero, prebaked] {
            let adapted = adapter.adapt(&effect, &amplitude, &no_fallbacks()).unwrap();
            assert_eq!(adapted.ramp_down_start, None);
        }

        // No amplitude control, no tail
        let one_shot = VibrationEffect::one_shot(10, Amplitude::Default);
        let adapted = adapter
            .adapt(&one_shot, &ActuatorInfo::new(2), &no_fallbacks())
            .unwrap();
        assert_eq!(adapted.ramp_down_start, None);
    }

    #[test]
    fn test_pwle_split_prefers_low_amplitude_boundaries() {
        let effect = adapted(
            vec![ramp(1.0), ramp(0.0), ramp(0.5), ramp(0.6), ramp(0.7), ramp(0.6)],
            None,
        );
        let mut sizes = Vec::new();
        let mut index = 0;
        while index < effect.len() {
            let batch = pwle_batch(&effect, index, 3, 0.5);
            sizes.push(batch.len());
            index = effect.advance(index, batch.len());
        }
        assert_eq!(sizes, vec![2, 2, 2]);
    }

    #[test]
    fn test_pwle_split_without_lookahead_uses_hard_max() {
        let effect = adapted(
            vec![ramp(1.0), ramp(0.9), ramp(0.5), ramp(0.6), ramp(0.7)],
            None,
        );
        assert_eq!(pwle_batch(&effect, 0, 3, 1.0).len(), 3);
        // Window covers the whole batch, lowest boundary wins
        assert_eq!(pwle_batch(&effect, 0, 4, 0.0).len(), 3);
    }

    #[test]
    fn test_repeating_pwle_unrolled_to_max() {
        let effect = adapted(vec![ramp(1.0)], Some(0));
        let batch = pwle_batch(&effect, 0, 10, 0.5);
        assert_eq!(batch.len(), 10);
        assert_eq!(effect.advance(0, batch.len()), 0);
    }

    #[test]
    fn test_primitive_batches() {
        let primitive = |id| {
            Segment::Primitive(PrimitiveSegment {
                primitive_id: id,
                scale: 1.0,
                delay_ms: 0,
            })
        };
        let effect = adapted(
            vec![
                primitive(primitive_ids::CLICK),
                primitive(primitive_ids::TICK),
                primitive(primitive_ids::SPIN),
                Segment::Step(StepSegment {
                    amplitude: Amplitude::Level(1.0),
                    frequency_hz: 0.0,
                    duration_ms: 10,
                }),
            ],
            None,
        );
        let first = primitive_batch(&effect, 0, 2);
        assert_eq!(first.len(), 2);
        let second = primitive_batch(&effect, effect.advance(0, 2), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].primitive_id, primitive_ids::SPIN);
        // Unlimited batch stops at the first non-primitive
        assert_eq!(primitive_batch(&effect, 0, 0).len(), 3);
    }

    #[test]
    fn test_sync_prepare_capability() {
        let pwle = adapted(vec![ramp(1.0)], None);
        assert_eq!(pwle.sync_prepare_capability(), SyncCapabilities::PREPARE_COMPOSE);
        let prebaked = adapted(vec![Segment::Prebaked(crate::effect::PrebakedSegment {
            effect_id: effect_ids::CLICK,
            strength: crate::effect::EffectStrength::Medium,
            fallback: false,
        })], None);
        assert_eq!(prebaked.sync_prepare_capability(), SyncCapabilities::PREPARE_PERFORM);
    }
}
