//! Units of work executed by the scheduler thread
//!
//! A vibration is played as a queue of timed steps. Each step performs at most
//! a few hardware calls and returns the steps that follow it. Sequential
//! entries are bracketed by a start step, which adapts and launches the
//! per-actuator tracks, and a finish step that runs once every other queued
//! step is done.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::actuator::SharedActuator;
use crate::adapter::{pwle_batch, primitive_batch, AdaptedEffect, EffectAdapter};
use crate::capability::{Capabilities, SyncCapabilities};
use crate::effect::{Segment, SequentialEntry};
use crate::hooks::VibratorManagerHooks;
use crate::vibration::Vibration;

/// Grace period for a completion callback after the expected off time
pub const CALLBACKS_EXTRA_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Minimum `on` duration for waveforms that never reach zero amplitude
pub const REPEATING_EFFECT_ON_DURATION_MS: u64 = 5_000;

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

// ============================================================================
// Step Context
// ============================================================================

/// Read-only state shared by every step of one vibration
pub(crate) struct StepContext {
    pub vibration: Vibration,
    /// Actuators addressed by the vibration, keyed by id
    pub actuators: BTreeMap<i32, SharedActuator>,
    pub hooks: Arc<dyn VibratorManagerHooks>,
    pub adapter: EffectAdapter,
    pub entries: Vec<SequentialEntry>,
}

// ============================================================================
// Steps
// ============================================================================

/// When a step becomes due
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum StepTime {
    At(Instant),
    /// Due once it reaches the head of the queue
    AfterAll,
}

impl StepTime {
    pub fn wait_time(&self, now: Instant) -> Duration {
        match self {
            StepTime::At(at) => at.saturating_duration_since(now),
            StepTime::AfterAll => Duration::ZERO,
        }
    }
}

pub(crate) enum Step {
    StartSequential(StartSequentialStep),
    FinishSequential(FinishSequentialStep),
    Vibrator(VibratorStep),
}

impl Step {
    pub fn start_sequential(index: usize, at: Instant) -> Self {
        Step::StartSequential(StartSequentialStep {
            index,
            at,
            on_duration: 0,
        })
    }

    pub fn time(&self) -> StepTime {
        match self {
            Step::StartSequential(step) => StepTime::At(step.at),
            Step::FinishSequential(_) => StepTime::AfterAll,
            Step::Vibrator(step) => StepTime::At(step.start),
        }
    }

    /// Cleanup steps do not keep the vibration in the running state
    pub fn is_cleanup(&self) -> bool {
        match self {
            Step::StartSequential(_) => false,
            Step::FinishSequential(_) => true,
            Step::Vibrator(step) => step.is_cleanup(),
        }
    }

    pub fn is_start_sequential(&self) -> bool {
        matches!(self, Step::StartSequential(_))
    }

    /// Milliseconds of output started by the last `play`
    pub fn on_duration(&self) -> u64 {
        match self {
            Step::StartSequential(step) => step.on_duration,
            Step::FinishSequential(_) => 0,
            Step::Vibrator(step) => step.on_result,
        }
    }

    pub fn play(&mut self, ctx: &StepContext) -> Vec<Step> {
        match self {
            Step::StartSequential(step) => step.play(ctx),
            Step::FinishSequential(step) => step.play(ctx),
            Step::Vibrator(step) => step.play(ctx),
        }
    }

    /// Whether this step should run now because `actuator_id` completed
    pub fn accept_callback(&mut self, actuator_id: i32) -> bool {
        match self {
            Step::Vibrator(step) => step.accept_callback(actuator_id),
            _ => false,
        }
    }

    /// Replacement steps after a graceful cancel
    pub fn cancel(self, ctx: &StepContext) -> Vec<Step> {
        match self {
            Step::StartSequential(_) => Vec::new(),
            Step::FinishSequential(_) => {
                ctx.hooks.note_vibrator_off(ctx.vibration.uid);
                Vec::new()
            }
            Step::Vibrator(step) => vec![Step::Vibrator(step.turn_off_at(Instant::now()))],
        }
    }

    pub fn cancel_immediately(self, ctx: &StepContext) {
        match self {
            Step::StartSequential(_) => {}
            Step::FinishSequential(_) => ctx.hooks.note_vibrator_off(ctx.vibration.uid),
            Step::Vibrator(step) => step.actuator.off(),
        }
    }
}

// ============================================================================
// Sequential Steps
// ============================================================================

pub(crate) struct StartSequentialStep {
    index: usize,
    at: Instant,
    on_duration: u64,
}

impl StartSequentialStep {
    fn play(&mut self, ctx: &StepContext) -> Vec<Step> {
        let entry = match ctx.entries.get(self.index) {
            Some(entry) => entry,
            None => return Vec::new(),
        };
        let vibration_id = ctx.vibration.id;
        let now = Instant::now();
        tracing::debug!(
            vibration_id,
            entry = self.index,
            latency_us = now.saturating_duration_since(self.at).as_micros() as u64,
            "Starting sequential entry"
        );

        let mut first_steps = Vec::new();
        for (actuator_id, effect) in entry.vibration.effects_for(ctx.actuators.keys().copied()) {
            let actuator = match ctx.actuators.get(&actuator_id) {
                Some(actuator) => actuator,
                None => continue,
            };
            match ctx.adapter.adapt(effect, actuator.info(), &ctx.vibration.fallbacks) {
                Ok(track) => first_steps.push(VibratorStep::new(
                    Arc::clone(actuator),
                    Arc::new(track),
                    0,
                    now,
                    now,
                )),
                Err(e) => tracing::warn!(vibration_id, actuator = actuator_id, "Skipping actuator: {}", e),
            }
        }

        let mut next_steps = Vec::new();
        let duration = start_vibrating(ctx, first_steps, &mut next_steps);
        self.on_duration = duration;

        if duration > 0 {
            ctx.hooks.note_vibrator_on(ctx.vibration.uid, duration);
            next_steps.push(Step::FinishSequential(FinishSequentialStep { index: self.index }));
        } else if let Some(next) = next_start(ctx, self.index) {
            // Nothing played, move straight to the next entry
            next_steps.push(next);
        }
        next_steps
    }
}

pub(crate) struct FinishSequentialStep {
    index: usize,
}

impl FinishSequentialStep {
    fn play(&mut self, ctx: &StepContext) -> Vec<Step> {
        tracing::debug!(vibration_id = ctx.vibration.id, entry = self.index, "Sequential entry finished");
        ctx.hooks.note_vibrator_off(ctx.vibration.uid);
        next_start(ctx, self.index).into_iter().collect()
    }
}

fn next_start(ctx: &StepContext, index: usize) -> Option<Step> {
    let next = index + 1;
    ctx.entries
        .get(next)
        .map(|entry| Step::start_sequential(next, Instant::now() + millis(entry.delay_ms)))
}

/// Play the first step of every track, synchronized when possible
///
/// Returns the longest expected duration of the entry, 0 when nothing played.
fn start_vibrating(ctx: &StepContext, mut steps: Vec<VibratorStep>, out: &mut Vec<Step>) -> u64 {
    match steps.len() {
        0 => return 0,
        1 => return play_first(ctx, &mut steps[0], out),
        _ => {}
    }

    let synced = steps
        .iter()
        .all(|step| step.actuator.info().has_capability(Capabilities::SYNCED_START));
    if !synced {
        return steps.iter_mut().fold(0, |max, step| max.max(play_first(ctx, step, out)));
    }

    let prepare = steps
        .iter()
        .fold(SyncCapabilities::empty(), |acc, step| acc | step.track.sync_prepare_capability());
    let required = SyncCapabilities::required_for(prepare);
    let actuator_ids: Vec<i32> = steps.iter().map(|step| step.actuator.id()).collect();
    let snapshot = steps.clone();

    let prepared = ctx.hooks.prepare_synced_vibration(required, &actuator_ids);
    let mut synced_steps = Vec::new();
    let max = steps
        .iter_mut()
        .fold(0, |max, step| max.max(play_first(ctx, step, &mut synced_steps)));

    if !prepared {
        tracing::debug!(vibration_id = ctx.vibration.id, ?required, "Synced start unavailable");
        out.extend(synced_steps);
        return max;
    }

    let triggered = max > 0 && ctx.hooks.trigger_synced_vibration(ctx.vibration.id);
    if triggered {
        out.extend(synced_steps);
        return max;
    }

    ctx.hooks.cancel_synced_vibration();
    if max == 0 {
        return 0;
    }

    tracing::warn!(
        vibration_id = ctx.vibration.id,
        actuators = ?actuator_ids,
        "Synced trigger failed, starting actuators independently"
    );
    snapshot
        .into_iter()
        .fold(0, |max, mut step| max.max(play_first(ctx, &mut step, out)))
}

fn play_first(ctx: &StepContext, step: &mut VibratorStep, out: &mut Vec<Step>) -> u64 {
    out.extend(step.play(ctx));
    step.on_result.max(step.track.total_duration_ms().unwrap_or(0))
}

// ============================================================================
// Vibrator Steps
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VibratorAction {
    /// Turn on if needed and set the amplitude of a step segment
    SetAmplitude,
    PerformPrebaked,
    ComposePrimitives,
    ComposePwle,
    /// End of the track, wait for the actuator to finish
    Complete,
    TurnOff,
}

impl VibratorAction {
    fn for_segment(track: &AdaptedEffect, index: usize) -> Self {
        match track.segments.get(index) {
            None => VibratorAction::Complete,
            Some(Segment::Step(_)) => VibratorAction::SetAmplitude,
            Some(Segment::Prebaked(_)) => VibratorAction::PerformPrebaked,
            Some(Segment::Primitive(_)) => VibratorAction::ComposePrimitives,
            Some(Segment::Ramp(_)) => VibratorAction::ComposePwle,
        }
    }
}

/// One segment (or batch) of a track on one actuator
#[derive(Clone)]
pub(crate) struct VibratorStep {
    actuator: SharedActuator,
    track: Arc<AdaptedEffect>,
    segment_index: usize,
    start: Instant,
    /// Expected off time of the output started by the previous step
    previous_off_timeout: Instant,
    action: VibratorAction,
    callback_received: bool,
    on_result: u64,
    next_off_time: Instant,
}

impl VibratorStep {
    pub fn new(
        actuator: SharedActuator,
        track: Arc<AdaptedEffect>,
        segment_index: usize,
        start: Instant,
        previous_off_timeout: Instant,
    ) -> Self {
        let action = VibratorAction::for_segment(&track, segment_index);
        Self {
            actuator,
            track,
            segment_index,
            start,
            previous_off_timeout,
            action,
            callback_received: false,
            on_result: 0,
            next_off_time: previous_off_timeout,
        }
    }

    #[cfg(test)]
    pub fn action(&self) -> VibratorAction {
        self.action
    }

    fn turn_off_at(&self, at: Instant) -> Self {
        Self {
            start: at,
            previous_off_timeout: at.max(self.previous_off_timeout),
            action: VibratorAction::TurnOff,
            callback_received: false,
            on_result: 0,
            ..self.clone()
        }
    }

    fn is_cleanup(&self) -> bool {
        match self.action {
            VibratorAction::TurnOff => true,
            VibratorAction::Complete => self.track.ramp_down_start.is_some(),
            // The first tail segment marks the end of the requested effect
            _ => self
                .track
                .ramp_down_start
                .map_or(false, |start| self.segment_index > start),
        }
    }

    fn accept_callback(&mut self, actuator_id: i32) -> bool {
        if self.actuator.id() != actuator_id {
            return false;
        }
        let now = Instant::now();
        self.callback_received = true;
        match self.action {
            VibratorAction::SetAmplitude => {
                // Only resume early if the actuator stopped while it should still be on
                self.next_off_time = now;
                now < self.start && self.actuator.current_amplitude() > 0.0
            }
            _ => self.previous_off_timeout > now,
        }
    }

    fn play(&mut self, ctx: &StepContext) -> Vec<Step> {
        tracing::trace!(
            vibration_id = ctx.vibration.id,
            actuator = self.actuator.id(),
            segment = self.segment_index,
            action = ?self.action,
            "Playing step"
        );
        match self.action {
            VibratorAction::SetAmplitude => self.play_set_amplitude(ctx),
            VibratorAction::PerformPrebaked => self.play_prebaked(ctx),
            VibratorAction::ComposePrimitives => self.play_primitives(ctx),
            VibratorAction::ComposePwle => self.play_pwle(ctx),
            VibratorAction::Complete => self.play_complete(),
            VibratorAction::TurnOff => {
                self.actuator.off();
                Vec::new()
            }
        }
    }

    fn play_set_amplitude(&mut self, ctx: &StepContext) -> Vec<Step> {
        let now = Instant::now();
        if self.callback_received && self.start > now {
            // Woken early by a premature completion: turn back on, retry at the planned time
            let remaining = self.start.duration_since(now).as_millis() as u64;
            self.next_off_time = self.turn_back_on(ctx, remaining);
            let retry = Self {
                previous_off_timeout: self.next_off_time,
                callback_received: false,
                on_result: 0,
                ..self.clone()
            };
            return vec![Step::Vibrator(retry)];
        }

        let segment = match self.track.segments.get(self.segment_index) {
            Some(Segment::Step(segment)) => *segment,
            other => {
                tracing::warn!(segment = ?other, "Ignoring wrong segment for amplitude step");
                return self.skip(1);
            }
        };
        if segment.duration_ms == 0 {
            return self.skip(1);
        }

        let amplitude = segment.amplitude.resolve(0.0);
        if amplitude == 0.0 {
            if self.previous_off_timeout > now {
                self.actuator.off();
                self.next_off_time = now;
            }
        } else {
            if self.start >= self.next_off_time {
                let on_duration = vibrator_on_duration(&self.track, self.segment_index);
                if on_duration > 0 {
                    self.on_result = self.actuator.on(on_duration, ctx.vibration.id);
                    self.next_off_time = now + millis(on_duration) + CALLBACKS_EXTRA_TIMEOUT;
                }
            }
            self.actuator.set_amplitude(amplitude);
        }

        // Planned start time keeps latency from drifting the waveform
        let next_start = self.start + millis(segment.duration_ms);
        self.next_steps(next_start, self.next_off_time, 1)
    }

    fn turn_back_on(&mut self, ctx: &StepContext, remaining_ms: u64) -> Instant {
        let on_duration = vibrator_on_duration(&self.track, self.segment_index);
        if on_duration == 0 {
            return self.previous_off_timeout;
        }
        let on_duration = on_duration.saturating_add(remaining_ms);
        let expected_amplitude = self.actuator.current_amplitude();
        self.on_result = self.actuator.on(on_duration, ctx.vibration.id);
        if self.on_result > 0 {
            self.actuator.set_amplitude(expected_amplitude);
        }
        Instant::now() + millis(on_duration) + CALLBACKS_EXTRA_TIMEOUT
    }

    fn play_prebaked(&mut self, ctx: &StepContext) -> Vec<Step> {
        let prebaked = match self.track.segments.get(self.segment_index) {
            Some(Segment::Prebaked(prebaked)) => *prebaked,
            _ => return self.skip(1),
        };
        let on = self.actuator.perform(&prebaked, ctx.vibration.id);
        self.after_call(on, 1)
    }

    fn play_primitives(&mut self, ctx: &StepContext) -> Vec<Step> {
        let limit = self.actuator.info().composition_size_max;
        let batch = primitive_batch(&self.track, self.segment_index, limit);
        if batch.is_empty() {
            return self.skip(1);
        }
        let on = self.actuator.compose(&batch, ctx.vibration.id);
        self.after_call(on, batch.len())
    }

    fn play_pwle(&mut self, ctx: &StepContext) -> Vec<Step> {
        let info = self.actuator.info();
        let batch = pwle_batch(
            &self.track,
            self.segment_index,
            info.pwle_size_max,
            ctx.adapter.split_lookahead_fill(),
        );
        if batch.is_empty() {
            return self.skip(1);
        }
        let braking = info.default_braking();
        let on = self.actuator.compose_pwle(&batch, braking, ctx.vibration.id);
        self.after_call(on, batch.len())
    }

    fn play_complete(&mut self) -> Vec<Step> {
        if self.callback_received {
            self.actuator.off();
            return Vec::new();
        }
        // Wait for the completion callback, or give up at the off timeout
        vec![Step::Vibrator(self.turn_off_at(self.previous_off_timeout))]
    }

    /// Schedule the follow-up once the actuator reports the on-duration
    fn after_call(&mut self, on: u64, played: usize) -> Vec<Step> {
        let now = Instant::now();
        self.on_result = on;
        if on > 0 {
            self.next_off_time = now + millis(on) + CALLBACKS_EXTRA_TIMEOUT;
        }
        self.next_steps(now + millis(on), self.next_off_time, played)
    }

    fn skip(&self, count: usize) -> Vec<Step> {
        self.next_steps(self.start, self.previous_off_timeout, count)
    }

    fn next_steps(&self, start: Instant, off_timeout: Instant, played: usize) -> Vec<Step> {
        let index = self.track.advance(self.segment_index, played);
        vec![Step::Vibrator(VibratorStep::new(
            Arc::clone(&self.actuator),
            Arc::clone(&self.track),
            index,
            start,
            off_timeout,
        ))]
    }
}

/// Milliseconds the actuator stays on from `start_index`: consecutive non-zero
/// steps, wrapping once into the repeating section
pub(crate) fn vibrator_on_duration(track: &AdaptedEffect, start_index: usize) -> u64 {
    let segments = &track.segments;
    let mut repeat_index = track.repeat_index;
    let mut index = start_index;
    let mut timing: u64 = 0;
    while index < segments.len() {
        match &segments[index] {
            Segment::Step(step) if !step.amplitude.is_zero() => {
                timing = timing.saturating_add(step.duration_ms)
            }
            _ => break,
        }
        index += 1;
        if index == segments.len() {
            if let Some(repeat) = repeat_index.take() {
                index = repeat;
            }
        }
        if index == start_index {
            return timing.max(REPEATING_EFFECT_ON_DURATION_MS);
        }
    }
    timing
}

// ============================================================================
// Step Queue
// ============================================================================

/// Steps ordered by due time, first-in first-out on ties
#[derive(Default)]
pub(crate) struct StepQueue {
    steps: VecDeque<Step>,
}

impl StepQueue {
    pub fn push(&mut self, step: Step) {
        let time = step.time();
        let position = self.steps.partition_point(|queued| queued.time() <= time);
        self.steps.insert(position, step);
    }

    pub fn extend<I: IntoIterator<Item = Step>>(&mut self, steps: I) {
        for step in steps {
            self.push(step);
        }
    }

    pub fn pop(&mut self) -> Option<Step> {
        self.steps.pop_front()
    }

    pub fn peek(&self) -> Option<&Step> {
        self.steps.front()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Remove the first step matching `predicate`
    ///
    /// The predicate may update every step it visits.
    pub fn take_first<F>(&mut self, mut predicate: F) -> Option<Step>
    where
        F: FnMut(&mut Step) -> bool,
    {
        let position = self.steps.iter_mut().position(|step| predicate(step))?;
        self.steps.remove(position)
    }
}

// ============================================================================
// Tests
// ============================================================================
