//! Step conductor
//!
//! Drives one vibration on the scheduler thread. Other threads only talk to it
//! through a [`ConductorHandle`], which records cancel and completion signals
//! under a small mutex and wakes the worker. Everything else, including every
//! hardware call, happens on the worker.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::actuator::SharedActuator;
use crate::adapter::EffectAdapter;
use crate::hooks::VibratorManagerHooks;
use crate::step::{Step, StepContext, StepQueue};
use crate::token::{DeathRecipient, LinkId, TokenError};
use crate::vibration::{Vibration, VibrationStatus};

// ============================================================================
// Signals
// ============================================================================

#[derive(Debug, Default)]
struct Signals {
    cancel: Option<VibrationStatus>,
    cancel_immediate: bool,
    /// Actuators that reported completion, in arrival order
    completed: Vec<i32>,
}

#[derive(Debug, Default)]
struct SignalState {
    signals: Mutex<Signals>,
    wake: Condvar,
}

impl SignalState {
    fn lock(&self) -> MutexGuard<'_, Signals> {
        self.signals.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cross-thread entry points of a running conductor
///
/// Every method only records a signal and wakes the worker; none of them
/// touches hardware or blocks on it.
#[derive(Debug, Clone)]
pub struct ConductorHandle {
    vibration_id: u64,
    actuator_ids: Arc<[i32]>,
    state: Arc<SignalState>,
}

impl ConductorHandle {
    pub fn vibration_id(&self) -> u64 {
        self.vibration_id
    }

    pub fn notify_vibrator_complete(&self, actuator_id: i32) {
        tracing::trace!(vibration_id = self.vibration_id, actuator = actuator_id, "Actuator complete");
        let mut signals = self.state.lock();
        signals.completed.push(actuator_id);
        self.state.wake.notify_all();
    }

    /// Every actuator of a synced start finished together
    pub fn notify_synced_vibration_complete(&self) {
        tracing::trace!(vibration_id = self.vibration_id, "Synced vibration complete");
        let mut signals = self.state.lock();
        signals.completed.extend(self.actuator_ids.iter().copied());
        self.state.wake.notify_all();
    }

    /// Request cancellation
    ///
    /// The first call sets the status. A later call can only escalate a
    /// graceful cancel to an immediate one.
    pub fn notify_cancelled(&self, status: VibrationStatus, immediate: bool) {
        let mut signals = self.state.lock();
        if signals.cancel_immediate || (signals.cancel.is_some() && !immediate) {
            return;
        }
        signals.cancel.get_or_insert(status);
        signals.cancel_immediate |= immediate;
        self.state.wake.notify_all();
        drop(signals);
        tracing::debug!(vibration_id = self.vibration_id, %status, immediate, "Cancel requested");
    }
}

impl DeathRecipient for ConductorHandle {
    fn binder_died(&self) {
        tracing::info!(vibration_id = self.vibration_id, "Requesting client died");
        self.notify_cancelled(VibrationStatus::CancelledBinderDied, false);
    }
}

// ============================================================================
// Step Conductor
// ============================================================================

/// Per-request orchestrator, owned by the scheduler thread
pub struct StepConductor {
    ctx: StepContext,
    state: Arc<SignalState>,
    next_steps: StepQueue,
    /// Steps resumed by a completion callback, run before anything else
    pending_on_complete: VecDeque<Step>,
    cancelled: Option<VibrationStatus>,
    cancelled_immediately: bool,
    pending_vibrate_steps: usize,
    remaining_start_sequential: usize,
    successful_on_steps: usize,
    death_link: Option<LinkId>,
}

impl StepConductor {
    /// Conductor for `vibration`, restricted to the actuators it addresses
    pub fn new(
        vibration: Vibration,
        actuators: &BTreeMap<i32, SharedActuator>,
        hooks: Arc<dyn VibratorManagerHooks>,
        adapter: EffectAdapter,
    ) -> Self {
        let actuators: BTreeMap<i32, SharedActuator> = actuators
            .iter()
            .filter(|(id, _)| vibration.effect.has_actuator(**id))
            .map(|(id, actuator)| (*id, Arc::clone(actuator)))
            .collect();
        let entries = vibration.effect.clone().into_sequential();

        Self {
            ctx: StepContext {
                vibration,
                actuators,
                hooks,
                adapter,
                entries,
            },
            state: Arc::new(SignalState::default()),
            next_steps: StepQueue::default(),
            pending_on_complete: VecDeque::new(),
            cancelled: None,
            cancelled_immediately: false,
            pending_vibrate_steps: 0,
            remaining_start_sequential: 0,
            successful_on_steps: 0,
            death_link: None,
        }
    }

    pub fn vibration(&self) -> &Vibration {
        &self.ctx.vibration
    }

    pub fn vibration_id(&self) -> u64 {
        self.ctx.vibration.id
    }

    pub fn hooks(&self) -> &Arc<dyn VibratorManagerHooks> {
        &self.ctx.hooks
    }

    pub fn handle(&self) -> ConductorHandle {
        ConductorHandle {
            vibration_id: self.ctx.vibration.id,
            actuator_ids: self.ctx.actuators.keys().copied().collect(),
            state: Arc::clone(&self.state),
        }
    }

    /// Link to the client token and queue the first sequential entry
    pub fn start(&mut self) -> Result<(), TokenError> {
        let recipient: Arc<dyn DeathRecipient> = Arc::new(self.handle());
        self.death_link = Some(self.ctx.vibration.token.link_to_death(recipient)?);
        self.prepare_to_start();
        Ok(())
    }

    fn prepare_to_start(&mut self) {
        self.pending_vibrate_steps += 1;
        // Decremented as each start step plays
        self.remaining_start_sequential = self.ctx.entries.len();
        let delay_ms = self.ctx.entries.first().map_or(0, |entry| entry.delay_ms);
        self.next_steps
            .push(Step::start_sequential(0, Instant::now() + Duration::from_millis(delay_ms)));
        tracing::info!(
            vibration_id = self.ctx.vibration.id,
            uid = self.ctx.vibration.uid,
            entries = self.ctx.entries.len(),
            actuators = self.ctx.actuators.len(),
            "Vibration started"
        );
    }

    /// Drop the link to the client token
    pub fn release(&mut self) {
        if let Some(link) = self.death_link.take() {
            self.ctx.vibration.token.unlink_to_death(link);
        }
    }

    pub fn is_finished(&self) -> bool {
        if self.cancelled_immediately {
            return true;
        }
        self.pending_on_complete.is_empty() && self.next_steps.is_empty()
    }

    pub fn status(&self) -> VibrationStatus {
        if let Some(status) = self.cancelled {
            return status;
        }
        if self.pending_vibrate_steps > 0 || self.remaining_start_sequential > 0 {
            return VibrationStatus::Running;
        }
        if self.successful_on_steps > 0 {
            return VibrationStatus::Finished;
        }
        VibrationStatus::IgnoredUnsupported
    }

    /// Block until the next step is due or a signal arrives
    ///
    /// Returns true when a step can run now (or nothing is left). Returns
    /// false after waiting, in which case the caller re-checks state first.
    pub fn wait_until_next_step_is_due(&mut self) -> bool {
        self.process_all_signals();
        if self.cancelled_immediately {
            return false;
        }
        if !self.pending_on_complete.is_empty() {
            return true;
        }
        let wait = match self.next_steps.peek() {
            Some(step) => step.time().wait_time(Instant::now()),
            None => return true,
        };
        if wait.is_zero() {
            return true;
        }

        let state = Arc::clone(&self.state);
        let signals = state.lock();
        // A signal raised before this lock would not interrupt the wait
        if self.has_pending_signal(&signals) {
            return false;
        }
        let _ = state
            .wake
            .wait_timeout(signals, wait)
            .unwrap_or_else(|e| e.into_inner());
        false
    }

    /// Play the next step and queue what follows it
    pub fn run_next_step(&mut self) {
        let mut step = match self.poll_next() {
            Some(step) => step,
            None => return,
        };
        let next_steps = step.play(&self.ctx);

        if step.on_duration() > 0 {
            self.successful_on_steps += 1;
        }
        if step.is_start_sequential() {
            self.remaining_start_sequential = self.remaining_start_sequential.saturating_sub(1);
        }
        if !step.is_cleanup() {
            self.pending_vibrate_steps = self.pending_vibrate_steps.saturating_sub(1);
        }
        self.pending_vibrate_steps += next_steps.iter().filter(|next| !next.is_cleanup()).count();
        self.next_steps.extend(next_steps);
    }

    fn poll_next(&mut self) -> Option<Step> {
        self.pending_on_complete
            .pop_front()
            .or_else(|| self.next_steps.pop())
    }

    fn has_pending_signal(&self, signals: &Signals) -> bool {
        (signals.cancel.is_some() && self.cancelled.is_none())
            || (signals.cancel_immediate && !self.cancelled_immediately)
            || !signals.completed.is_empty()
    }

    fn process_all_signals(&mut self) {
        let state = Arc::clone(&self.state);
        let (cancel, immediate, completed) = {
            let mut signals = state.lock();
            let immediate = signals.cancel_immediate && !self.cancelled_immediately;
            let cancel = signals.cancel.filter(|_| immediate || self.cancelled.is_none());
            // Completions are moot once everything is stopped
            let completed = if immediate {
                Vec::new()
            } else {
                std::mem::take(&mut signals.completed)
            };
            (cancel, immediate, completed)
        };

        if immediate {
            if let Some(status) = cancel {
                self.process_cancel_immediately(status);
            }
            return;
        }
        if let Some(status) = cancel {
            self.process_cancel(status);
        }
        if !completed.is_empty() {
            self.process_vibrators_complete(&completed);
        }
    }

    /// Replace every queued step with its cleanup steps
    fn process_cancel(&mut self, status: VibrationStatus) {
        self.cancelled = Some(status);
        let mut cleanup = Vec::new();
        while let Some(step) = self.poll_next() {
            cleanup.extend(step.cancel(&self.ctx));
        }
        // Every step produced by a cancel is a cleanup step
        self.pending_vibrate_steps = 0;
        tracing::info!(
            vibration_id = self.ctx.vibration.id,
            %status,
            cleanup_steps = cleanup.len(),
            "Vibration cancelled"
        );
        self.next_steps.extend(cleanup);
    }

    /// Stop everything now, skipping cleanup steps
    fn process_cancel_immediately(&mut self, status: VibrationStatus) {
        self.cancelled_immediately = true;
        self.cancelled.get_or_insert(status);
        while let Some(step) = self.poll_next() {
            step.cancel_immediately(&self.ctx);
        }
        self.pending_vibrate_steps = 0;
        tracing::info!(
            vibration_id = self.ctx.vibration.id,
            status = %self.status(),
            "Vibration cancelled immediately"
        );
    }

    /// Bring forward the step waiting on each completed actuator
    fn process_vibrators_complete(&mut self, actuator_ids: &[i32]) {
        for &actuator_id in actuator_ids {
            match self.next_steps.take_first(|step| step.accept_callback(actuator_id)) {
                Some(step) => self.pending_on_complete.push_back(step),
                None => tracing::trace!(
                    vibration_id = self.ctx.vibration.id,
                    actuator = actuator_id,
                    queued = self.next_steps.len(),
                    "No step waiting on completion"
                ),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
