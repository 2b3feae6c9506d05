//! Test doubles shared by the scheduling tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::actuator::{Actuator, CompletionListener, SharedActuator};
use crate::adapter::EffectAdapter;
use crate::capability::{ActuatorInfo, SyncCapabilities};
use crate::conductor::{ConductorHandle, StepConductor};
use crate::effect::CombinedVibration;
use crate::hooks::{VibratorManagerHooks, WakeLock};
use crate::service::CompletionRouter;
use crate::simulated::SimulatedActuator;
use crate::thread::SchedulerThread;
use crate::token::LifecycleToken;
use crate::vibration::{Vibration, VibrationStatus};

pub(crate) const TEST_UID: u32 = 10;

/// How long scenario tests wait for the scheduler before failing
pub(crate) const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Listener that drops every callback
pub(crate) struct NullListener;

impl CompletionListener for NullListener {
    fn on_complete(&self, _actuator_id: i32, _vibration_id: u64) {}
}

/// Simulated actuator whose callbacks go nowhere
pub(crate) fn simulated(info: ActuatorInfo) -> SimulatedActuator {
    SimulatedActuator::new(info, Arc::new(NullListener))
}

// ============================================================================
// Recording Hooks
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HookEvent {
    Prepare(SyncCapabilities, Vec<i32>),
    Trigger(u64),
    CancelSynced,
    VibratorOn(u32, u64),
    VibratorOff(u32),
    Completed(u64, VibrationStatus),
    Released(u64),
}

/// Hooks that record every call, with configurable synced-start results
pub(crate) struct RecordingHooks {
    prepare_result: AtomicBool,
    trigger_result: AtomicBool,
    events: Mutex<Vec<HookEvent>>,
    changed: Condvar,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self {
            prepare_result: AtomicBool::new(true),
            trigger_result: AtomicBool::new(true),
            events: Mutex::new(Vec::new()),
            changed: Condvar::new(),
        }
    }

    pub fn with_prepare_result(self, result: bool) -> Self {
        self.prepare_result.store(result, Ordering::SeqCst);
        self
    }

    pub fn with_trigger_result(self, result: bool) -> Self {
        self.trigger_result.store(result, Ordering::SeqCst);
        self
    }

    pub fn events(&self) -> Vec<HookEvent> {
        self.lock().clone()
    }

    /// Completion status reported for a vibration, if any
    pub fn status_of(&self, vibration_id: u64) -> Option<VibrationStatus> {
        self.lock().iter().find_map(|event| match event {
            HookEvent::Completed(id, status) if *id == vibration_id => Some(*status),
            _ => None,
        })
    }

    pub fn wait_for_completion(&self, vibration_id: u64) -> Option<VibrationStatus> {
        self.wait_for(|events| {
            events.iter().find_map(|event| match event {
                HookEvent::Completed(id, status) if *id == vibration_id => Some(*status),
                _ => None,
            })
        })
    }

    /// Wait until the scheduler released the vibration, returning its status
    pub fn wait_for_release(&self, vibration_id: u64) -> Option<VibrationStatus> {
        self.wait_for(|events| {
            events
                .iter()
                .any(|event| *event == HookEvent::Released(vibration_id))
                .then_some(())
        })?;
        self.status_of(vibration_id)
    }

    fn wait_for<T>(&self, mut check: impl FnMut(&[HookEvent]) -> Option<T>) -> Option<T> {
        let deadline = Instant::now() + TEST_TIMEOUT;
        let mut events = self.lock();
        loop {
            if let Some(found) = check(&events) {
                return Some(found);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            events = self
                .changed
                .wait_timeout(events, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    fn record(&self, event: HookEvent) {
        self.lock().push(event);
        self.changed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HookEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl VibratorManagerHooks for RecordingHooks {
    fn prepare_synced_vibration(&self, required: SyncCapabilities, actuator_ids: &[i32]) -> bool {
        self.record(HookEvent::Prepare(required, actuator_ids.to_vec()));
        self.prepare_result.load(Ordering::SeqCst)
    }

    fn trigger_synced_vibration(&self, vibration_id: u64) -> bool {
        self.record(HookEvent::Trigger(vibration_id));
        self.trigger_result.load(Ordering::SeqCst)
    }

    fn cancel_synced_vibration(&self) {
        self.record(HookEvent::CancelSynced);
    }

    fn note_vibrator_on(&self, uid: u32, duration_ms: u64) {
        self.record(HookEvent::VibratorOn(uid, duration_ms));
    }

    fn note_vibrator_off(&self, uid: u32) {
        self.record(HookEvent::VibratorOff(uid));
    }

    fn on_vibration_completed(&self, vibration_id: u64, status: VibrationStatus) {
        self.record(HookEvent::Completed(vibration_id, status));
    }

    fn on_vibration_thread_released(&self, vibration_id: u64) {
        self.record(HookEvent::Released(vibration_id));
    }
}

/// Wake lock that counts acquire/release calls
#[derive(Default)]
pub(crate) struct CountingWakeLock {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

impl WakeLock for CountingWakeLock {
    fn acquire(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Scheduler Harness
// ============================================================================

/// Simulated actuators wired to a scheduler thread through a completion router
pub(crate) struct Harness {
    pub hooks: Arc<RecordingHooks>,
    pub wake_lock: Arc<CountingWakeLock>,
    pub thread: SchedulerThread,
    pub adapter: EffectAdapter,
    router: Arc<CompletionRouter>,
    simulated: BTreeMap<i32, Arc<SimulatedActuator>>,
    next_id: AtomicU64,
}

impl Harness {
    pub fn new(infos: Vec<ActuatorInfo>) -> Self {
        Self::build(infos, RecordingHooks::new(), Duration::ZERO)
    }

    pub fn build(infos: Vec<ActuatorInfo>, hooks: RecordingHooks, latency: Duration) -> Self {
        let router = Arc::new(CompletionRouter::default());
        let simulated = infos
            .into_iter()
            .map(|info| {
                let listener: Arc<dyn CompletionListener> = router.clone();
                let actuator = SimulatedActuator::new(info, listener).with_latency(latency);
                (actuator.id(), Arc::new(actuator))
            })
            .collect();
        let wake_lock = Arc::new(CountingWakeLock::default());
        let thread = SchedulerThread::spawn(wake_lock.clone())
            .expect("failed to spawn scheduler thread");

        Self {
            hooks: Arc::new(hooks),
            wake_lock,
            thread,
            adapter: EffectAdapter::default(),
            router,
            simulated,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_adapter(mut self, adapter: EffectAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn actuator(&self, id: i32) -> &SimulatedActuator {
        &self.simulated[&id]
    }

    pub fn vibration(&self, effect: CombinedVibration) -> Vibration {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Vibration::new(id, effect, TEST_UID, LifecycleToken::new())
    }

    /// Hand the vibration to the scheduler thread
    pub fn start(&self, vibration: Vibration) -> ConductorHandle {
        let actuators: BTreeMap<i32, SharedActuator> = self
            .simulated
            .iter()
            .map(|(id, actuator)| (*id, actuator.clone() as SharedActuator))
            .collect();
        let conductor = StepConductor::new(vibration, &actuators, self.hooks.clone(), self.adapter.clone());
        let handle = conductor.handle();
        self.router.bind(handle.clone());
        assert!(self.thread.run_on_scheduler_thread(conductor));
        handle
    }

    /// Start and wait until the scheduler thread is free again
    pub fn run(&self, vibration: Vibration) -> VibrationStatus {
        let id = vibration.id;
        self.start(vibration);
        self.hooks
            .wait_for_release(id)
            .expect("vibration was not released in time")
    }
}
