//! Scheduler thread
//!
//! A single long-lived worker that plays one conductor at a time. The worker
//! holds the wake lock while a vibration plays and reports completion and
//! release through the conductor's hooks.

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::conductor::{ConductorHandle, StepConductor};
use crate::hooks::WakeLock;
use crate::vibration::VibrationStatus;

/// Worker thread name
const THREAD_NAME: &str = "vibration-scheduler";

#[derive(Default)]
struct ThreadState {
    /// Conductor handed over but not yet picked up by the worker
    requested: Option<StepConductor>,
    /// Vibration bound to the thread, from hand-over until release
    active: Option<ConductorHandle>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<ThreadState>,
    changed: Condvar,
    wake_lock: Arc<dyn WakeLock>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ThreadState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Owner of the scheduler worker
pub struct SchedulerThread {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl SchedulerThread {
    pub fn spawn(wake_lock: Arc<dyn WakeLock>) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(ThreadState::default()),
            changed: Condvar::new(),
            wake_lock,
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || worker_loop(&worker_shared))?;

        tracing::debug!("Scheduler thread started");
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Hand a conductor to the worker
    ///
    /// Returns false, dropping the conductor, if a vibration is still bound.
    pub fn run_on_scheduler_thread(&self, conductor: StepConductor) -> bool {
        let mut state = self.shared.lock();
        if let Some(active) = &state.active {
            tracing::warn!(
                active = active.vibration_id(),
                requested = conductor.vibration_id(),
                "Scheduler thread busy"
            );
            return false;
        }
        if state.shutdown {
            return false;
        }
        state.active = Some(conductor.handle());
        state.requested = Some(conductor);
        self.shared.changed.notify_all();
        true
    }

    pub fn is_running_vibration_id(&self, vibration_id: u64) -> bool {
        self.shared
            .lock()
            .active
            .as_ref()
            .map_or(false, |active| active.vibration_id() == vibration_id)
    }

    /// Handle of the bound vibration, if any
    pub fn current_handle(&self) -> Option<ConductorHandle> {
        self.shared.lock().active.clone()
    }

    /// Wait until no vibration is bound; false on timeout
    pub fn wait_for_thread_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while state.active.is_some() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        true
    }
}

impl Drop for SchedulerThread {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            if let Some(active) = &state.active {
                active.notify_cancelled(VibrationStatus::CancelledByUser, true);
            }
            self.shared.changed.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Scheduler thread panicked");
            }
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

fn worker_loop(shared: &Shared) {
    while let Some(mut conductor) = next_conductor(shared) {
        let vibration_id = conductor.vibration_id();
        run_conductor(&mut conductor, shared.wake_lock.as_ref());

        // Released before the slot frees up so the owner can unbind first
        conductor.hooks().on_vibration_thread_released(vibration_id);
        drop(conductor);

        let mut state = shared.lock();
        state.active = None;
        shared.changed.notify_all();
    }
    tracing::debug!("Scheduler thread stopped");
}

fn next_conductor(shared: &Shared) -> Option<StepConductor> {
    let mut state = shared.lock();
    loop {
        if let Some(conductor) = state.requested.take() {
            return Some(conductor);
        }
        if state.shutdown {
            return None;
        }
        state = shared
            .changed
            .wait(state)
            .unwrap_or_else(|e| e.into_inner());
    }
}

fn run_conductor(conductor: &mut StepConductor, wake_lock: &dyn WakeLock) {
    let vibration_id = conductor.vibration_id();
    wake_lock.acquire();

    match conductor.start() {
        Ok(()) => play_vibration(conductor),
        Err(e) => {
            tracing::warn!(vibration_id, "Vibration not started: {}", e);
            conductor
                .hooks()
                .on_vibration_completed(vibration_id, VibrationStatus::IgnoredErrorToken);
        }
    }

    conductor.release();
    wake_lock.release();
}

fn play_vibration(conductor: &mut StepConductor) {
    let started = Instant::now();
    let mut reported = false;

    while !conductor.is_finished() {
        if conductor.wait_until_next_step_is_due() {
            conductor.run_next_step();
        }
        if !reported {
            let status = conductor.status();
            if status != VibrationStatus::Running {
                report_completed(conductor, status, started);
                reported = true;
            }
        }
    }

    if !reported {
        report_completed(conductor, conductor.status(), started);
    }
}

fn report_completed(conductor: &StepConductor, status: VibrationStatus, started: Instant) {
    let vibration_id = conductor.vibration_id();
    tracing::info!(
        vibration_id,
        %status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Vibration completed"
    );
    conductor.hooks().on_vibration_completed(vibration_id, status);
}

// ============================================================================
// Tests
// ============================================================================
