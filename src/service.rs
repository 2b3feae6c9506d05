//! Vibrator service
//!
//! Owns the actuators and the scheduler thread, routes actuator completion
//! callbacks to the running conductor and supersedes or cancels vibrations on
//! behalf of callers.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use crate::actuator::{CompletionListener, SharedActuator};
use crate::adapter::EffectAdapter;
use crate::capability::{ActuatorInfo, SyncCapabilities};
use crate::conductor::{ConductorHandle, StepConductor};
use crate::config::{Config, VibrationConfig};
use crate::effect::{CombinedVibration, EffectError};
use crate::hooks::{LoggingWakeLock, VibratorManagerHooks, WakeLock};
use crate::simulated::SimulatedActuator;
use crate::thread::SchedulerThread;
use crate::token::LifecycleToken;
use crate::vibration::{Vibration, VibrationStatus};

/// How long a superseded vibration gets to release the scheduler thread
pub const SUPERSEDE_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Completion Routing
// ============================================================================

/// Forwards actuator callbacks to the conductor bound to the scheduler thread
///
/// Callbacks carrying another vibration id are stale and dropped.
#[derive(Debug, Default)]
pub struct CompletionRouter {
    bound: Mutex<Option<ConductorHandle>>,
}

impl CompletionRouter {
    pub fn bind(&self, handle: ConductorHandle) {
        *self.lock() = Some(handle);
    }

    /// Unbind `vibration_id`, leaving any newer binding in place
    pub fn clear(&self, vibration_id: u64) {
        let mut bound = self.lock();
        if bound.as_ref().map_or(false, |h| h.vibration_id() == vibration_id) {
            *bound = None;
        }
    }

    pub fn bound_vibration_id(&self) -> Option<u64> {
        self.lock().as_ref().map(ConductorHandle::vibration_id)
    }

    /// Manager callback for a completed synced start
    pub fn on_synced_complete(&self, vibration_id: u64) {
        match self.handle_for(vibration_id) {
            Some(handle) => handle.notify_synced_vibration_complete(),
            None => tracing::debug!(vibration_id, "Dropping stale synced completion"),
        }
    }

    fn handle_for(&self, vibration_id: u64) -> Option<ConductorHandle> {
        self.lock()
            .as_ref()
            .filter(|h| h.vibration_id() == vibration_id)
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ConductorHandle>> {
        self.bound.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CompletionListener for CompletionRouter {
    fn on_complete(&self, actuator_id: i32, vibration_id: u64) {
        match self.handle_for(vibration_id) {
            Some(handle) => handle.notify_vibrator_complete(actuator_id),
            None => tracing::debug!(
                actuator = actuator_id,
                vibration_id,
                "Dropping stale completion callback"
            ),
        }
    }
}

// ============================================================================
// Service Hooks
// ============================================================================

/// Lifecycle notifications published by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEvent {
    Completed { id: u64, status: VibrationStatus },
    Released { id: u64 },
}

/// Manager hooks for a host with no dedicated synced-start hardware
///
/// Synced starts are accepted when every required capability is in the
/// manager's set; lifecycle events are logged and published on the channel.
pub struct ServiceHooks {
    router: Arc<CompletionRouter>,
    manager_capabilities: RwLock<SyncCapabilities>,
    events: Option<UnboundedSender<ServiceEvent>>,
}

impl ServiceHooks {
    pub fn new(
        router: Arc<CompletionRouter>,
        manager_capabilities: SyncCapabilities,
        events: Option<UnboundedSender<ServiceEvent>>,
    ) -> Self {
        Self {
            router,
            manager_capabilities: RwLock::new(manager_capabilities),
            events,
        }
    }

    /// Manager capability set for the `manager_synced_start` setting
    pub fn capabilities_for(synced_start: bool) -> SyncCapabilities {
        if synced_start {
            SyncCapabilities::all()
        } else {
            SyncCapabilities::empty()
        }
    }

    pub fn set_manager_capabilities(&self, capabilities: SyncCapabilities) {
        *self
            .manager_capabilities
            .write()
            .unwrap_or_else(|e| e.into_inner()) = capabilities;
    }

    fn manager_capabilities(&self) -> SyncCapabilities {
        *self
            .manager_capabilities
            .read()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, event: ServiceEvent) {
        if let Some(tx) = &self.events {
            // Receiver gone means nobody is listening anymore
            let _ = tx.send(event);
        }
    }
}

impl VibratorManagerHooks for ServiceHooks {
    fn prepare_synced_vibration(&self, required: SyncCapabilities, actuator_ids: &[i32]) -> bool {
        let supported = self.manager_capabilities().contains(required);
        tracing::debug!(?required, actuators = ?actuator_ids, supported, "Prepare synced vibration");
        supported
    }

    fn trigger_synced_vibration(&self, vibration_id: u64) -> bool {
        tracing::debug!(vibration_id, "Trigger synced vibration");
        true
    }

    fn cancel_synced_vibration(&self) {
        tracing::debug!("Cancel synced vibration");
    }

    fn note_vibrator_on(&self, uid: u32, duration_ms: u64) {
        tracing::debug!(uid, duration_ms, "Vibrator on");
    }

    fn note_vibrator_off(&self, uid: u32) {
        tracing::debug!(uid, "Vibrator off");
    }

    fn on_vibration_completed(&self, vibration_id: u64, status: VibrationStatus) {
        self.publish(ServiceEvent::Completed {
            id: vibration_id,
            status,
        });
    }

    fn on_vibration_thread_released(&self, vibration_id: u64) {
        self.router.clear(vibration_id);
        tracing::debug!(vibration_id, "Scheduler thread released");
        self.publish(ServiceEvent::Released { id: vibration_id });
    }
}

// ============================================================================
// Vibrator Service
// ============================================================================

pub struct VibratorService {
    actuators: BTreeMap<i32, SharedActuator>,
    thread: SchedulerThread,
    router: Arc<CompletionRouter>,
    hooks: Arc<ServiceHooks>,
    adapter: Mutex<EffectAdapter>,
    next_id: AtomicU64,
}

impl VibratorService {
    /// Service over `actuators`, whose callbacks must reach `router`
    pub fn new(
        actuators: Vec<SharedActuator>,
        router: Arc<CompletionRouter>,
        hooks: Arc<ServiceHooks>,
        wake_lock: Arc<dyn WakeLock>,
        settings: &VibrationConfig,
    ) -> Result<Self, ServiceError> {
        let actuators: BTreeMap<i32, SharedActuator> = actuators
            .into_iter()
            .map(|actuator| (actuator.id(), actuator))
            .collect();
        let thread = SchedulerThread::spawn(wake_lock)?;

        tracing::info!(actuators = ?actuators.keys().collect::<Vec<_>>(), "Vibrator service started");
        Ok(Self {
            actuators,
            thread,
            router,
            hooks,
            adapter: Mutex::new(EffectAdapter::new(settings)),
            next_id: AtomicU64::new(1),
        })
    }

    /// Service over simulated actuators described by `config`
    pub fn simulated(
        config: &Config,
        events: Option<UnboundedSender<ServiceEvent>>,
    ) -> Result<Self, ServiceError> {
        let router = Arc::new(CompletionRouter::default());
        let actuators = config
            .actuators
            .iter()
            .map(|actuator| {
                let listener: Arc<dyn CompletionListener> = router.clone();
                Arc::new(SimulatedActuator::from_config(actuator, listener)) as SharedActuator
            })
            .collect();
        let hooks = Arc::new(ServiceHooks::new(
            Arc::clone(&router),
            ServiceHooks::capabilities_for(config.manager_synced_start),
            events,
        ));
        Self::new(actuators, router, hooks, Arc::new(LoggingWakeLock), &config.vibration)
    }

    pub fn actuator_infos(&self) -> Vec<ActuatorInfo> {
        self.actuators
            .values()
            .map(|actuator| actuator.info().clone())
            .collect()
    }

    pub fn router(&self) -> &Arc<CompletionRouter> {
        &self.router
    }

    /// Id of the vibration bound to the scheduler thread
    pub fn current_vibration_id(&self) -> Option<u64> {
        self.thread.current_handle().map(|handle| handle.vibration_id())
    }

    /// Play `effect` for `uid`, superseding whatever is running
    pub fn vibrate(
        &self,
        effect: CombinedVibration,
        uid: u32,
        token: LifecycleToken,
    ) -> Result<u64, ServiceError> {
        self.submit(self.new_vibration(effect, uid, token))
    }

    /// Request with a fresh id, for callers that attach attribution or fallbacks
    pub fn new_vibration(&self, effect: CombinedVibration, uid: u32, token: LifecycleToken) -> Vibration {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Vibration::new(id, effect, uid, token)
    }

    /// Play a prepared vibration, superseding whatever is running
    pub fn submit(&self, vibration: Vibration) -> Result<u64, ServiceError> {
        vibration.effect.validate()?;
        let id = vibration.id;
        tracing::debug!(
            vibration_id = id,
            uid = vibration.uid,
            package = %vibration.package_name,
            reason = %vibration.reason,
            "Vibration requested"
        );

        if let Some(running) = self.thread.current_handle() {
            tracing::info!(vibration_id = id, superseded = running.vibration_id(), "Superseding vibration");
            running.notify_cancelled(VibrationStatus::CancelledSuperseded, true);
            if !self.thread.wait_for_thread_idle(SUPERSEDE_TIMEOUT) {
                return Err(ServiceError::NotIdle);
            }
        }

        let adapter = self.adapter.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let hooks: Arc<dyn VibratorManagerHooks> = self.hooks.clone();
        let conductor = StepConductor::new(vibration, &self.actuators, hooks, adapter);
        self.router.bind(conductor.handle());
        if !self.thread.run_on_scheduler_thread(conductor) {
            self.router.clear(id);
            return Err(ServiceError::ThreadBusy);
        }

        tracing::debug!(vibration_id = id, "Vibration submitted");
        Ok(id)
    }

    /// Cancel the running vibration gracefully; false if none was running
    pub fn cancel(&self, status: VibrationStatus) -> bool {
        match self.thread.current_handle() {
            Some(handle) => {
                handle.notify_cancelled(status, false);
                true
            }
            None => false,
        }
    }

    /// Apply reloaded settings to later vibrations and cancel the current one
    pub fn on_settings_changed(&self, config: &Config) {
        *self.adapter.lock().unwrap_or_else(|e| e.into_inner()) = EffectAdapter::new(&config.vibration);
        self.hooks
            .set_manager_capabilities(ServiceHooks::capabilities_for(config.manager_synced_start));
        if self.cancel(VibrationStatus::CancelledBySettingsUpdate) {
            tracing::info!("Settings changed, cancelled running vibration");
        }
    }

    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        self.thread.wait_for_thread_idle(timeout)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Vibration request could not be scheduled
#[derive(Debug)]
pub enum ServiceError {
    InvalidEffect(EffectError),
    /// Another vibration claimed the scheduler thread first
    ThreadBusy,
    /// The superseded vibration did not release the thread in time
    NotIdle,
    Io(io::Error),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::InvalidEffect(e) => write!(f, "Invalid effect: {}", e),
            ServiceError::ThreadBusy => write!(f, "Scheduler thread busy"),
            ServiceError::NotIdle => write!(f, "Scheduler thread did not go idle"),
            ServiceError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::InvalidEffect(e) => Some(e),
            ServiceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EffectError> for ServiceError {
    fn from(e: EffectError) -> Self {
        ServiceError::InvalidEffect(e)
    }
}

impl From<io::Error> for ServiceError {
    fn from(e: io::Error) -> Self {
        ServiceError::Io(e)
    }
}

// ============================================================================
// Tests
// ============================================================================
