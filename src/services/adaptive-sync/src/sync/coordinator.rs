//! # Lifecycle Coordinator
//!
//! Owns the [`ApplicationStateSnapshot`], persists it on every mutation,
//! reconciles it with the remote copy through the scheduler and reacts to
//! resource pressure and app lifecycle transitions.
//!
//! State machine:
//! - `Idle -> Syncing` on [`LifecycleCoordinator::sync_data`] or a
//!   foreground transition with stale data
//! - `Syncing -> Idle` when the sync finishes, successfully or not
//! - any state `-> Degraded` when a health check reports pressure, and back
//!   to `Idle` on the next healthy check

use crate::config::SyncConfig;
use crate::error::{AdaptiveSyncError, AdaptiveSyncResult};
use crate::metrics::ServiceMetrics;
use crate::models::{Priority, RequestDescriptor};
use crate::scheduler::RequestScheduler;
use crate::sync::snapshot::{ApplicationStateSnapshot, PendingOperation, SyncResponse};
use crate::sync::store::SnapshotStore;
use crate::telemetry::{ResourceMonitor, ResourceReport};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const HINT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorState {
    Idle,
    Syncing,
    Degraded,
}

/// App lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    EnteredBackground,
    WillEnterForeground,
}

/// Best-effort hints for collaborators that own resource-hungry work
/// (camera cadence, pose processing and the like)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceHint {
    ReduceCpu,
    ReduceMemory,
    ReduceBattery,
    ReduceTemperature,
    /// Pressure is gone, normal cadence may resume
    Restore,
}

/// How a sync call ended when it did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Remote copy merged; carries the merged snapshot
    Synced(ApplicationStateSnapshot),
    /// Skipped under resource pressure; retried once health recovers
    Deferred(ApplicationStateSnapshot),
    /// Skipped while offline; retried when connectivity returns
    Offline(ApplicationStateSnapshot),
}

impl SyncOutcome {
    pub fn snapshot(&self) -> &ApplicationStateSnapshot {
        match self {
            SyncOutcome::Synced(snapshot)
            | SyncOutcome::Deferred(snapshot)
            | SyncOutcome::Offline(snapshot) => snapshot,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Synced(_) => "synced",
            SyncOutcome::Deferred(_) => "deferred",
            SyncOutcome::Offline(_) => "offline",
        }
    }
}

/// Shared handle to the sync in progress. The error is carried as text so
/// every joined caller can receive a copy.
type InFlightSync = Shared<BoxFuture<'static, Result<SyncOutcome, String>>>;

pub struct LifecycleCoordinator {
    config: SyncConfig,
    scheduler: Arc<RequestScheduler>,
    monitor: Arc<ResourceMonitor>,
    store: Arc<dyn SnapshotStore>,
    snapshot: RwLock<ApplicationStateSnapshot>,
    state: Mutex<CoordinatorState>,
    /// True while a snapshot submission is outstanding. Guarded by `state`.
    syncing: AtomicBool,
    in_flight_sync: Mutex<Option<InFlightSync>>,
    persist_lock: tokio::sync::Mutex<()>,
    dirty: AtomicBool,
    online: AtomicBool,
    sync_deferred: AtomicBool,
    hints: broadcast::Sender<ResourceHint>,
    watcher: Mutex<Option<CancellationToken>>,
    metrics: Option<Arc<ServiceMetrics>>,
}

impl LifecycleCoordinator {
    pub fn new(
        config: SyncConfig,
        scheduler: Arc<RequestScheduler>,
        monitor: Arc<ResourceMonitor>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let (hints, _) = broadcast::channel(HINT_CHANNEL_CAPACITY);
        Self {
            config,
            scheduler,
            monitor,
            store,
            snapshot: RwLock::new(ApplicationStateSnapshot::default()),
            state: Mutex::new(CoordinatorState::Idle),
            syncing: AtomicBool::new(false),
            in_flight_sync: Mutex::new(None),
            persist_lock: tokio::sync::Mutex::new(()),
            dirty: AtomicBool::new(false),
            online: AtomicBool::new(true),
            sync_deferred: AtomicBool::new(false),
            hints,
            watcher: Mutex::new(None),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ServiceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Restore the stored snapshot and start reacting to every report the
    /// monitor publishes. Returns false when already started.
    pub async fn start(self: &Arc<Self>) -> bool {
        if self.watcher.lock().is_some() {
            return false;
        }
        self.restore().await;

        let token = CancellationToken::new();
        {
            let mut slot = self.watcher.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(token.clone());
        }

        let coordinator = Arc::downgrade(self);
        let mut reports = self.monitor.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = reports.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let report = reports.borrow_and_update().clone();
                        let Some(coordinator) = coordinator.upgrade() else {
                            break;
                        };
                        if let Some(report) = report {
                            coordinator.check_health(&report);
                        }
                    }
                }
            }
            debug!("Health watcher stopped");
        });

        info!(key = %self.config.state_key, "Lifecycle coordinator started");
        true
    }

    /// Stop the health watcher and write the snapshot one last time
    pub async fn shutdown(&self) {
        if let Some(token) = self.watcher.lock().take() {
            token.cancel();
        }
        if !self.persist().await {
            warn!("Snapshot could not be persisted during shutdown");
        }
        info!("Lifecycle coordinator stopped");
    }

    /// Load the stored snapshot into memory. A missing record is created
    /// from defaults; an unreadable one is moved aside first so its pending
    /// operations can still be recovered by hand.
    pub async fn restore(&self) -> ApplicationStateSnapshot {
        match self.store.load().await {
            Ok(Some(snapshot)) => {
                info!(
                    pending = snapshot.pending_operations.len(),
                    last_sync = ?snapshot.last_sync_date,
                    "Restored application snapshot"
                );
                *self.snapshot.write() = snapshot;
            }
            Ok(None) => {
                info!("No stored snapshot, starting from defaults");
                self.persist().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to load stored snapshot, starting from defaults");
                match self.store.set_aside().await {
                    Ok(Some(path)) => {
                        warn!(path = %path.display(), "Unreadable snapshot moved aside");
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "Failed to move unreadable snapshot aside");
                    }
                }
            }
        }
        self.snapshot()
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.lock()
    }

    pub fn snapshot(&self) -> ApplicationStateSnapshot {
        self.snapshot.read().clone()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// True while the last persist attempt failed
    pub fn has_unpersisted_changes(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn subscribe_hints(&self) -> broadcast::Receiver<ResourceHint> {
        self.hints.subscribe()
    }

    /// Reconcile the local snapshot with the remote copy.
    ///
    /// At most one sync runs at a time: a call made while another is in
    /// progress joins it and receives the same outcome.
    #[instrument(skip(self), fields(endpoint = %self.config.endpoint))]
    pub async fn sync_data(self: &Arc<Self>) -> AdaptiveSyncResult<SyncOutcome> {
        let in_flight = {
            let mut slot = self.in_flight_sync.lock();
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("Joining sync already in progress");
                    in_flight.clone()
                }
                None => {
                    let coordinator = Arc::clone(self);
                    let in_flight = async move {
                        let result = Arc::clone(&coordinator)
                            .run_sync()
                            .await
                            .map_err(|e| e.to_string());
                        coordinator.in_flight_sync.lock().take();
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(in_flight.clone());
                    in_flight
                }
            }
        };

        in_flight.await.map_err(AdaptiveSyncError::sync_failed)
    }

    async fn run_sync(self: Arc<Self>) -> AdaptiveSyncResult<SyncOutcome> {
        self.sync_deferred.store(false, Ordering::SeqCst);

        if !self.is_online() {
            self.sync_deferred.store(true, Ordering::SeqCst);
            info!("Offline, sync postponed until connectivity returns");
            return Ok(self.finish(SyncOutcome::Offline(self.snapshot())));
        }

        let report = self.monitor.get_resource_report();
        if self.check_health(&report) == CoordinatorState::Degraded {
            self.sync_deferred.store(true, Ordering::SeqCst);
            info!(
                violations = ?report.health.violated_metrics(),
                "Under resource pressure, sync deferred"
            );
            return Ok(self.finish(SyncOutcome::Deferred(self.snapshot())));
        }

        {
            let mut state = self.state.lock();
            self.syncing.store(true, Ordering::SeqCst);
            *state = CoordinatorState::Syncing;
        }
        let result = self.submit_snapshot().await;
        {
            let mut state = self.state.lock();
            self.syncing.store(false, Ordering::SeqCst);
            if *state == CoordinatorState::Syncing {
                *state = CoordinatorState::Idle;
            }
        }

        match result {
            Ok(merged) => {
                info!(
                    pending = merged.pending_operations.len(),
                    total_workouts = merged.total_workouts,
                    "Snapshot synchronized"
                );
                Ok(self.finish(SyncOutcome::Synced(merged)))
            }
            Err(e) => {
                warn!(
                    error = %e,
                    pending = self.snapshot.read().pending_operations.len(),
                    "Sync failed, pending operations kept for replay"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_sync("failed");
                }
                Err(e)
            }
        }
    }

    fn finish(&self, outcome: SyncOutcome) -> SyncOutcome {
        if let Some(metrics) = &self.metrics {
            metrics.record_sync(outcome.as_str());
        }
        outcome
    }

    /// Submit the local snapshot as a critical operation and merge the
    /// response. The in-memory snapshot only changes on success.
    async fn submit_snapshot(&self) -> AdaptiveSyncResult<ApplicationStateSnapshot> {
        let local = self.snapshot();
        let descriptor = RequestDescriptor::post_json(self.config.endpoint.clone(), &local)?;

        let payload = self
            .scheduler
            .perform_request(
                descriptor,
                self.config.sync_retry_count,
                self.config.sync_timeout(),
                Priority::Critical,
                false,
            )
            .await?;
        let response: SyncResponse = payload.json()?;

        // Merge against the current snapshot so mutations recorded while the
        // request was in flight stay pending.
        let merged = {
            let mut current = self.snapshot.write();
            let mut merged = current.merge_remote(&response.state, &response.confirmed_operations);
            merged.last_sync_date = Some(Utc::now());
            *current = merged.clone();
            merged
        };
        debug!(
            confirmed = response.confirmed_operations.len(),
            "Merged remote snapshot"
        );

        self.persist().await;
        Ok(merged)
    }

    /// Apply a tracked user action: mutate the snapshot, record a pending
    /// operation for the remote side and persist.
    pub async fn record_mutation<F>(
        &self,
        kind: &str,
        payload: serde_json::Value,
        mutate: F,
    ) -> PendingOperation
    where
        F: FnOnce(&mut ApplicationStateSnapshot) + Send,
    {
        let operation = PendingOperation::new(kind, payload);
        {
            let mut snapshot = self.snapshot.write();
            mutate(&mut snapshot);
            snapshot.pending_operations.push(operation.clone());
        }
        debug!(kind, id = %operation.id, "Recorded mutation");

        self.persist().await;
        operation
    }

    pub async fn start_workout(&self, workout_id: &str) -> PendingOperation {
        self.record_mutation(
            "start_workout",
            json!({ "workoutId": workout_id }),
            |snapshot| snapshot.current_workout_id = Some(workout_id.to_string()),
        )
        .await
    }

    pub async fn complete_workout(&self, workout_id: &str) -> PendingOperation {
        self.record_mutation(
            "complete_workout",
            json!({ "workoutId": workout_id }),
            |snapshot| snapshot.complete_workout(workout_id, Utc::now()),
        )
        .await
    }

    pub async fn select_routine(&self, routine_id: &str) -> PendingOperation {
        self.record_mutation(
            "select_routine",
            json!({ "routineId": routine_id }),
            |snapshot| snapshot.current_routine_id = Some(routine_id.to_string()),
        )
        .await
    }

    /// Write the in-memory snapshot. A failure marks it dirty; the next
    /// mutation writes the whole snapshot again.
    async fn persist(&self) -> bool {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.snapshot();
        let retrying = self.dirty.load(Ordering::SeqCst);

        match self.store.save(&snapshot).await {
            Ok(()) => {
                self.dirty.store(false, Ordering::SeqCst);
                if retrying {
                    info!("Snapshot persisted after an earlier failure");
                }
                true
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                warn!(error = %e, "Failed to persist snapshot, keeping it in memory");
                false
            }
        }
    }

    /// Report connectivity. Coming back online while idle and healthy
    /// starts a sync in the background.
    pub fn set_online(self: &Arc<Self>, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online == was_online {
            return;
        }

        if !online {
            info!("Connectivity lost");
            return;
        }

        let healthy = self
            .monitor
            .latest_report()
            .map_or(true, |report| report.is_healthy());
        info!(healthy, "Connectivity restored");
        if healthy && self.state() == CoordinatorState::Idle {
            self.spawn_sync("connectivity restored");
        }
    }

    /// Move into or out of `Degraded` according to `report`. Entering
    /// `Degraded` runs every reduction in order; leaving it returns to
    /// `Syncing` while a submission is outstanding, `Idle` otherwise.
    pub fn check_health(self: &Arc<Self>, report: &ResourceReport) -> CoordinatorState {
        let healthy = report.is_healthy();
        let (previous, current) = {
            let mut state = self.state.lock();
            let previous = *state;
            if !healthy {
                *state = CoordinatorState::Degraded;
            } else if previous == CoordinatorState::Degraded {
                *state = if self.syncing.load(Ordering::SeqCst) {
                    CoordinatorState::Syncing
                } else {
                    CoordinatorState::Idle
                };
            }
            (previous, *state)
        };

        if !healthy && previous != CoordinatorState::Degraded {
            warn!(
                violations = ?report.health.violated_metrics(),
                "Resource pressure, entering degraded mode"
            );
            self.reduce_cpu_usage();
            self.reduce_memory_usage();
            self.reduce_battery_usage();
            self.reduce_temperature();
        } else if healthy && previous == CoordinatorState::Degraded {
            info!("Resources recovered, leaving degraded mode");
            self.emit(ResourceHint::Restore);
            if self.sync_deferred.swap(false, Ordering::SeqCst) {
                self.spawn_sync("resources recovered");
            }
        }

        current
    }

    pub fn reduce_cpu_usage(&self) {
        self.emit(ResourceHint::ReduceCpu);
        let shed = self.scheduler.pause_non_essential_requests();
        debug!(shed, "Reduced CPU usage");
    }

    pub fn reduce_memory_usage(&self) {
        self.emit(ResourceHint::ReduceMemory);
        let evicted = self.scheduler.clear_cache();
        debug!(evicted, "Reduced memory usage");
    }

    pub fn reduce_battery_usage(&self) {
        self.emit(ResourceHint::ReduceBattery);
        let shed = self.scheduler.pause_non_essential_requests();
        debug!(shed, "Reduced battery usage");
    }

    pub fn reduce_temperature(&self) {
        self.emit(ResourceHint::ReduceTemperature);
    }

    fn emit(&self, hint: ResourceHint) {
        // No subscribers is fine
        let _ = self.hints.send(hint);
    }

    /// React to the app moving between background and foreground. Returns
    /// the sync outcome when foregrounding triggered one.
    pub async fn handle_lifecycle_event(
        self: &Arc<Self>,
        event: LifecycleEvent,
    ) -> AdaptiveSyncResult<Option<SyncOutcome>> {
        info!(?event, "Lifecycle event");
        match event {
            LifecycleEvent::EnteredBackground => {
                let shed = self.scheduler.pause_non_essential_requests();
                self.reduce_battery_usage();
                self.persist().await;
                debug!(shed, "Background transition handled");
                Ok(None)
            }
            LifecycleEvent::WillEnterForeground => {
                let evaluation = self.monitor.refresh().await;
                if self.check_health(&evaluation.report) == CoordinatorState::Degraded {
                    return Ok(None);
                }

                let stale = self
                    .snapshot
                    .read()
                    .is_stale(self.config.staleness_window(), Utc::now());
                if stale {
                    self.sync_data().await.map(Some)
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn spawn_sync(self: &Arc<Self>, reason: &'static str) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            match coordinator.sync_data().await {
                Ok(outcome) => debug!(reason, outcome = outcome.as_str(), "Background sync finished"),
                Err(e) => warn!(reason, error = %e, "Background sync failed"),
            }
        });
    }
}

impl Drop for LifecycleCoordinator {
    fn drop(&mut self) {
        if let Some(token) = self.watcher.get_mut().take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SchedulerConfig, TelemetryConfig};
    use crate::models::ResponsePayload;
    use crate::scheduler::{RetryStrategy, Transport};
    use crate::sync::store::{FileSnapshotStore, MemorySnapshotStore};
    use crate::telemetry::{RawReading, ResourceSampler};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use uuid::Uuid;

    struct KnobSampler(Arc<Mutex<f64>>);

    impl ResourceSampler for KnobSampler {
        fn sample(&mut self) -> AdaptiveSyncResult<RawReading> {
            Ok(RawReading {
                cpu_usage: Some(*self.0.lock()),
                memory_usage: Some(30.0),
                battery_drain_rate: Some(1.0),
                temperature: Some(25.0),
            })
        }
    }

    /// Remote that accepts the posted snapshot, bumps its sync date and
    /// confirms every pending operation it received
    struct EchoRemote {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
    }

    #[async_trait]
    impl Transport for EchoRemote {
        async fn execute(
            &self,
            request: &RequestDescriptor,
        ) -> AdaptiveSyncResult<ResponsePayload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(AdaptiveSyncError::transport(request.url.clone(), 500, "down"));
            }

            let body = request.body.clone().unwrap_or_default();
            let state: ApplicationStateSnapshot = serde_json::from_slice(&body)?;
            let response = SyncResponse {
                confirmed_operations: state.pending_operations.iter().map(|op| op.id).collect(),
                state: ApplicationStateSnapshot {
                    pending_operations: Vec::new(),
                    ..state
                },
            };
            Ok(ResponsePayload::new(200, serde_json::to_vec(&response)?))
        }
    }

    struct Fixture {
        coordinator: Arc<LifecycleCoordinator>,
        scheduler: Arc<RequestScheduler>,
        remote: Arc<EchoRemote>,
        store: Arc<MemorySnapshotStore>,
        cpu: Arc<Mutex<f64>>,
    }

    fn fixture(cpu: f64) -> Fixture {
        slow_fixture(cpu, Duration::ZERO)
    }

    fn slow_fixture(cpu: f64, delay: Duration) -> Fixture {
        let knob = Arc::new(Mutex::new(cpu));
        let monitor = Arc::new(ResourceMonitor::new(
            TelemetryConfig::default(),
            Box::new(KnobSampler(knob.clone())),
        ));
        let remote = Arc::new(EchoRemote {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay,
        });
        let scheduler = RequestScheduler::new(
            SchedulerConfig {
                retry_strategy: RetryStrategy::immediate(),
                ..SchedulerConfig::default()
            },
            remote.clone(),
            monitor.clone(),
            None,
        );
        scheduler.start();

        let store = Arc::new(MemorySnapshotStore::new());
        let config = SyncConfig {
            endpoint: "http://remote.test/sync".to_string(),
            sync_retry_count: 0,
            ..SyncConfig::default()
        };
        let coordinator = Arc::new(LifecycleCoordinator::new(
            config,
            scheduler.clone(),
            monitor,
            store.clone(),
        ));

        Fixture {
            coordinator,
            scheduler,
            remote,
            store,
            cpu: knob,
        }
    }

    #[tokio::test]
    async fn test_mutations_are_persisted_and_pending() {
        let f = fixture(20.0);
        f.coordinator.select_routine("r-1").await;
        f.coordinator.start_workout("w-1").await;
        f.coordinator.complete_workout("w-1").await;

        let snapshot = f.coordinator.snapshot();
        assert_eq!(snapshot.total_workouts, 1);
        assert_eq!(snapshot.streak_count, 1);
        assert_eq!(snapshot.current_workout_id, None);
        assert_eq!(snapshot.last_completed_workout_id.as_deref(), Some("w-1"));
        assert_eq!(snapshot.pending_operations.len(), 3);
        assert_eq!(f.store.stored(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_retried_on_next_mutation() {
        let f = fixture(20.0);
        f.store.set_fail_writes(true);
        f.coordinator.start_workout("w-1").await;

        assert!(f.coordinator.has_unpersisted_changes());
        assert_eq!(f.store.stored(), None);
        // In-memory state stays authoritative
        assert_eq!(
            f.coordinator.snapshot().current_workout_id.as_deref(),
            Some("w-1")
        );

        f.store.set_fail_writes(false);
        f.coordinator.select_routine("r-2").await;
        assert!(!f.coordinator.has_unpersisted_changes());
        let stored = f.store.stored().unwrap();
        assert_eq!(stored.current_workout_id.as_deref(), Some("w-1"));
        assert_eq!(stored.pending_operations.len(), 2);
    }

    #[tokio::test]
    async fn test_successful_sync_drains_confirmed_and_sets_sync_date() {
        let f = fixture(20.0);
        f.coordinator.complete_workout("w-1").await;

        let outcome = f.coordinator.sync_data().await.unwrap();
        assert!(outcome.is_synced());

        let snapshot = f.coordinator.snapshot();
        assert!(snapshot.pending_operations.is_empty());
        assert!(snapshot.last_sync_date.is_some());
        assert_eq!(snapshot.total_workouts, 1);
        assert_eq!(f.coordinator.state(), CoordinatorState::Idle);
        assert_eq!(f.store.stored(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_failed_sync_leaves_snapshot_unchanged() {
        let f = fixture(20.0);
        f.coordinator.start_workout("w-1").await;
        let before = f.coordinator.snapshot();
        f.remote.fail.store(true, Ordering::SeqCst);

        let error = f.coordinator.sync_data().await.unwrap_err();
        assert!(matches!(error, AdaptiveSyncError::SyncFailed { .. }));
        assert_eq!(f.coordinator.snapshot(), before);
        assert_eq!(f.coordinator.state(), CoordinatorState::Idle);

        // The next successful sync replays the kept operation
        f.remote.fail.store(false, Ordering::SeqCst);
        f.coordinator.sync_data().await.unwrap();
        assert!(f.coordinator.snapshot().pending_operations.is_empty());
    }

    #[tokio::test]
    async fn test_unhealthy_sync_is_deferred_without_network() {
        let f = fixture(95.0);
        f.coordinator.start_workout("w-1").await;

        let outcome = f.coordinator.sync_data().await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Deferred(_)));
        assert_eq!(f.remote.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.coordinator.state(), CoordinatorState::Degraded);
        assert_eq!(f.coordinator.snapshot().last_sync_date, None);
    }

    #[tokio::test]
    async fn test_offline_sync_is_postponed() {
        let f = fixture(20.0);
        f.coordinator.set_online(false);

        let outcome = f.coordinator.sync_data().await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Offline(_)));
        assert_eq!(f.remote.calls.load(Ordering::SeqCst), 0);

        f.coordinator.set_online(true);
        tokio::time::timeout(Duration::from_secs(2), async {
            while f.coordinator.snapshot().last_sync_date.is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(f.remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_degraded_runs_reductions_in_order_and_recovers() {
        let f = fixture(95.0);
        let mut hints = f.coordinator.subscribe_hints();

        let report = f.coordinator.monitor.sample_now();
        assert_eq!(
            f.coordinator.check_health(&report),
            CoordinatorState::Degraded
        );
        for expected in [
            ResourceHint::ReduceCpu,
            ResourceHint::ReduceMemory,
            ResourceHint::ReduceBattery,
            ResourceHint::ReduceTemperature,
        ] {
            assert_eq!(hints.recv().await.unwrap(), expected);
        }

        // Staying degraded does not repeat the reductions
        let report = f.coordinator.monitor.sample_now();
        f.coordinator.check_health(&report);
        assert!(hints.try_recv().is_err());

        *f.cpu.lock() = 40.0;
        let report = f.coordinator.monitor.sample_now();
        assert_eq!(f.coordinator.check_health(&report), CoordinatorState::Idle);
        assert_eq!(hints.recv().await.unwrap(), ResourceHint::Restore);
    }

    #[tokio::test]
    async fn test_recovery_mid_sync_returns_to_syncing() {
        let f = slow_fixture(20.0, Duration::from_millis(400));
        f.coordinator.complete_workout("w-1").await;

        let coordinator = f.coordinator.clone();
        let sync = tokio::spawn(async move { coordinator.sync_data().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.coordinator.state(), CoordinatorState::Syncing);

        *f.cpu.lock() = 95.0;
        let report = f.coordinator.monitor.sample_now();
        assert_eq!(f.coordinator.check_health(&report), CoordinatorState::Degraded);

        *f.cpu.lock() = 20.0;
        let report = f.coordinator.monitor.sample_now();
        assert_eq!(f.coordinator.check_health(&report), CoordinatorState::Syncing);
        assert_eq!(f.coordinator.state(), CoordinatorState::Syncing);

        let outcome = sync.await.unwrap().unwrap();
        assert!(outcome.is_synced());
        assert_eq!(f.coordinator.state(), CoordinatorState::Idle);
    }

    #[tokio::test]
    async fn test_background_sheds_non_essential_work() {
        let f = fixture(20.0);
        f.scheduler.pause_all_requests();
        let low = f
            .scheduler
            .enqueue(crate::models::NetworkOperation::new(
                RequestDescriptor::get("http://remote.test/feed"),
                Priority::Low,
            ))
            .unwrap();
        let high = f
            .scheduler
            .enqueue(crate::models::NetworkOperation::new(
                RequestDescriptor::get("http://remote.test/profile"),
                Priority::High,
            ))
            .unwrap();

        f.coordinator
            .handle_lifecycle_event(LifecycleEvent::EnteredBackground)
            .await
            .unwrap();

        let queued: Vec<Uuid> = f
            .scheduler
            .queued_operations()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(queued, vec![high.id()]);
        assert!(matches!(
            low.wait().await,
            Err(AdaptiveSyncError::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_foreground_syncs_only_stale_data() {
        let f = fixture(20.0);

        let outcome = f
            .coordinator
            .handle_lifecycle_event(LifecycleEvent::WillEnterForeground)
            .await
            .unwrap();
        assert!(matches!(outcome, Some(SyncOutcome::Synced(_))));

        let outcome = f
            .coordinator
            .handle_lifecycle_event(LifecycleEvent::WillEnterForeground)
            .await
            .unwrap();
        assert_eq!(outcome, None);
        assert_eq!(f.remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restore_loads_stored_snapshot() {
        let f = fixture(20.0);
        let stored = ApplicationStateSnapshot {
            streak_count: 4,
            total_workouts: 9,
            ..Default::default()
        };
        f.store.save(&stored).await.unwrap();

        assert!(f.coordinator.start().await);
        assert!(!f.coordinator.start().await);
        assert_eq!(f.coordinator.snapshot(), stored);

        f.coordinator.shutdown().await;
    }
    #[tokio::test]
    async fn test_unreadable_snapshot_is_moved_aside() {
        let f = fixture(20.0);
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileSnapshotStore::new(dir.path(), "app_state"));
        tokio::fs::write(store.path(), b"{\"pendingOperations\": [").await.unwrap();

        let coordinator = LifecycleCoordinator::new(
            SyncConfig::default(),
            f.scheduler.clone(),
            f.coordinator.monitor.clone(),
            store.clone(),
        );
        let restored = coordinator.restore().await;
        assert_eq!(restored.total_workouts, 0);
        assert!(restored.pending_operations.is_empty());
        assert_eq!(
            tokio::fs::read(store.corrupt_path()).await.unwrap(),
            b"{\"pendingOperations\": ["
        );

        coordinator.select_routine("r-3").await;
        let stored = store.load().await.unwrap().unwrap();
        assert_eq!(stored.current_routine_id.as_deref(), Some("r-3"));
        assert!(store.corrupt_path().exists());
    }
}
