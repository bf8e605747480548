//! # Priority Request Scheduler
//!
//! Admits network operations under a priority discipline, dispatches them
//! with bounded concurrency and applies retry, timeout and cache rules.
//! Components:
//! - Pending queue ordered by priority, FIFO within a priority
//! - Admission control against the resource monitor's health signal
//! - Attempt loop with per-attempt timeouts and backoff between attempts
//! - Response cache keyed by normalized request descriptors
//! - Load shedding for non-essential work

pub mod cache;
pub mod queue;
pub mod retry;
pub mod transport;

pub use cache::{CacheStats, CachedResponse, ResponseCache};
pub use queue::{PendingQueue, QueuedOperation};
pub use retry::{AttemptPlan, RetryStrategy};
pub use transport::{HttpTransport, Transport};

use crate::config::SchedulerConfig;
use crate::error::{AdaptiveSyncError, AdaptiveSyncResult};
use crate::metrics::ServiceMetrics;
use crate::models::{
    CachePolicy, NetworkOperation, OperationStatus, Priority, RequestDescriptor, ResponsePayload,
};
use crate::telemetry::{AdmissionGate, ResourceMonitor, ResourceReport};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Admission decision returned by [`RequestScheduler::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    /// Waiting for dispatch
    Admitted,
    /// Held back until resources recover
    Deferred,
}

/// Caller's view of a submitted operation
#[derive(Debug)]
pub struct OperationHandle {
    id: Uuid,
    priority: Priority,
    outcome: EnqueueOutcome,
    receiver: oneshot::Receiver<AdaptiveSyncResult<ResponsePayload>>,
}

impl OperationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn outcome(&self) -> EnqueueOutcome {
        self.outcome
    }

    pub fn is_deferred(&self) -> bool {
        self.outcome == EnqueueOutcome::Deferred
    }

    /// Wait for the terminal result
    pub async fn wait(self) -> AdaptiveSyncResult<ResponsePayload> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(AdaptiveSyncError::cancelled(self.id)),
        }
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    /// Operations waiting for dispatch
    pub queue_depth: usize,
    /// Operations held back by admission control
    pub deferred: usize,
    /// Operations currently executing
    pub in_flight: usize,
    pub total_enqueued: u64,
    pub total_deferred: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Network attempts, retries included
    pub attempts: u64,
    pub cache: CacheStats,
    pub paused: bool,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    deferred: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    attempts: AtomicU64,
}

#[derive(Debug)]
struct InFlight {
    priority: Priority,
    cancel: CancellationToken,
    started_at: Instant,
}

pub struct RequestScheduler {
    config: SchedulerConfig,
    transport: Arc<dyn Transport>,
    monitor: Arc<ResourceMonitor>,
    queue: Mutex<PendingQueue>,
    cache: ResponseCache,
    in_flight: DashMap<Uuid, InFlight>,
    limiter: Arc<Semaphore>,
    wake: Notify,
    root: Mutex<CancellationToken>,
    background: Mutex<Option<CancellationToken>>,
    paused: AtomicBool,
    sequence: AtomicU64,
    counters: Counters,
    metrics: Option<Arc<ServiceMetrics>>,
}

impl RequestScheduler {
    /// Create a scheduler and register it with the monitor as an admission gate
    pub fn new(
        config: SchedulerConfig,
        transport: Arc<dyn Transport>,
        monitor: Arc<ResourceMonitor>,
        metrics: Option<Arc<ServiceMetrics>>,
    ) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            queue: Mutex::new(PendingQueue::new(config.max_queue_size)),
            cache: ResponseCache::new(config.cache_max_age()),
            in_flight: DashMap::new(),
            limiter: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            wake: Notify::new(),
            root: Mutex::new(CancellationToken::new()),
            background: Mutex::new(None),
            paused: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            counters: Counters::default(),
            config,
            transport,
            monitor: Arc::clone(&monitor),
            metrics,
        });

        let gate: Weak<dyn AdmissionGate> = Arc::downgrade(&scheduler) as Weak<dyn AdmissionGate>;
        monitor.register_gate(gate);
        scheduler
    }

    /// Start the dispatch loop, plus the cache purge loop when an interval is
    /// configured. Returns false when running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut background = self.background.lock();
        if background.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return false;
        }
        let token = CancellationToken::new();
        *background = Some(token.clone());
        drop(background);

        info!(
            max_concurrent = self.config.max_concurrent,
            admission_threshold = %self.config.admission_threshold,
            "Starting request scheduler"
        );

        tokio::spawn(Arc::clone(self).dispatch_loop(token.clone()));
        if let Some(period) = self.config.cache_purge_interval() {
            tokio::spawn(Arc::clone(self).purge_loop(period, token));
        }
        true
    }

    /// Stop background loops and cancel everything queued, deferred or in flight
    pub async fn stop(&self) {
        if let Some(token) = self.background.lock().take() {
            token.cancel();
        }

        let drained = self.queue.lock().drain_all();
        let count = drained.len();
        for mut entry in drained {
            entry.cancel.cancel();
            self.record_cancelled(entry.priority());
            let id = entry.id();
            entry.respond(Err(AdaptiveSyncError::cancelled(id)));
        }

        let previous = std::mem::replace(&mut *self.root.lock(), CancellationToken::new());
        previous.cancel();
        self.publish_depth();

        info!(cancelled = count, in_flight = self.in_flight.len(), "Request scheduler stopped");
    }

    /// Admit an operation. Critical and high priority are always admitted;
    /// deferrable priorities are held back while resources are unhealthy.
    pub fn enqueue(&self, operation: NetworkOperation) -> AdaptiveSyncResult<OperationHandle> {
        let id = operation.id;
        let priority = operation.priority;

        let healthy = if self.is_deferrable(priority) {
            self.monitor.get_resource_report().is_healthy()
        } else {
            true
        };

        let (responder, receiver) = oneshot::channel();
        let cancel = self.root.lock().child_token();

        let outcome = {
            let mut queue = self.queue.lock();
            if !priority.is_essential() && !queue.has_capacity() {
                warn!(operation_id = %id, %priority, "Request queue is full");
                return Err(AdaptiveSyncError::queue_full(queue.capacity()));
            }

            let entry = QueuedOperation {
                operation,
                seq: self.sequence.fetch_add(1, Ordering::SeqCst),
                enqueued_at: Instant::now(),
                cancel,
                responder: Some(responder),
            };

            if healthy {
                queue.push(entry);
                EnqueueOutcome::Admitted
            } else {
                queue.push_deferred(entry);
                EnqueueOutcome::Deferred
            }
        };

        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        match outcome {
            EnqueueOutcome::Admitted => {
                debug!(operation_id = %id, %priority, "Operation admitted");
                self.record_operation("enqueued", priority);
                self.wake.notify_one();
            }
            EnqueueOutcome::Deferred => {
                self.counters.deferred.fetch_add(1, Ordering::Relaxed);
                info!(operation_id = %id, %priority, "Operation deferred under resource pressure");
                self.record_operation("deferred", priority);
            }
        }
        self.publish_depth();

        Ok(OperationHandle {
            id,
            priority,
            outcome,
            receiver,
        })
    }

    /// Execute one request through the queue. A fresh cached response is
    /// returned without queueing or network access.
    #[instrument(skip(self, descriptor), fields(url = %descriptor.url))]
    pub async fn perform_request(
        &self,
        descriptor: RequestDescriptor,
        retry_count: u32,
        timeout: Duration,
        priority: Priority,
        use_cache: bool,
    ) -> AdaptiveSyncResult<ResponsePayload> {
        if use_cache {
            if let Some(hit) = self.cached_response(&descriptor.normalized_key()) {
                debug!("Served from cache");
                return Ok(hit);
            }
        }

        let operation = NetworkOperation::new(descriptor, priority)
            .with_retry_budget(retry_count)
            .with_timeout(timeout)
            .with_cache_policy(CachePolicy::from_flag(use_cache));

        self.enqueue(operation)?.wait().await
    }

    /// Cancel every queued, deferred or in-flight operation below `high`.
    /// Returns the number of operations cancelled.
    pub fn pause_non_essential_requests(&self) -> usize {
        let shed = self.queue.lock().drain_below(Priority::High);

        let mut interrupted = 0;
        for entry in self.in_flight.iter() {
            if !entry.priority.is_essential() && !entry.cancel.is_cancelled() {
                entry.cancel.cancel();
                interrupted += 1;
            }
        }

        let dropped = shed.len();
        for mut entry in shed {
            entry.cancel.cancel();
            self.record_cancelled(entry.priority());
            let id = entry.id();
            entry.respond(Err(AdaptiveSyncError::cancelled(id)));
        }
        self.publish_depth();

        if dropped + interrupted > 0 {
            info!(dropped, interrupted, "Paused non-essential requests");
        }
        dropped + interrupted
    }

    /// Stop dispatching; admission into the queue continues
    pub fn pause_all_requests(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("Request dispatch paused");
        }
    }

    pub fn resume_requests(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("Request dispatch resumed");
        }
        self.wake.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Cancel a single operation wherever it is
    pub fn cancel(&self, id: Uuid) -> bool {
        let removed = self.queue.lock().remove(id);
        if let Some(mut entry) = removed {
            entry.cancel.cancel();
            self.record_cancelled(entry.priority());
            entry.respond(Err(AdaptiveSyncError::cancelled(id)));
            self.publish_depth();
            debug!(operation_id = %id, "Queued operation cancelled");
            return true;
        }

        match self.in_flight.get(&id) {
            Some(running) if !running.cancel.is_cancelled() => {
                running.cancel.cancel();
                debug!(operation_id = %id, "In-flight operation cancelled");
                true
            }
            _ => false,
        }
    }

    /// True while the scheduler still holds the operation
    pub fn is_tracked(&self, id: Uuid) -> bool {
        self.queue.lock().contains(id) || self.in_flight.contains_key(&id)
    }

    /// Non-terminal status of a held operation. Resolved operations report
    /// their outcome through their handle and return `None` here.
    pub fn status(&self, id: Uuid) -> Option<OperationStatus> {
        if let Some(status) = self.queue.lock().status_of(id) {
            return Some(status);
        }
        self.in_flight
            .contains_key(&id)
            .then_some(OperationStatus::InFlight)
    }

    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.clear();
        if removed > 0 {
            info!(removed, "Response cache cleared");
        }
        removed
    }

    pub fn purge_stale_cache(&self) -> usize {
        self.cache.purge_stale()
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Ready operations in dispatch order
    pub fn queued_operations(&self) -> Vec<(Uuid, Priority)> {
        self.queue.lock().ready_order()
    }

    pub fn deferred_operations(&self) -> Vec<(Uuid, Priority)> {
        self.queue.lock().deferred_order()
    }

    pub fn stats(&self) -> SchedulerStats {
        let (queue_depth, deferred) = {
            let queue = self.queue.lock();
            (queue.len(), queue.deferred_len())
        };

        SchedulerStats {
            queue_depth,
            deferred,
            in_flight: self.in_flight.len(),
            total_enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            total_deferred: self.counters.deferred.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            cache: self.cache.stats(),
            paused: self.is_paused(),
        }
    }

    /// Point-in-time view for debugging endpoints and logs
    pub fn diagnostics(&self) -> serde_json::Value {
        let (depth_by_priority, deferred) = {
            let queue = self.queue.lock();
            let depth: serde_json::Map<String, serde_json::Value> = queue
                .depth_by_priority()
                .into_iter()
                .map(|(priority, depth)| (priority.to_string(), depth.into()))
                .collect();
            (depth, queue.deferred_order())
        };

        let in_flight: Vec<serde_json::Value> = self
            .in_flight
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "id": entry.key().to_string(),
                    "priority": entry.priority,
                    "running_ms": entry.started_at.elapsed().as_millis() as u64,
                })
            })
            .collect();

        serde_json::json!({
            "stats": self.stats(),
            "depth_by_priority": depth_by_priority,
            "deferred": deferred
                .into_iter()
                .map(|(id, priority)| serde_json::json!({ "id": id, "priority": priority }))
                .collect::<Vec<_>>(),
            "in_flight": in_flight,
            "available_permits": self.limiter.available_permits(),
        })
    }

    fn is_deferrable(&self, priority: Priority) -> bool {
        !priority.is_essential() && priority < self.config.admission_threshold
    }

    fn cached_response(&self, key: &str) -> Option<ResponsePayload> {
        let hit = self.cache.get_fresh(key);
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_lookup(hit.is_some());
        }
        hit.map(|entry| ResponsePayload {
            status: entry.status,
            body: entry.body,
            from_cache: true,
        })
    }

    /// Pop the next ready operation and mark it in flight under the queue
    /// lock, so load shedding always sees it in one of the two places.
    fn next_ready(&self) -> Option<QueuedOperation> {
        if self.is_paused() {
            return None;
        }
        let mut queue = self.queue.lock();
        let entry = queue.pop_next()?;
        self.in_flight.insert(
            entry.id(),
            InFlight {
                priority: entry.priority(),
                cancel: entry.cancel.clone(),
                started_at: Instant::now(),
            },
        );
        Some(entry)
    }

    async fn dispatch_loop(self: Arc<Self>, token: CancellationToken) {
        loop {
            let permit = tokio::select! {
                _ = token.cancelled() => break,
                permit = Arc::clone(&self.limiter).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = loop {
                if let Some(entry) = self.next_ready() {
                    break Some(entry);
                }
                tokio::select! {
                    _ = token.cancelled() => break None,
                    _ = self.wake.notified() => {}
                }
            };
            let Some(entry) = next else {
                break;
            };

            tokio::spawn(Arc::clone(&self).execute(entry, permit));
        }

        debug!("Scheduler dispatch loop stopped");
    }

    async fn purge_loop(self: Arc<Self>, period: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = self.cache.purge_stale();
                    if removed > 0 {
                        debug!(removed, "Purged stale cache entries");
                    }
                }
            }
        }
    }

    async fn execute(self: Arc<Self>, mut entry: QueuedOperation, permit: OwnedSemaphorePermit) {
        let id = entry.id();
        let priority = entry.priority();
        let started = Instant::now();

        let result = self.run_operation(&entry.operation, &entry.cancel).await;
        self.in_flight.remove(&id);
        drop(permit);

        let elapsed = started.elapsed().as_secs_f64();
        let status = match &result {
            Ok(_) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                self.record_operation("completed", priority);
                debug!(operation_id = %id, %priority, "Operation completed");
                OperationStatus::Succeeded
            }
            Err(AdaptiveSyncError::Cancelled { .. }) => {
                self.record_cancelled(priority);
                debug!(operation_id = %id, %priority, "Operation cancelled");
                OperationStatus::Cancelled
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.record_operation("failed", priority);
                warn!(operation_id = %id, %priority, error = %e, "Operation failed");
                OperationStatus::Failed
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.observe_operation_duration(priority, status.as_str(), elapsed);
        }
        self.publish_depth();

        entry.respond(result);
        // Let the dispatcher pick up more work now that a permit is free
        self.wake.notify_one();
    }

    async fn run_operation(
        &self,
        operation: &NetworkOperation,
        cancel: &CancellationToken,
    ) -> AdaptiveSyncResult<ResponsePayload> {
        let key = operation.descriptor.normalized_key();
        let use_cache = operation.cache_policy.uses_cache();

        if use_cache {
            if let Some(hit) = self.cached_response(&key) {
                return Ok(hit);
            }
        }

        let plan = AttemptPlan {
            operation_id: operation.id,
            max_attempts: operation.max_attempts(),
            timeout: operation.timeout,
            strategy: self.config.retry_strategy.clone(),
        };

        let success = retry::run_attempts(&plan, cancel, |_| {
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.record_attempt(operation.priority);
            }
            self.transport.execute(&operation.descriptor)
        })
        .await?;

        debug!(
            operation_id = %operation.id,
            attempts = success.attempts,
            "Network request succeeded"
        );

        let response = success.value;
        if use_cache {
            self.cache.store(key, response.status, response.body.clone());
        }
        Ok(response)
    }

    fn record_operation(&self, outcome: &str, priority: Priority) {
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(outcome, priority);
        }
    }

    fn record_cancelled(&self, priority: Priority) {
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        self.record_operation("cancelled", priority);
    }

    fn publish_depth(&self) {
        if let Some(metrics) = &self.metrics {
            let (ready, deferred) = {
                let queue = self.queue.lock();
                (queue.len(), queue.deferred_len())
            };
            metrics.record_queue_depth(ready, deferred, self.in_flight.len());
        }
    }
}

impl AdmissionGate for RequestScheduler {
    fn resume_deferred(&self, report: &ResourceReport) -> usize {
        if !report.is_healthy() {
            return 0;
        }

        let admitted = self.queue.lock().admit_deferred();
        if admitted > 0 {
            info!(admitted, "Admitted deferred operations");
            self.publish_depth();
            self.wake.notify_one();
        }
        admitted
    }
}
