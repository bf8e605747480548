//! # Operation Queue
//!
//! Priority queue of admitted operations plus the list of operations whose
//! admission was deferred under resource pressure. The queue itself holds no
//! lock; the scheduler owns it behind a single mutex so insert, remove and
//! drain all go through one mutation path.

use crate::error::AdaptiveSyncResult;
use crate::models::{NetworkOperation, OperationStatus, Priority, ResponsePayload};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Sender half of an operation's terminal result
pub type ResultSender = oneshot::Sender<AdaptiveSyncResult<ResponsePayload>>;

/// Ordering key: higher priority first, then earlier enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<Priority>,
    seq: u64,
}

/// An operation waiting for dispatch
#[derive(Debug)]
pub struct QueuedOperation {
    pub operation: NetworkOperation,
    /// Monotonic enqueue sequence, used for FIFO inside a priority
    pub seq: u64,
    pub enqueued_at: Instant,
    pub cancel: CancellationToken,
    pub responder: Option<ResultSender>,
}

impl QueuedOperation {
    pub fn id(&self) -> Uuid {
        self.operation.id
    }

    pub fn priority(&self) -> Priority {
        self.operation.priority
    }

    fn key(&self) -> QueueKey {
        QueueKey {
            priority: Reverse(self.operation.priority),
            seq: self.seq,
        }
    }

    /// Deliver the terminal result; a dropped handle is not an error
    pub fn respond(&mut self, result: AdaptiveSyncResult<ResponsePayload>) {
        if let Some(responder) = self.responder.take() {
            let _ = responder.send(result);
        }
    }
}

/// Admitted and deferred operations
#[derive(Debug)]
pub struct PendingQueue {
    ready: BTreeMap<QueueKey, QueuedOperation>,
    index: HashMap<Uuid, QueueKey>,
    deferred: Vec<QueuedOperation>,
    capacity: usize,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            ready: BTreeMap::new(),
            index: HashMap::new(),
            deferred: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Operations waiting for dispatch
    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Queued and deferred operations both count against capacity
    pub fn has_capacity(&self) -> bool {
        self.ready.len() + self.deferred.len() < self.capacity
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.index.contains_key(&id) || self.deferred.iter().any(|entry| entry.id() == id)
    }

    /// `Queued` or `Deferred` while held here, `None` otherwise
    pub fn status_of(&self, id: Uuid) -> Option<OperationStatus> {
        if self.index.contains_key(&id) {
            Some(OperationStatus::Queued)
        } else if self.deferred.iter().any(|entry| entry.id() == id) {
            Some(OperationStatus::Deferred)
        } else {
            None
        }
    }

    pub fn push(&mut self, entry: QueuedOperation) {
        let key = entry.key();
        self.index.insert(entry.id(), key);
        self.ready.insert(key, entry);
    }

    pub fn push_deferred(&mut self, entry: QueuedOperation) {
        self.deferred.push(entry);
    }

    /// Next operation in priority order, FIFO within a priority
    pub fn pop_next(&mut self) -> Option<QueuedOperation> {
        let (_, entry) = self.ready.pop_first()?;
        self.index.remove(&entry.id());
        Some(entry)
    }

    /// Remove one operation, queued or deferred
    pub fn remove(&mut self, id: Uuid) -> Option<QueuedOperation> {
        if let Some(key) = self.index.remove(&id) {
            return self.ready.remove(&key);
        }
        let position = self.deferred.iter().position(|entry| entry.id() == id)?;
        Some(self.deferred.remove(position))
    }

    /// Remove every queued or deferred operation strictly below `floor`.
    /// Survivors keep their relative order.
    pub fn drain_below(&mut self, floor: Priority) -> Vec<QueuedOperation> {
        let doomed: Vec<QueueKey> = self
            .ready
            .keys()
            .filter(|key| key.priority.0 < floor)
            .copied()
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for key in doomed {
            if let Some(entry) = self.ready.remove(&key) {
                self.index.remove(&entry.id());
                removed.push(entry);
            }
        }

        let (shed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|entry| entry.priority() < floor);
        self.deferred = kept;
        removed.extend(shed);
        removed
    }

    /// Move every deferred operation into the ready queue. Their original
    /// sequence numbers keep FIFO order relative to later arrivals.
    pub fn admit_deferred(&mut self) -> usize {
        let deferred = std::mem::take(&mut self.deferred);
        let count = deferred.len();
        for entry in deferred {
            self.push(entry);
        }
        count
    }

    /// Remove everything, queued and deferred
    pub fn drain_all(&mut self) -> Vec<QueuedOperation> {
        self.index.clear();
        let mut all: Vec<QueuedOperation> = std::mem::take(&mut self.ready).into_values().collect();
        all.append(&mut self.deferred);
        all
    }

    /// Ready operations in dispatch order
    pub fn ready_order(&self) -> Vec<(Uuid, Priority)> {
        self.ready
            .values()
            .map(|entry| (entry.id(), entry.priority()))
            .collect()
    }

    /// Deferred operations in arrival order
    pub fn deferred_order(&self) -> Vec<(Uuid, Priority)> {
        self.deferred
            .iter()
            .map(|entry| (entry.id(), entry.priority()))
            .collect()
    }

    /// Count of ready operations per priority
    pub fn depth_by_priority(&self) -> HashMap<Priority, usize> {
        let mut depth = HashMap::new();
        for key in self.ready.keys() {
            *depth.entry(key.priority.0).or_insert(0) += 1;
        }
        depth
    }
}
