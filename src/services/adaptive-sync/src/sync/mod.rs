//! Application state ownership, persistence and remote reconciliation

pub mod coordinator;
pub mod snapshot;
pub mod store;

pub use coordinator::{
    CoordinatorState, LifecycleCoordinator, LifecycleEvent, ResourceHint, SyncOutcome,
};
pub use snapshot::{ApplicationStateSnapshot, PendingOperation, SyncResponse};
pub use store::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
