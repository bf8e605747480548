//! Durable application state and its reconciliation with the remote copy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

/// A locally recorded mutation not yet confirmed by the remote store.
///
/// `id` is the idempotency key: merges deduplicate by it and the remote side
/// is expected to apply each id at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub id: Uuid,
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl PendingOperation {
    pub fn new<S: Into<String>>(kind: S, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload,
            recorded_at: Utc::now(),
        }
    }
}

/// The state record persisted locally and reconciled on sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStateSnapshot {
    pub last_active_date: DateTime<Utc>,
    #[serde(default)]
    pub current_workout_id: Option<String>,
    #[serde(default)]
    pub last_completed_workout_id: Option<String>,
    #[serde(default)]
    pub streak_count: u32,
    #[serde(default)]
    pub total_workouts: u32,
    #[serde(default)]
    pub current_routine_id: Option<String>,
    #[serde(default)]
    pub last_sync_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pending_operations: Vec<PendingOperation>,
}

impl Default for ApplicationStateSnapshot {
    fn default() -> Self {
        Self {
            last_active_date: Utc::now(),
            current_workout_id: None,
            last_completed_workout_id: None,
            streak_count: 0,
            total_workouts: 0,
            current_routine_id: None,
            last_sync_date: None,
            pending_operations: Vec::new(),
        }
    }
}

/// Body returned by the remote sync endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub state: ApplicationStateSnapshot,
    #[serde(default)]
    pub confirmed_operations: Vec<Uuid>,
}

impl ApplicationStateSnapshot {
    /// True when the snapshot never synced or last synced more than
    /// `window` before `now`.
    pub fn is_stale(&self, window: Duration, now: DateTime<Utc>) -> bool {
        match self.last_sync_date {
            None => true,
            // A sync date in the future counts as fresh
            Some(last) => match now.signed_duration_since(last).to_std() {
                Ok(elapsed) => elapsed > window,
                Err(_) => false,
            },
        }
    }

    /// Recency used for last-writer-wins: the sync date first (never synced
    /// is oldest), then the last activity date.
    fn recency_cmp(&self, other: &Self) -> Ordering {
        self.last_sync_date
            .cmp(&other.last_sync_date)
            .then(self.last_active_date.cmp(&other.last_active_date))
    }

    /// Reconcile with a remote snapshot.
    ///
    /// Scalars come from whichever side is more recent; on a full tie the
    /// local values stay. Pending operations are the union of both sides,
    /// deduplicated by id in local-then-remote order, minus every id in
    /// `confirmed`.
    pub fn merge_remote(&self, remote: &Self, confirmed: &[Uuid]) -> Self {
        let winner = if remote.recency_cmp(self) == Ordering::Greater {
            remote
        } else {
            self
        };

        let confirmed: HashSet<Uuid> = confirmed.iter().copied().collect();
        let mut seen = HashSet::new();
        let pending_operations = self
            .pending_operations
            .iter()
            .chain(remote.pending_operations.iter())
            .filter(|op| !confirmed.contains(&op.id) && seen.insert(op.id))
            .cloned()
            .collect();

        Self {
            last_active_date: winner.last_active_date,
            current_workout_id: winner.current_workout_id.clone(),
            last_completed_workout_id: winner.last_completed_workout_id.clone(),
            streak_count: winner.streak_count,
            total_workouts: winner.total_workouts,
            current_routine_id: winner.current_routine_id.clone(),
            last_sync_date: winner.last_sync_date,
            pending_operations,
        }
    }

    /// Count a completed workout. The streak grows when the previous
    /// completion was the day before, holds on the same day and restarts
    /// after a gap.
    pub fn complete_workout(&mut self, workout_id: &str, now: DateTime<Utc>) {
        let days_since = (now.date_naive() - self.last_active_date.date_naive()).num_days();
        self.streak_count = match days_since {
            0 if self.total_workouts > 0 => self.streak_count.max(1),
            1 => self.streak_count.saturating_add(1),
            _ => 1,
        };
        self.total_workouts = self.total_workouts.saturating_add(1);
        self.last_completed_workout_id = Some(workout_id.to_string());
        if self.current_workout_id.as_deref() == Some(workout_id) {
            self.current_workout_id = None;
        }
        self.last_active_date = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn local_snapshot() -> ApplicationStateSnapshot {
        ApplicationStateSnapshot {
            last_active_date: at(10, 9),
            current_workout_id: Some("w-7".to_string()),
            last_completed_workout_id: Some("w-6".to_string()),
            streak_count: 5,
            total_workouts: 10,
            current_routine_id: Some("r-1".to_string()),
            last_sync_date: Some(at(9, 12)),
            pending_operations: Vec::new(),
        }
    }

    #[test]
    fn test_later_remote_wins_and_confirmed_are_drained() {
        let confirmed_op = PendingOperation::new("complete_workout", json!({"workoutId": "w-6"}));
        let open_op = PendingOperation::new("select_routine", json!({"routineId": "r-1"}));

        let mut local = local_snapshot();
        local.pending_operations = vec![confirmed_op.clone(), open_op.clone()];

        let remote = ApplicationStateSnapshot {
            total_workouts: 12,
            streak_count: 6,
            last_sync_date: Some(at(10, 12)),
            pending_operations: Vec::new(),
            ..local_snapshot()
        };

        let merged = local.merge_remote(&remote, &[confirmed_op.id]);

        assert_eq!(merged.total_workouts, 12);
        assert_eq!(merged.streak_count, 6);
        assert_eq!(merged.last_sync_date, Some(at(10, 12)));
        assert_eq!(merged.pending_operations, vec![open_op]);
    }

    #[test]
    fn test_older_remote_keeps_local_scalars() {
        let local = local_snapshot();
        let remote = ApplicationStateSnapshot {
            total_workouts: 3,
            last_sync_date: Some(at(1, 0)),
            ..local_snapshot()
        };

        let merged = local.merge_remote(&remote, &[]);
        assert_eq!(merged.total_workouts, 10);
    }

    #[test]
    fn test_sync_date_tie_falls_back_to_activity_date() {
        let local = local_snapshot();
        let remote = ApplicationStateSnapshot {
            last_active_date: at(11, 9),
            current_routine_id: None,
            ..local_snapshot()
        };
        assert_eq!(local.merge_remote(&remote, &[]).current_routine_id, None);

        // Full tie keeps local
        let twin = ApplicationStateSnapshot {
            total_workouts: 99,
            ..local_snapshot()
        };
        assert_eq!(local.merge_remote(&twin, &[]).total_workouts, 10);
    }

    #[test]
    fn test_never_synced_is_oldest() {
        let mut local = local_snapshot();
        local.last_sync_date = None;
        local.last_active_date = at(20, 0);

        let remote = ApplicationStateSnapshot {
            total_workouts: 4,
            last_active_date: at(1, 0),
            ..local_snapshot()
        };
        assert_eq!(local.merge_remote(&remote, &[]).total_workouts, 4);
    }

    #[test]
    fn test_pending_union_deduplicates_by_id() {
        let shared = PendingOperation::new("start_workout", json!({"workoutId": "w-7"}));
        let local_only = PendingOperation::new("select_routine", json!({}));
        let remote_only = PendingOperation::new("complete_workout", json!({}));

        let mut local = local_snapshot();
        local.pending_operations = vec![shared.clone(), local_only.clone()];
        let mut remote = local_snapshot();
        remote.pending_operations = vec![remote_only.clone(), shared.clone()];

        let merged = local.merge_remote(&remote, &[]);
        assert_eq!(
            merged.pending_operations,
            vec![shared, local_only, remote_only]
        );
    }

    #[test]
    fn test_staleness() {
        let mut snapshot = local_snapshot();
        let window = Duration::from_secs(15 * 60);

        snapshot.last_sync_date = None;
        assert!(snapshot.is_stale(window, at(10, 0)));

        snapshot.last_sync_date = Some(at(10, 0));
        assert!(!snapshot.is_stale(window, at(10, 0) + ChronoDuration::minutes(15)));
        assert!(snapshot.is_stale(window, at(10, 0) + ChronoDuration::minutes(16)));
    }

    #[test]
    fn test_streak_progression() {
        let mut snapshot = ApplicationStateSnapshot {
            last_active_date: at(1, 8),
            ..Default::default()
        };

        snapshot.complete_workout("w-1", at(1, 9));
        assert_eq!((snapshot.streak_count, snapshot.total_workouts), (1, 1));

        snapshot.complete_workout("w-2", at(1, 18));
        assert_eq!((snapshot.streak_count, snapshot.total_workouts), (1, 2));

        snapshot.complete_workout("w-3", at(2, 7));
        assert_eq!(snapshot.streak_count, 2);

        snapshot.complete_workout("w-4", at(5, 7));
        assert_eq!(snapshot.streak_count, 1);
        assert_eq!(snapshot.total_workouts, 4);
        assert_eq!(snapshot.last_completed_workout_id.as_deref(), Some("w-4"));
    }

    #[test]
    fn test_counters_saturate_on_remote_extremes() {
        let remote = ApplicationStateSnapshot {
            last_active_date: at(11, 8),
            streak_count: u32::MAX,
            total_workouts: u32::MAX,
            last_sync_date: Some(at(11, 9)),
            ..Default::default()
        };
        let mut merged = local_snapshot().merge_remote(&remote, &[]);
        assert_eq!(merged.total_workouts, u32::MAX);

        merged.complete_workout("w-9", at(12, 8));
        assert_eq!(merged.streak_count, u32::MAX);
        assert_eq!(merged.total_workouts, u32::MAX);
        assert_eq!(merged.last_completed_workout_id.as_deref(), Some("w-9"));
    }

    #[test]
    fn test_serialized_field_names_round_trip_absent_values() {
        let snapshot = ApplicationStateSnapshot {
            current_workout_id: None,
            last_sync_date: None,
            ..local_snapshot()
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value.get("lastActiveDate").is_some());
        assert!(value.get("currentWorkoutId").unwrap().is_null());
        assert!(value.get("pendingOperations").unwrap().is_array());

        let back: ApplicationStateSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);

        // Older records without the optional fields still load
        let minimal: ApplicationStateSnapshot =
            serde_json::from_value(json!({"lastActiveDate": "2024-03-10T09:00:00Z"})).unwrap();
        assert_eq!(minimal.total_workouts, 0);
        assert!(minimal.pending_operations.is_empty());
    }
}
