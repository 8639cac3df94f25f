use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique job identifier.
///
/// Ids are generated client-side as UUIDv7, so they sort by creation time
/// and can be handed out before the insert commits (bulk enqueues rely on
/// this). The hyphenated string form preserves the ordering, which is what
/// the stores persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Enqueued,
    Dequeued,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Enqueued => "enqueued",
            JobStatus::Dequeued => "dequeued",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled records are never claimed again. A failed
    /// record is not terminal: it rests until its `delayed` gate passes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job as persisted in the store and returned by dequeue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique id, sortable by creation time.
    pub id: JobId,

    /// Handler selector.
    pub name: String,

    /// Params supplied at enqueue. Opaque to the queue.
    pub params: Value,

    /// Current lifecycle state.
    pub status: JobStatus,

    /// Set at insert, never mutated.
    pub created: DateTime<Utc>,

    /// Earliest instant the job becomes claimable. Set at enqueue
    /// (now + delay) and again at fail (now + retry delay).
    pub delayed: DateTime<Utc>,

    /// Set at each claim, overwritten on every re-claim.
    pub started: Option<DateTime<Utc>>,

    /// Set whenever an attempt concludes, successful or not. For a failed
    /// record this is the end of the last attempt, not a terminal marker.
    pub ended: Option<DateTime<Utc>>,

    /// Number of successful claims. Handlers that want "cancel after N
    /// attempts" check this and call cancel themselves.
    pub attempts: u32,

    /// Result submitted at completion.
    pub result: Option<Value>,

    /// Error from the last failed attempt.
    pub error: Option<String>,

    /// Reason submitted at cancellation.
    pub reason: Option<String>,
}

impl JobRecord {
    /// Build a fresh record in the enqueued state.
    ///
    /// Panics on an empty name: a job that no handler can ever be
    /// registered for is a bug at the call site, not a runtime condition.
    pub fn new(name: impl Into<String>, params: Value, delay: std::time::Duration) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "job name must not be empty");

        let now = Utc::now();
        Self {
            id: JobId::new(),
            name,
            params,
            status: JobStatus::Enqueued,
            created: now,
            delayed: now + chrono::Duration::from_std(delay).unwrap_or_default(),
            started: None,
            ended: None,
            attempts: 0,
            result: None,
            error: None,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_sort_by_creation() {
        let a = JobId::new();
        let b = JobId::new();
        assert!(a < b);
        // The string form must preserve the ordering, it is what stores sort on.
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn id_round_trips_through_string() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Enqueued.is_terminal());
        assert!(!JobStatus::Dequeued.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
    }

    #[test]
    fn new_record_is_enqueued() {
        let record = JobRecord::new("adder", serde_json::json!({"a": 1}), std::time::Duration::ZERO);
        assert_eq!(record.status, JobStatus::Enqueued);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.created, record.delayed);
        assert!(record.started.is_none());
        assert!(record.ended.is_none());
    }

    #[test]
    fn delay_pushes_the_gate() {
        let delay = std::time::Duration::from_secs(30);
        let record = JobRecord::new("adder", Value::Null, delay);
        assert!(record.delayed > record.created);
    }

    #[test]
    #[should_panic(expected = "job name must not be empty")]
    fn empty_name_panics() {
        JobRecord::new("", Value::Null, std::time::Duration::ZERO);
    }
}
