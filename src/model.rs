//! Core data model.
//!
//! A backlog entry is an encoded work item waiting for the active worker.
//! A worker moves through a small, fixed set of lifecycle states from spawn
//! to exit; it never pauses and resumes.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Backlog
// ---------------------------------------------------------------------------

/// Store-assigned sequence id of a backlog entry. Monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub i64);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A persisted, not yet processed work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogEntry {
    pub id: EntryId,
    /// Codec output. Unique across the backlog.
    pub payload: Vec<u8>,
}

/// What happened when a batch of work was pushed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    /// New backlog entries written.
    pub inserted: usize,
    /// Items skipped because an identical payload was already pending.
    pub duplicates: usize,
}

/// Snapshot of a queue's persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    /// Whether a status marker is currently held.
    pub active: bool,
    /// Number of pending backlog entries.
    pub pending: u64,
}

// ---------------------------------------------------------------------------
// Worker lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a single worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Process started, marker not yet claimed.
    Spawned,
    /// Another worker held the marker.
    LostRace,
    /// Marker claimed.
    Active,
    /// Processing the backlog.
    Draining,
    /// Backlog observed empty, marker released atomically.
    IdleRelease,
    /// Processing or storage failure, marker released unconditionally.
    ErrorRelease,
    /// The marker vanished while work was pending; stopped without it.
    MarkerLost,
    /// Storage handle closed. Terminal.
    Exited,
}

impl WorkerState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, to),
            (Spawned, Active)
                | (Spawned, LostRace)
                | (Spawned, Exited)     // setup failed before the claim
                | (LostRace, Exited)
                | (Active, Draining)
                | (Draining, IdleRelease)
                | (Draining, ErrorRelease)
                | (Draining, MarkerLost)
                | (IdleRelease, Exited)
                | (ErrorRelease, Exited)
                | (MarkerLost, Exited)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Exited)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Spawned => "spawned",
            WorkerState::LostRace => "lost_race",
            WorkerState::Active => "active",
            WorkerState::Draining => "draining",
            WorkerState::IdleRelease => "idle_release",
            WorkerState::ErrorRelease => "error_release",
            WorkerState::MarkerLost => "marker_lost",
            WorkerState::Exited => "exited",
        };
        write!(f, "{s}")
    }
}

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Another worker already held the marker. Nothing was processed.
    LostRace,
    /// The backlog drained and the marker was released.
    Drained { processed: usize },
    /// Processing failed on `entry`; the marker was released and the entry
    /// left in the backlog for the next worker.
    Released {
        processed: usize,
        entry: EntryId,
        error: String,
    },
    /// The marker was removed by someone else while work was still
    /// pending. The worker stopped without touching the rest.
    MarkerLost { processed: usize },
}

impl WorkerExit {
    /// Number of entries processed and removed by this worker.
    pub fn processed(&self) -> usize {
        match self {
            WorkerExit::LostRace => 0,
            WorkerExit::Drained { processed }
            | WorkerExit::Released { processed, .. }
            | WorkerExit::MarkerLost { processed } => *processed,
        }
    }
}
