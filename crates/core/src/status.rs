//! Job lifecycle status and the transition table.
//!
//! ```text
//! queued -> submitted -> processing -> completed
//!    \          \             \
//!     +----------+-------------+--> failed | cancelled
//!                \             \
//!                 +-------------+--> interrupted (recovery only)
//! ```
//!
//! Every terminal state has no outgoing edges, so a job can never regress
//! to an earlier phase.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a [`GenerationJob`](crate::job::GenerationJob).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Submitted,
    Processing,
    Completed,
    Failed,
    Interrupted,
    Cancelled,
}

impl JobStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Queued,
        JobStatus::Submitted,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Interrupted,
        JobStatus::Cancelled,
    ];

    /// Statuses reachable in one step from `self`.
    pub fn valid_transitions(self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            Queued => &[Submitted, Failed, Cancelled],
            Submitted => &[Processing, Failed, Cancelled, Interrupted],
            Processing => &[Completed, Failed, Cancelled, Interrupted],
            Completed | Failed | Interrupted | Cancelled => &[],
        }
    }

    /// Check whether moving from `self` to `next` is an allowed edge.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// No further transitions are possible.
    pub fn is_terminal(self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// The job holds a provider task and occupies a concurrency slot.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Submitted | JobStatus::Processing)
    }

    /// Phase ordinal. Terminal states share the highest rank.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Submitted => 1,
            JobStatus::Processing => 2,
            _ => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Submitted => "submitted",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Interrupted => "interrupted",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
