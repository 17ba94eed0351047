//! Worker assignments attached to confirmed bookings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    pub enum AssignmentStatus {
        Assigned => "assigned",
        Accepted => "accepted",
        Rejected => "rejected",
        InProgress => "in_progress",
        Completed => "completed",
    }
}

string_enum! {
    /// Worker-initiated transitions.
    pub enum AssignmentAction {
        Accept => "accept",
        Reject => "reject",
        Start => "start",
        Complete => "complete",
    }
}

impl AssignmentStatus {
    /// Statuses that still oblige the worker to the booking.
    pub const ACTIVE: &'static [AssignmentStatus] = &[
        AssignmentStatus::Assigned,
        AssignmentStatus::Accepted,
        AssignmentStatus::InProgress,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, AssignmentStatus::Rejected | AssignmentStatus::Completed)
    }

    /// Target status of `action`, or `None` when the action is illegal here.
    pub fn apply(&self, action: AssignmentAction) -> Option<AssignmentStatus> {
        use AssignmentAction::*;
        use AssignmentStatus::*;

        match (self, action) {
            (Assigned, Accept) => Some(Accepted),
            (Assigned, Reject) => Some(Rejected),
            (Accepted, Start) => Some(InProgress),
            (InProgress, Complete) => Some(Completed),
            _ => None,
        }
    }

    /// The action that leads from `self` to `target`, walking forward only.
    pub fn action_towards(&self, target: AssignmentStatus) -> Option<AssignmentAction> {
        AssignmentAction::ALL
            .iter()
            .copied()
            .find(|action| self.apply(*action) == Some(target))
    }
}

/// Free-text notes recorded at each worker action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentNotes {
    pub assign: Option<String>,
    pub accept: Option<String>,
    pub reject: Option<String>,
    pub start: Option<String>,
    pub complete: Option<String>,
}

/// Evidence captured when a job is marked complete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionDetails {
    #[serde(default)]
    pub materials_used: Vec<String>,
    #[serde(default)]
    pub photos: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerAssignment {
    pub id: i64,
    pub booking_id: i64,
    pub worker_id: i64,
    pub assigned_by: i64,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: AssignmentNotes,
    pub rejection_reason: Option<String>,
    pub completion: Option<CompletionDetails>,
}

impl WorkerAssignment {
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}
