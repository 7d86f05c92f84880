//! Pending-commit and audit record model.
//!
//! A `PendingCommit` is the local record of an open rollback window on one
//! router. The device enforces the window; the deadline kept here is what
//! this side believes and is used for reporting only.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::CommitState;

// ---------------------------------------------------------------------------
// PendingCommit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommit {
    pub router: String,
    pub hostname: String,
    pub digest: String,
    pub applied_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub rollback_minutes: u32,
    pub state: CommitState,
}

impl PendingCommit {
    pub fn new(
        router: impl Into<String>,
        hostname: impl Into<String>,
        digest: impl Into<String>,
        applied_at: DateTime<Utc>,
        rollback_minutes: u32,
        state: CommitState,
    ) -> Self {
        Self {
            router: router.into(),
            hostname: hostname.into(),
            digest: digest.into(),
            applied_at,
            deadline: applied_at + Duration::minutes(i64::from(rollback_minutes)),
            rollback_minutes,
            state,
        }
    }

    pub fn deadline_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }

    /// Past the deadline by more than `margin`: nobody has looked at this
    /// entry for long enough that it must go to an operator.
    pub fn is_stale(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now > self.deadline + margin
    }

    /// State as seen at `now`: a `pending` entry whose window has closed
    /// has, as far as we can tell, been rolled back by the device.
    pub fn effective_state(&self, now: DateTime<Utc>) -> CommitState {
        match self.state {
            CommitState::Pending if self.deadline_elapsed(now) => CommitState::RolledBack,
            other => other,
        }
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.deadline - now).max(Duration::zero())
    }
}

// ---------------------------------------------------------------------------
// AuditRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    /// Commit confirmed was acknowledged; window open.
    Applied,
    /// Commit may or may not have been applied.
    ApplyUnknown,
    Confirmed,
    /// Confirmation acknowledgement lost.
    ConfirmUnknown,
    /// Window closed without confirmation; the device reverted.
    RolledBack,
    /// Entry exceeded its deadline by more than the stale margin.
    StalePurged,
    /// An `unknown` entry was replaced by a new apply.
    Superseded,
}

impl AuditEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEvent::Applied => "applied",
            AuditEvent::ApplyUnknown => "apply_unknown",
            AuditEvent::Confirmed => "confirmed",
            AuditEvent::ConfirmUnknown => "confirm_unknown",
            AuditEvent::RolledBack => "rolled_back",
            AuditEvent::StalePurged => "stale_purged",
            AuditEvent::Superseded => "superseded",
        }
    }
}

impl std::fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub router: String,
    pub at: DateTime<Utc>,
    pub event: AuditEvent,
    /// Commit state after the event.
    pub state: CommitState,
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuditRecord {
    pub fn new(
        commit: &PendingCommit,
        event: AuditEvent,
        state: CommitState,
        at: DateTime<Utc>,
        message: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            router: commit.router.clone(),
            at,
            event,
            state,
            digest: commit.digest.clone(),
            message,
        }
    }
}
