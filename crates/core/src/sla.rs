//! SLA state derivation.
//!
//! The state depends on the current time, so it is recomputed on every
//! read and never stored alongside the case.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::case::{CaseStatus, Sla};
use crate::types::Timestamp;

/// Window before the deadline in which a case counts as due soon.
pub const DUE_SOON_WINDOW_HOURS: i64 = 24;

/// Derived SLA state of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlaState {
    /// No deadline, or the deadline cannot be parsed.
    None,
    /// Completed, or the case is closed/archived.
    Met,
    Overdue,
    DueSoon,
    Pending,
}

impl SlaState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Met => "met",
            Self::Overdue => "overdue",
            Self::DueSoon => "due-soon",
            Self::Pending => "pending",
        }
    }
}

/// Evaluate the SLA state of a case at instant `now`.
///
/// Rules are applied in order: no deadline, completion, resolved status,
/// unparsable deadline, then position of `now` relative to the deadline.
pub fn evaluate(sla: Option<&Sla>, status: CaseStatus, now: Timestamp) -> SlaState {
    let Some(sla) = sla else {
        return SlaState::None;
    };
    let Some(due_raw) = sla.due_at.as_deref() else {
        return SlaState::None;
    };
    if sla.completed_at.is_some() {
        return SlaState::Met;
    }
    if status.is_resolved() {
        return SlaState::Met;
    }
    let Some(due) = parse_timestamp(due_raw) else {
        return SlaState::None;
    };

    if due < now {
        SlaState::Overdue
    } else if due - now <= Duration::hours(DUE_SOON_WINDOW_HOURS) {
        SlaState::DueSoon
    } else {
        SlaState::Pending
    }
}

/// [`evaluate`] against the wall clock.
pub fn evaluate_now(sla: Option<&Sla>, status: CaseStatus) -> SlaState {
    evaluate(sla, status, Utc::now())
}

fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
