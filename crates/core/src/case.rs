//! Case records as served by the backend.
//!
//! A [`ListEntry`] is the summary row shown in the inbox list. A [`Case`]
//! is the fully hydrated detail: the same summary plus the message and
//! moderation-action history.

use serde::{Deserialize, Serialize};

use crate::sla::{self, SlaState};
use crate::types::{CaseId, GuildId, Timestamp};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Lifecycle status of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaseStatus {
    Open,
    PendingResponse,
    Escalated,
    Closed,
    Archived,
}

impl CaseStatus {
    /// Wire name, e.g. `"pending-response"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::PendingResponse => "pending-response",
            Self::Escalated => "escalated",
            Self::Closed => "closed",
            Self::Archived => "archived",
        }
    }

    /// Closed and archived cases no longer accrue SLA time.
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Closed | Self::Archived)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaseCategory {
    Moderation,
    Ticket,
}

// ---------------------------------------------------------------------------
// Nested records
// ---------------------------------------------------------------------------

/// Staff member a case is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    pub id: String,
    pub tag: String,
}

/// Service-level deadline attached to a case.
///
/// Timestamps stay as raw strings: an unparsable `due_at` is a valid
/// input that evaluates to [`SlaState::None`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sla {
    #[serde(default)]
    pub due_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

/// One message in a case conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseMessage {
    pub id: String,
    pub author_id: String,
    pub author_tag: String,
    pub content: String,
    /// Staff-only note, not relayed to the member.
    #[serde(default)]
    pub internal: bool,
    pub created_at: Timestamp,
}

/// A moderation action recorded against a case (warn, timeout, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseActionRecord {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub actor_tag: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub created_at: Timestamp,
}

// ---------------------------------------------------------------------------
// ListEntry
// ---------------------------------------------------------------------------

/// Summary projection of a case, held in the list tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntry {
    pub id: CaseId,
    pub guild_id: GuildId,
    pub status: CaseStatus,
    pub category: CaseCategory,
    pub subject: String,
    pub user_id: String,
    pub user_tag: String,
    #[serde(default)]
    pub assignee: Option<Assignee>,
    #[serde(default)]
    pub sla: Option<Sla>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub last_message_at: Option<Timestamp>,
    #[serde(default)]
    pub unread_count: u32,
}

impl ListEntry {
    pub fn is_unassigned(&self) -> bool {
        self.assignee.is_none()
    }

    /// SLA state as of `now`. Recomputed on every call.
    pub fn sla_state(&self, now: Timestamp) -> SlaState {
        sla::evaluate(self.sla.as_ref(), self.status, now)
    }
}

/// Partial update applied optimistically to a list entry.
///
/// `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListEntryPatch {
    pub status: Option<CaseStatus>,
    pub assignee: Option<Option<Assignee>>,
    pub sla: Option<Option<Sla>>,
    pub unread_count: Option<u32>,
}

impl ListEntryPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.assignee.is_none()
            && self.sla.is_none()
            && self.unread_count.is_none()
    }

    /// Write every present field into `entry`.
    pub fn apply_to(&self, entry: &mut ListEntry) {
        if let Some(status) = self.status {
            entry.status = status;
        }
        if let Some(assignee) = &self.assignee {
            entry.assignee = assignee.clone();
        }
        if let Some(sla) = &self.sla {
            entry.sla = sla.clone();
        }
        if let Some(unread) = self.unread_count {
            entry.unread_count = unread;
        }
    }
}

// ---------------------------------------------------------------------------
// Case
// ---------------------------------------------------------------------------

/// Fully hydrated case returned by `GET /cases/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    #[serde(flatten)]
    pub entry: ListEntry,
    #[serde(default)]
    pub messages: Vec<CaseMessage>,
    #[serde(default)]
    pub actions: Vec<CaseActionRecord>,
}

impl Case {
    pub fn id(&self) -> &str {
        &self.entry.id
    }

    /// Mark the case as read and put its history in chronological order.
    ///
    /// Called exactly once when the detail is hydrated into the cache.
    pub fn hydrate(&mut self) {
        self.entry.unread_count = 0;
        self.messages.sort_by_key(|m| m.created_at);
        self.actions.sort_by_key(|a| a.created_at);
    }
}

/// Response body of `GET /cases`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseListResponse {
    pub items: Vec<ListEntry>,
    pub total: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry() -> ListEntry {
        ListEntry {
            id: "c1".into(),
            guild_id: "g1".into(),
            status: CaseStatus::Open,
            category: CaseCategory::Ticket,
            subject: "Appeal".into(),
            user_id: "u1".into(),
            user_tag: "member#0001".into(),
            assignee: Some(Assignee {
                id: "s1".into(),
                tag: "staff#0001".into(),
            }),
            sla: None,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            last_message_at: None,
            unread_count: 4,
        }
    }

    #[test]
    fn status_uses_kebab_case_on_the_wire() {
        let json = serde_json::to_string(&CaseStatus::PendingResponse).unwrap();
        assert_eq!(json, r#""pending-response""#);
        assert_eq!(CaseStatus::PendingResponse.as_str(), "pending-response");
    }

    #[test]
    fn resolved_statuses() {
        assert!(CaseStatus::Closed.is_resolved());
        assert!(CaseStatus::Archived.is_resolved());
        assert!(!CaseStatus::Escalated.is_resolved());
    }

    #[test]
    fn patch_clears_assignee_and_keeps_other_fields() {
        let mut e = entry();
        let patch = ListEntryPatch {
            assignee: Some(None),
            ..Default::default()
        };
        patch.apply_to(&mut e);
        assert!(e.is_unassigned());
        assert_eq!(e.status, CaseStatus::Open);
        assert_eq!(e.unread_count, 4);
    }

    #[test]
    fn empty_patch_is_noop() {
        let mut e = entry();
        let before = e.clone();
        let patch = ListEntryPatch::default();
        assert!(patch.is_empty());
        patch.apply_to(&mut e);
        assert_eq!(e, before);
    }

    #[test]
    fn case_detail_deserializes_flattened_summary() {
        let json = r#"{
            "id": "c9", "guildId": "g1", "status": "escalated", "category": "moderation",
            "subject": "Spam", "userId": "u2", "userTag": "spam#1",
            "assignee": null, "sla": {"dueAt": "2026-02-01T00:00:00Z"},
            "createdAt": "2026-01-01T00:00:00Z", "updatedAt": "2026-01-02T00:00:00Z",
            "unreadCount": 2,
            "messages": [
                {"id": "m2", "authorId": "u2", "authorTag": "spam#1", "content": "b", "createdAt": "2026-01-02T00:00:00Z"},
                {"id": "m1", "authorId": "u2", "authorTag": "spam#1", "content": "a", "createdAt": "2026-01-01T00:00:00Z"}
            ]
        }"#;
        let mut case: Case = serde_json::from_str(json).unwrap();
        assert_eq!(case.id(), "c9");
        assert_eq!(case.entry.status, CaseStatus::Escalated);
        assert!(case.entry.is_unassigned());
        assert!(case.actions.is_empty());

        case.hydrate();
        assert_eq!(case.entry.unread_count, 0);
        assert_eq!(case.messages[0].id, "m1");
        assert_eq!(case.messages[1].id, "m2");
    }
}
