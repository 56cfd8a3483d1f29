//! Case mutations: validation, submission and per-action state.
//!
//! Every mutation goes through the same steps. It is validated before any
//! request is sent, submitted on a spawned task, and on success the list
//! row is patched, the case detail is refetched and a list refresh is
//! requested. A failure only sets the action's inline error; cached data
//! is left exactly as it was. A 401 parks the mutation behind a session
//! refresh and resends it once; only a failed refresh or a second 401
//! fails the action.

use std::collections::HashMap;
use std::sync::Arc;

use casehub_core::case::{Assignee, CaseStatus, ListEntryPatch, Sla};
use casehub_core::error::CoreError;
use casehub_core::types::{CaseId, GuildId, Timestamp};
use serde_json::json;

use crate::api::{ApiError, CaseBackend};
use crate::controller::{Completion, SyncController};

/// Longest reply accepted by the bot (Discord message limit).
pub const MAX_REPLY_LEN: usize = 2000;

/// Longest member timeout Discord allows, in minutes (28 days).
pub const MAX_TIMEOUT_MINUTES: u32 = 40_320;

// ---------------------------------------------------------------------------
// Action types
// ---------------------------------------------------------------------------

/// Scope of an action's inline state and error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Status,
    Assignee,
    Sla,
    Reply,
    Moderation,
}

/// Quick moderation actions against the case's member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationKind {
    Warn,
    Timeout { minutes: u32 },
    Kick,
    Ban,
}

impl ModerationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Timeout { .. } => "timeout",
            Self::Kick => "kick",
            Self::Ban => "ban",
        }
    }
}

/// A user-triggered change to one case.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseAction {
    ChangeStatus(CaseStatus),
    /// `None` unassigns the case.
    SetAssignee(Option<Assignee>),
    /// `None` removes the deadline.
    EditSla { due_at: Option<Timestamp> },
    Reply { content: String, internal: bool },
    Moderate { kind: ModerationKind, reason: String },
}

impl CaseAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::ChangeStatus(_) => ActionKind::Status,
            Self::SetAssignee(_) => ActionKind::Assignee,
            Self::EditSla { .. } => ActionKind::Sla,
            Self::Reply { .. } => ActionKind::Reply,
            Self::Moderate { .. } => ActionKind::Moderation,
        }
    }
}

/// A validated action bound to its guild and case.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseMutation {
    pub guild_id: GuildId,
    pub case_id: CaseId,
    pub action: CaseAction,
}

impl CaseMutation {
    /// Path segment under `/cases/{id}/`.
    pub fn endpoint(&self) -> &'static str {
        match self.action {
            CaseAction::ChangeStatus(_) => "status",
            CaseAction::SetAssignee(_) => "assignee",
            CaseAction::EditSla { .. } => "sla",
            CaseAction::Reply { .. } => "messages",
            CaseAction::Moderate { .. } => "actions",
        }
    }

    /// JSON request body.
    pub fn body(&self) -> serde_json::Value {
        let guild_id = &self.guild_id;
        match &self.action {
            CaseAction::ChangeStatus(status) => json!({
                "guildId": guild_id,
                "status": status,
            }),
            CaseAction::SetAssignee(assignee) => json!({
                "guildId": guild_id,
                "assignee": assignee,
            }),
            CaseAction::EditSla { due_at } => json!({
                "guildId": guild_id,
                "dueAt": due_at.map(|d| d.to_rfc3339()),
            }),
            CaseAction::Reply { content, internal } => json!({
                "guildId": guild_id,
                "content": content.trim(),
                "internal": internal,
            }),
            CaseAction::Moderate { kind, reason } => {
                let mut body = json!({
                    "guildId": guild_id,
                    "action": kind.as_str(),
                    "reason": reason.trim(),
                });
                if let ModerationKind::Timeout { minutes } = kind {
                    body["durationMinutes"] = json!(minutes);
                }
                body
            }
        }
    }

    /// Row patch applied once the backend has accepted the mutation.
    pub fn optimistic_patch(&self) -> ListEntryPatch {
        match &self.action {
            CaseAction::ChangeStatus(status) => ListEntryPatch {
                status: Some(*status),
                ..Default::default()
            },
            CaseAction::SetAssignee(assignee) => ListEntryPatch {
                assignee: Some(assignee.clone()),
                ..Default::default()
            },
            CaseAction::EditSla { due_at } => ListEntryPatch {
                sla: Some(due_at.map(|d| Sla {
                    due_at: Some(d.to_rfc3339()),
                    completed_at: None,
                })),
                ..Default::default()
            },
            CaseAction::Reply { .. } | CaseAction::Moderate { .. } => ListEntryPatch::default(),
        }
    }
}

/// Check an action before anything is sent.
pub fn validate(
    guild_id: Option<&str>,
    case_id: Option<&str>,
    action: CaseAction,
) -> Result<CaseMutation, CoreError> {
    let guild_id = guild_id
        .filter(|g| !g.trim().is_empty())
        .ok_or_else(|| CoreError::Validation("No active guild".to_string()))?;
    let case_id = case_id
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| CoreError::Validation("No case selected".to_string()))?;

    match &action {
        CaseAction::Reply { content, .. } => {
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return Err(CoreError::Validation("Reply must not be empty".to_string()));
            }
            if trimmed.chars().count() > MAX_REPLY_LEN {
                return Err(CoreError::Validation(format!(
                    "Reply too long: {} chars (max {MAX_REPLY_LEN})",
                    trimmed.chars().count()
                )));
            }
        }
        CaseAction::SetAssignee(Some(assignee)) if assignee.id.trim().is_empty() => {
            return Err(CoreError::Validation("Assignee id must not be empty".to_string()));
        }
        CaseAction::Moderate { kind, reason } => {
            if reason.trim().is_empty() {
                return Err(CoreError::Validation(format!(
                    "A reason is required to {}",
                    kind.as_str()
                )));
            }
            if let ModerationKind::Timeout { minutes } = kind {
                if *minutes == 0 || *minutes > MAX_TIMEOUT_MINUTES {
                    return Err(CoreError::Validation(format!(
                        "Timeout must be between 1 and {MAX_TIMEOUT_MINUTES} minutes, got {minutes}"
                    )));
                }
            }
        }
        _ => {}
    }

    Ok(CaseMutation {
        guild_id: guild_id.to_string(),
        case_id: case_id.to_string(),
        action,
    })
}

// ---------------------------------------------------------------------------
// Action state
// ---------------------------------------------------------------------------

/// Inline state of one action kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ActionState {
    #[default]
    Idle,
    Submitting,
    Failed(String),
}

/// Per-kind action state, so a failed reply does not mark a status
/// change as failed.
#[derive(Debug, Default)]
pub struct ActionTracker {
    states: HashMap<ActionKind, ActionState>,
}

impl ActionTracker {
    pub fn state(&self, kind: ActionKind) -> ActionState {
        self.states.get(&kind).cloned().unwrap_or_default()
    }

    pub fn is_submitting(&self, kind: ActionKind) -> bool {
        self.states.get(&kind) == Some(&ActionState::Submitting)
    }

    fn set(&mut self, kind: ActionKind, state: ActionState) {
        if state == ActionState::Idle {
            self.states.remove(&kind);
        } else {
            self.states.insert(kind, state);
        }
    }
}

/// Draft of the reply being composed for the selected case.
#[derive(Debug, Clone, Default)]
pub struct ReplyComposer {
    draft: String,
    internal: bool,
}

impl ReplyComposer {
    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn set_internal(&mut self, internal: bool) {
        self.internal = internal;
    }

    fn clear(&mut self) {
        self.draft.clear();
    }
}

/// Errors returned synchronously when an action cannot be submitted.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error("A {0:?} action is already being submitted")]
    Busy(ActionKind),
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

impl<B: CaseBackend> SyncController<B> {
    pub fn action_state(&self, kind: ActionKind) -> ActionState {
        self.actions.state(kind)
    }

    pub fn composer(&self) -> &ReplyComposer {
        &self.composer
    }

    pub fn composer_mut(&mut self) -> &mut ReplyComposer {
        &mut self.composer
    }

    /// Submit an action against the selected case.
    pub fn submit_action(&mut self, action: CaseAction) -> Result<(), ActionError> {
        let case_id = self.cache.selected_id().map(str::to_owned);
        self.submit_action_for(case_id.as_deref(), action)
    }

    /// Submit an action against any case of the active guild, e.g. a
    /// quick action from a list row.
    pub fn submit_action_for(
        &mut self,
        case_id: Option<&str>,
        action: CaseAction,
    ) -> Result<(), ActionError> {
        let kind = action.kind();
        if self.actions.is_submitting(kind) {
            return Err(ActionError::Busy(kind));
        }
        let mutation = validate(self.guild_id.as_deref(), case_id, action)?;

        tracing::info!(
            guild_id = %mutation.guild_id,
            case_id = %mutation.case_id,
            endpoint = mutation.endpoint(),
            "Submitting case action",
        );
        self.actions.set(kind, ActionState::Submitting);
        self.dispatch_mutation(mutation, false);
        Ok(())
    }

    fn dispatch_mutation(&mut self, mutation: CaseMutation, after_refresh: bool) {
        let backend = Arc::clone(&self.backend);
        self.spawn(async move {
            let result = backend.submit(&mutation).await;
            Completion::Action {
                mutation,
                result,
                after_refresh,
            }
        });
    }

    /// Resend mutations parked on a 401 once the session is refreshed.
    /// Their actions stay `Submitting` throughout.
    pub(crate) fn resubmit_after_refresh(&mut self, mutations: Vec<CaseMutation>) {
        for mutation in mutations {
            tracing::info!(case_id = %mutation.case_id, endpoint = mutation.endpoint(), "Resubmitting case action");
            self.dispatch_mutation(mutation, true);
        }
    }

    pub(crate) fn fail_after_refresh(&mut self, mutations: Vec<CaseMutation>, error: &ApiError) {
        for mutation in mutations {
            self.actions
                .set(mutation.action.kind(), ActionState::Failed(error.to_string()));
        }
    }

    pub fn change_status(&mut self, status: CaseStatus) -> Result<(), ActionError> {
        self.submit_action(CaseAction::ChangeStatus(status))
    }

    pub fn assign(&mut self, assignee: Assignee) -> Result<(), ActionError> {
        self.submit_action(CaseAction::SetAssignee(Some(assignee)))
    }

    pub fn unassign(&mut self) -> Result<(), ActionError> {
        self.submit_action(CaseAction::SetAssignee(None))
    }

    pub fn edit_sla(&mut self, due_at: Option<Timestamp>) -> Result<(), ActionError> {
        self.submit_action(CaseAction::EditSla { due_at })
    }

    pub fn moderate(&mut self, kind: ModerationKind, reason: impl Into<String>) -> Result<(), ActionError> {
        self.submit_action(CaseAction::Moderate {
            kind,
            reason: reason.into(),
        })
    }

    /// Send the composer's draft to the selected case.
    ///
    /// The draft is cleared as soon as the request is issued and is not
    /// restored if the send fails. A draft rejected by validation is kept.
    pub fn send_reply(&mut self) -> Result<(), ActionError> {
        let action = CaseAction::Reply {
            content: self.composer.draft().to_string(),
            internal: self.composer.is_internal(),
        };
        self.submit_action(action)?;
        self.composer.clear();
        Ok(())
    }

    pub(crate) fn apply_action_result(
        &mut self,
        mutation: CaseMutation,
        result: Result<(), ApiError>,
        after_refresh: bool,
    ) {
        let kind = mutation.action.kind();
        match result {
            Err(ApiError::Unauthorized) if !after_refresh => {
                tracing::info!(
                    case_id = %mutation.case_id,
                    endpoint = mutation.endpoint(),
                    "Case action rejected the session, retrying after refresh",
                );
                self.retry_mutations.push(mutation);
                self.begin_session_refresh();
            }
            Ok(()) => {
                tracing::info!(
                    case_id = %mutation.case_id,
                    endpoint = mutation.endpoint(),
                    "Case action accepted",
                );
                self.actions.set(kind, ActionState::Idle);

                if self.guild_id.as_deref() != Some(mutation.guild_id.as_str()) {
                    return;
                }
                let patch = mutation.optimistic_patch();
                if !patch.is_empty() {
                    self.cache.patch_list_entry(&mutation.case_id, &patch);
                }
                if self.cache.selected_id() == Some(mutation.case_id.as_str()) {
                    self.refresh_detail();
                }
                self.refresh_list();
            }
            Err(e) => {
                tracing::error!(
                    case_id = %mutation.case_id,
                    endpoint = mutation.endpoint(),
                    error = %e,
                    "Case action failed",
                );
                self.actions.set(kind, ActionState::Failed(e.to_string()));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};

    fn reply(content: &str) -> CaseAction {
        CaseAction::Reply {
            content: content.into(),
            internal: false,
        }
    }

    #[test]
    fn missing_guild_is_rejected() {
        assert_matches!(
            validate(None, Some("c1"), CaseAction::ChangeStatus(CaseStatus::Closed)),
            Err(CoreError::Validation(msg)) if msg.contains("guild")
        );
    }

    #[test]
    fn missing_case_is_rejected() {
        assert_matches!(
            validate(Some("g1"), None, CaseAction::SetAssignee(None)),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn whitespace_reply_is_rejected() {
        assert_matches!(
            validate(Some("g1"), Some("c1"), reply("  \n\t ")),
            Err(CoreError::Validation(msg)) if msg.contains("empty")
        );
    }

    #[test]
    fn overlong_reply_is_rejected() {
        let long = "x".repeat(MAX_REPLY_LEN + 1);
        assert!(validate(Some("g1"), Some("c1"), reply(&long)).is_err());
    }

    #[test]
    fn reply_body_is_trimmed() {
        let m = validate(Some("g1"), Some("c1"), reply("  thanks  ")).unwrap();
        assert_eq!(m.endpoint(), "messages");
        assert_eq!(m.body()["content"], "thanks");
        assert_eq!(m.body()["guildId"], "g1");
        assert!(m.optimistic_patch().is_empty());
    }

    #[test]
    fn timeout_bounds() {
        let action = |minutes| CaseAction::Moderate {
            kind: ModerationKind::Timeout { minutes },
            reason: "spam".into(),
        };
        assert!(validate(Some("g1"), Some("c1"), action(0)).is_err());
        assert!(validate(Some("g1"), Some("c1"), action(MAX_TIMEOUT_MINUTES + 1)).is_err());
        let m = validate(Some("g1"), Some("c1"), action(60)).unwrap();
        assert_eq!(m.endpoint(), "actions");
        assert_eq!(m.body()["action"], "timeout");
        assert_eq!(m.body()["durationMinutes"], 60);
    }

    #[test]
    fn moderation_requires_reason() {
        let action = CaseAction::Moderate {
            kind: ModerationKind::Ban,
            reason: " ".into(),
        };
        assert_matches!(
            validate(Some("g1"), Some("c1"), action),
            Err(CoreError::Validation(msg)) if msg.contains("ban")
        );
    }

    #[test]
    fn status_mutation_patches_status() {
        let m = validate(Some("g1"), Some("c1"), CaseAction::ChangeStatus(CaseStatus::PendingResponse)).unwrap();
        assert_eq!(m.endpoint(), "status");
        assert_eq!(m.body()["status"], "pending-response");
        assert_eq!(m.optimistic_patch().status, Some(CaseStatus::PendingResponse));
    }

    #[test]
    fn unassign_sends_null_and_clears_row() {
        let m = validate(Some("g1"), Some("c1"), CaseAction::SetAssignee(None)).unwrap();
        assert!(m.body()["assignee"].is_null());
        assert_eq!(m.optimistic_patch().assignee, Some(None));
    }

    #[test]
    fn sla_edit_serializes_deadline() {
        let due = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let m = validate(Some("g1"), Some("c1"), CaseAction::EditSla { due_at: Some(due) }).unwrap();
        assert_eq!(m.body()["dueAt"], due.to_rfc3339());
        let patch = m.optimistic_patch();
        assert_eq!(
            patch.sla,
            Some(Some(Sla {
                due_at: Some(due.to_rfc3339()),
                completed_at: None
            }))
        );
    }

    #[test]
    fn tracker_defaults_to_idle() {
        let mut tracker = ActionTracker::default();
        assert_eq!(tracker.state(ActionKind::Reply), ActionState::Idle);
        tracker.set(ActionKind::Reply, ActionState::Failed("500".into()));
        assert_eq!(tracker.state(ActionKind::Reply), ActionState::Failed("500".into()));
        assert_eq!(tracker.state(ActionKind::Status), ActionState::Idle);
        tracker.set(ActionKind::Reply, ActionState::Idle);
        assert!(!tracker.is_submitting(ActionKind::Reply));
    }
}
