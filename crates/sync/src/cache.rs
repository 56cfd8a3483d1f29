//! Two-tier case cache.
//!
//! The list tier holds the summary rows of the current filter; the detail
//! tier holds at most one hydrated case, the selected one. The tiers may
//! briefly disagree (an old status in the list until the next refresh),
//! but the detail tier never holds data for a case other than the
//! selected one.
//!
//! The cache applies whatever it is given. Deciding *whether* a response
//! is still current (request tokens) and what to select when the selected
//! case disappears is the controller's job.

use casehub_core::case::{Case, ListEntry, ListEntryPatch};
use casehub_core::sla::SlaState;
use casehub_core::types::{CaseId, Timestamp};

/// Summary rows for the active filter.
#[derive(Debug, Clone, Default)]
pub struct ListTier {
    pub items: Vec<ListEntry>,
    pub total: u64,
    pub loading: bool,
    /// Last refresh failure. Items from the previous success stay visible.
    pub error: Option<String>,
}

/// Why the detail tier has no fresh data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailError {
    /// The backend has no such case. Terminal for this id.
    NotFound,
    /// The fetch failed; previously hydrated data, if any, stays visible.
    Failed(String),
}

/// The selected case and its hydrated record.
#[derive(Debug, Clone, Default)]
pub struct DetailTier {
    pub case_id: Option<CaseId>,
    pub data: Option<Case>,
    pub loading: bool,
    pub error: Option<DetailError>,
}

/// Outcome of [`CaseCache::replace_list`] for the current selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionCheck {
    /// The selected case is still in the list.
    Retained,
    /// The selected case is no longer in the list.
    Missing,
    /// Nothing was selected.
    Unselected,
}

#[derive(Debug, Clone, Default)]
pub struct CaseCache {
    list: ListTier,
    detail: DetailTier,
}

impl CaseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> &ListTier {
        &self.list
    }

    pub fn detail(&self) -> &DetailTier {
        &self.detail
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.detail.case_id.as_deref()
    }

    pub fn entry(&self, case_id: &str) -> Option<&ListEntry> {
        self.list.items.iter().find(|e| e.id == case_id)
    }

    /// List rows paired with their SLA state at `now`.
    pub fn list_with_sla(&self, now: Timestamp) -> Vec<(&ListEntry, SlaState)> {
        self.list
            .items
            .iter()
            .map(|e| (e, e.sla_state(now)))
            .collect()
    }

    /// First row of the list, the fallback when the selection disappears.
    pub fn fallback_candidate(&self) -> Option<CaseId> {
        self.list.items.first().map(|e| e.id.clone())
    }

    // ---- list tier ----

    pub fn begin_list_load(&mut self) {
        self.list.loading = true;
    }

    /// Replace the list with an authoritative result.
    ///
    /// Optimistic patches on the old rows are discarded.
    pub fn replace_list(&mut self, items: Vec<ListEntry>, total: u64) -> SelectionCheck {
        self.list.items = items;
        self.list.total = total;
        self.list.loading = false;
        self.list.error = None;

        match self.selected_id() {
            None => SelectionCheck::Unselected,
            Some(id) if self.entry(id).is_some() => SelectionCheck::Retained,
            Some(_) => SelectionCheck::Missing,
        }
    }

    /// Record a failed refresh without dropping the rows already shown.
    pub fn fail_list(&mut self, message: impl Into<String>) {
        self.list.loading = false;
        self.list.error = Some(message.into());
    }

    /// Optimistically patch one row. Returns `false` if the row is absent.
    pub fn patch_list_entry(&mut self, case_id: &str, patch: &ListEntryPatch) -> bool {
        match self.list.items.iter_mut().find(|e| e.id == case_id) {
            Some(entry) => {
                patch.apply_to(entry);
                true
            }
            None => false,
        }
    }

    // ---- detail tier ----

    /// Change the selected case. Returns `true` if the selection changed.
    ///
    /// Detail data for the previous case is dropped immediately.
    pub fn select(&mut self, case_id: Option<CaseId>) -> bool {
        if self.detail.case_id == case_id {
            return false;
        }
        self.detail = DetailTier {
            loading: case_id.is_some(),
            case_id,
            data: None,
            error: None,
        };
        true
    }

    pub fn begin_detail_load(&mut self) {
        if self.detail.case_id.is_some() {
            self.detail.loading = true;
        }
    }

    /// Hydrate the detail tier if `case_id` is still the selected case.
    ///
    /// Hydration marks the case read, so the row's unread count drops to
    /// zero. Status, assignee and SLA of the row are owned by list
    /// responses; a detail fetch may predate the current list and must not
    /// write them.
    pub fn set_detail(&mut self, case_id: &str, mut data: Case) -> bool {
        if self.selected_id() != Some(case_id) || data.id() != case_id {
            return false;
        }
        data.hydrate();

        let patch = ListEntryPatch {
            unread_count: Some(0),
            ..Default::default()
        };
        self.patch_list_entry(case_id, &patch);

        self.detail.data = Some(data);
        self.detail.loading = false;
        self.detail.error = None;
        true
    }

    /// Record a failed detail fetch for `case_id` if it is still selected.
    ///
    /// `NotFound` clears the data (empty state); other failures keep it.
    pub fn fail_detail(&mut self, case_id: &str, error: DetailError) -> bool {
        if self.selected_id() != Some(case_id) {
            return false;
        }
        if error == DetailError::NotFound {
            self.detail.data = None;
        }
        self.detail.loading = false;
        self.detail.error = Some(error);
        true
    }

    /// Drop both tiers, e.g. when switching guilds.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
