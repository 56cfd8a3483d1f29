//! Event type names pushed over the case event stream.
//!
//! The server wraps every change notification in a `{type, payload}`
//! envelope; these are the `type` values the inbox reacts to.

/// Bulk change to the case list (new case, reorder, unread counts).
pub const CASES_UPDATED: &str = "cases:updated";

/// A case changed status.
pub const CASE_STATUS: &str = "case:status";

/// A case was assigned or unassigned.
pub const CASE_ASSIGNMENT: &str = "case:assignment";

/// A case SLA deadline was set, edited or completed.
pub const CASE_SLA: &str = "case:sla";

/// A message was appended to a case conversation.
pub const CASE_MESSAGE: &str = "case:message";

/// Event types that invalidate the whole list tier.
pub const LIST_INVALIDATING: &[&str] = &[CASES_UPDATED, CASE_STATUS, CASE_ASSIGNMENT, CASE_SLA];
