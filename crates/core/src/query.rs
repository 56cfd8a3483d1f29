//! Inbox filter state and its canonical list query (`GET /cases`).
//!
//! The same [`CaseFilters`] always yields the same [`CaseQuery`], byte for
//! byte, so refetches are idempotent and queries can be compared directly.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Assignee filter value meaning "cases assigned to the current user".
pub const ASSIGNEE_ME: &str = "me";

/// Catch-all filter value; equivalent to leaving the key unset.
pub const FILTER_ALL: &str = "all";

// ---------------------------------------------------------------------------
// CaseFilters
// ---------------------------------------------------------------------------

/// Filter state of the inbox list view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseFilters {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub sla: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub mine: bool,
}

impl CaseFilters {
    /// Fold `assignee = "me"` into the `mine` flag so the backend sees a
    /// single ownership signal.
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        if out.assignee.as_deref().map(str::trim) == Some(ASSIGNEE_ME) {
            out.assignee = None;
            out.mine = true;
        }
        out
    }

    /// Overwrite the keys `preset` specifies; everything else is kept.
    pub fn apply_preset(&mut self, preset: &FilterPreset) {
        let overwrite = |slot: &mut Option<String>, value: &Option<String>| {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        };
        overwrite(&mut self.status, &preset.status);
        overwrite(&mut self.category, &preset.category);
        overwrite(&mut self.assignee, &preset.assignee);
        overwrite(&mut self.sla, &preset.sla);
        overwrite(&mut self.search, &preset.search);
        overwrite(&mut self.sort_by, &preset.sort_by);
        overwrite(&mut self.direction, &preset.direction);
        if let Some(mine) = preset.mine {
            self.mine = mine;
        }
    }
}

// ---------------------------------------------------------------------------
// FilterPreset
// ---------------------------------------------------------------------------

/// A saved set of filter values. Absent keys leave the current filter alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterPreset {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub sla: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub mine: Option<bool>,
}

/// Presets offered by the inbox out of the box.
pub fn builtin_presets() -> Vec<FilterPreset> {
    vec![
        FilterPreset {
            name: "mine".into(),
            assignee: Some(ASSIGNEE_ME.into()),
            ..Default::default()
        },
        FilterPreset {
            name: "overdue".into(),
            status: Some("active".into()),
            sla: Some("overdue".into()),
            sort_by: Some("sla".into()),
            direction: Some("asc".into()),
            ..Default::default()
        },
        FilterPreset {
            name: "escalated".into(),
            status: Some("escalated".into()),
            ..Default::default()
        },
    ]
}

/// Look up a builtin preset by name.
pub fn builtin_preset(name: &str) -> Result<FilterPreset, CoreError> {
    builtin_presets()
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| CoreError::UnknownPreset(name.to_string()))
}

// ---------------------------------------------------------------------------
// CaseQuery
// ---------------------------------------------------------------------------

/// Canonical list query: ordered key/value pairs, no empty values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseQuery {
    pairs: Vec<(&'static str, String)>,
}

impl CaseQuery {
    pub fn pairs(&self) -> &[(&'static str, String)] {
        &self.pairs
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Percent-encoded `key=value&...` form, in canonical key order.
    pub fn to_query_string(&self) -> String {
        let mut ser = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &self.pairs {
            ser.append_pair(k, v);
        }
        ser.finish()
    }
}

/// Build the canonical query for `filters`.
///
/// Keys are emitted in a fixed order. Unset, blank and `"all"` values are
/// omitted; `mine` appears only when true.
pub fn build(filters: &CaseFilters) -> CaseQuery {
    let f = filters.normalized();
    let mut pairs = Vec::new();

    let mut push = |key: &'static str, value: &Option<String>| {
        if let Some(v) = value.as_deref().map(str::trim) {
            if !v.is_empty() && v != FILTER_ALL {
                pairs.push((key, v.to_string()));
            }
        }
    };
    push("status", &f.status);
    push("category", &f.category);
    push("assignee", &f.assignee);
    push("sla", &f.sla);
    push("sortBy", &f.sort_by);
    push("direction", &f.direction);
    push("search", &f.search);

    if f.mine {
        pairs.push(("mine", "true".to_string()));
    }

    CaseQuery { pairs }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(status: &str, assignee: &str) -> CaseFilters {
        CaseFilters {
            status: Some(status.into()),
            assignee: Some(assignee.into()),
            ..Default::default()
        }
    }

    #[test]
    fn assignee_me_becomes_mine_flag() {
        let q = build(&filters("active", "me"));
        assert_eq!(q.get("mine"), Some("true"));
        assert_eq!(q.get("assignee"), None);
        assert!(!q.to_query_string().contains("assignee=me"));
        assert_eq!(q.to_query_string(), "status=active&mine=true");
    }

    #[test]
    fn same_state_yields_identical_bytes() {
        let f = CaseFilters {
            status: Some("open".into()),
            search: Some("  spam bot ".into()),
            sort_by: Some("updatedAt".into()),
            direction: Some("desc".into()),
            ..Default::default()
        };
        let a = build(&f).to_query_string();
        let b = build(&f.clone()).to_query_string();
        assert_eq!(a, b);
        assert_eq!(a, "status=open&sortBy=updatedAt&direction=desc&search=spam+bot");
    }

    #[test]
    fn explicit_assignee_is_passed_through() {
        let q = build(&filters("open", "12345"));
        assert_eq!(q.get("assignee"), Some("12345"));
        assert_eq!(q.get("mine"), None);
    }

    #[test]
    fn blank_and_all_values_are_omitted() {
        let f = CaseFilters {
            status: Some(FILTER_ALL.into()),
            category: Some("   ".into()),
            ..Default::default()
        };
        assert!(build(&f).pairs().is_empty());
        assert_eq!(build(&f).to_query_string(), "");
    }

    #[test]
    fn preset_overwrites_only_present_keys() {
        let mut f = CaseFilters {
            status: Some("open".into()),
            category: Some("ticket".into()),
            search: Some("refund".into()),
            ..Default::default()
        };
        let preset = FilterPreset {
            name: "urgent".into(),
            status: Some("escalated".into()),
            sla: Some("overdue".into()),
            ..Default::default()
        };
        f.apply_preset(&preset);
        assert_eq!(f.status.as_deref(), Some("escalated"));
        assert_eq!(f.sla.as_deref(), Some("overdue"));
        assert_eq!(f.category.as_deref(), Some("ticket"));
        assert_eq!(f.search.as_deref(), Some("refund"));
        assert!(!f.mine);
    }

    #[test]
    fn mine_preset_normalizes_in_query() {
        let mut f = CaseFilters::default();
        f.apply_preset(&builtin_preset("mine").unwrap());
        assert_eq!(build(&f).to_query_string(), "mine=true");
    }

    #[test]
    fn unknown_builtin_preset_is_an_error() {
        assert_eq!(
            builtin_preset("nonexistent"),
            Err(CoreError::UnknownPreset("nonexistent".into()))
        );
    }
}
