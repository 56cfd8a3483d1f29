//! Synchronization controller.
//!
//! [`SyncController`] is the single owner of the [`CaseCache`]. It turns
//! stream updates into scoped refetches through an explicit dispatch
//! table, runs every network call on a spawned task, and applies the
//! results back on its own task in arrival order.
//!
//! Responses can arrive out of order. Every list or detail fetch carries
//! a token from [`RequestTokens`]; a response is applied only if its token
//! is still the latest issued for its slot. Detail responses must also
//! match the selected case id. Switching guild, filters or selection
//! issues a new token, which logically cancels whatever was in flight.

use std::future::Future;
use std::sync::Arc;

use casehub_core::case::{Case, CaseListResponse};
use casehub_core::event_types::{CASES_UPDATED, CASE_ASSIGNMENT, CASE_MESSAGE, CASE_SLA, CASE_STATUS};
use casehub_core::query::{self, CaseFilters, CaseQuery, FilterPreset};
use casehub_core::types::{CaseId, GuildId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::actions::{ActionTracker, CaseMutation, ReplyComposer};
use crate::api::{ApiError, CaseBackend};
use crate::cache::{CaseCache, DetailError, DetailTier, ListTier, SelectionCheck};
use crate::messages::{EventEnvelope, GuildRef};
use crate::reconnect::ConnectionState;
use crate::stream::StreamUpdate;

// ---------------------------------------------------------------------------
// Request tokens
// ---------------------------------------------------------------------------

/// Cache slot a fetch writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    List,
    Detail,
}

/// Monotonic per-slot request counters.
#[derive(Debug, Default)]
pub struct RequestTokens {
    list: u64,
    detail: u64,
}

impl RequestTokens {
    /// Issue the next token for `slot`, superseding all earlier ones.
    pub fn issue(&mut self, slot: Slot) -> u64 {
        let counter = match slot {
            Slot::List => &mut self.list,
            Slot::Detail => &mut self.detail,
        };
        *counter += 1;
        *counter
    }

    pub fn is_current(&self, slot: Slot, token: u64) -> bool {
        let latest = match slot {
            Slot::List => self.list,
            Slot::Detail => self.detail,
        };
        token == latest
    }
}

// ---------------------------------------------------------------------------
// Dispatch table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    List,
    SelectedDetail,
}

const ROUTES: &[(&str, Route)] = &[
    (CASES_UPDATED, Route::List),
    (CASE_STATUS, Route::List),
    (CASE_ASSIGNMENT, Route::List),
    (CASE_SLA, Route::List),
    (CASE_MESSAGE, Route::SelectedDetail),
];

/// What an event asks the controller to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    RefetchList,
    RefetchDetail(CaseId),
    Ignore(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoActiveGuild,
    ForeignGuild,
    /// `guildId` present but not a string.
    InvalidGuild,
    UnknownType,
    /// A message event for a case other than the selected one.
    NotSelected,
}

/// Route one envelope.
///
/// Events carrying a `guildId` other than `active_guild`, or a `guildId`
/// that is not a string, are ignored before the table is consulted.
/// Events without a `guildId` are accepted for the active guild.
pub fn route(envelope: &EventEnvelope, active_guild: Option<&str>, selected: Option<&str>) -> Dispatch {
    let Some(active) = active_guild else {
        return Dispatch::Ignore(IgnoreReason::NoActiveGuild);
    };
    match envelope.guild() {
        GuildRef::Absent => {}
        GuildRef::Id(guild) if guild == active => {}
        GuildRef::Id(_) => return Dispatch::Ignore(IgnoreReason::ForeignGuild),
        GuildRef::Invalid => return Dispatch::Ignore(IgnoreReason::InvalidGuild),
    }

    let route = ROUTES
        .iter()
        .find(|(event_type, _)| *event_type == envelope.event_type)
        .map(|(_, route)| *route);

    match route {
        Some(Route::List) => Dispatch::RefetchList,
        Some(Route::SelectedDetail) => match (envelope.case_id(), selected) {
            (Some(case_id), Some(selected)) if case_id == selected => {
                Dispatch::RefetchDetail(case_id.to_string())
            }
            _ => Dispatch::Ignore(IgnoreReason::NotSelected),
        },
        None => Dispatch::Ignore(IgnoreReason::UnknownType),
    }
}

// ---------------------------------------------------------------------------
// Completions
// ---------------------------------------------------------------------------

/// Whether a response was written into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Discarded,
}

/// Result of a spawned network call, delivered back to the controller.
pub(crate) enum Completion {
    List {
        token: u64,
        result: Result<CaseListResponse, ApiError>,
    },
    Detail {
        token: u64,
        case_id: CaseId,
        result: Result<Case, ApiError>,
    },
    Action {
        mutation: CaseMutation,
        result: Result<(), ApiError>,
        /// Already resent once after a session refresh.
        after_refresh: bool,
    },
    Session {
        result: Result<(), ApiError>,
    },
}

// ---------------------------------------------------------------------------
// SyncController
// ---------------------------------------------------------------------------

/// Behavior switches for [`SyncController`].
#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    /// Refetch the list and the selected detail after every reconnect.
    ///
    /// The event stream has no resume cursor, so events sent while
    /// disconnected are lost; this backfills them.
    pub resync_on_reconnect: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            resync_on_reconnect: true,
        }
    }
}

/// Owner of the case cache and the request-token scheme.
///
/// All methods that issue requests spawn Tokio tasks and must be called
/// from within a runtime.
pub struct SyncController<B> {
    pub(crate) backend: Arc<B>,
    pub(crate) cache: CaseCache,
    pub(crate) guild_id: Option<GuildId>,
    pub(crate) actions: ActionTracker,
    pub(crate) composer: ReplyComposer,
    /// Mutations waiting for the session refresh to finish.
    pub(crate) retry_mutations: Vec<CaseMutation>,
    filters: CaseFilters,
    tokens: RequestTokens,
    options: ControllerOptions,
    connection: ConnectionState,
    ever_connected: bool,
    auth_error: Option<String>,
    refreshing_session: bool,
    retry_after_refresh: Vec<Slot>,
    in_flight: usize,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
}

impl<B: CaseBackend> SyncController<B> {
    pub fn new(backend: Arc<B>, options: ControllerOptions) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            cache: CaseCache::new(),
            guild_id: None,
            actions: ActionTracker::default(),
            composer: ReplyComposer::default(),
            retry_mutations: Vec::new(),
            filters: CaseFilters::default(),
            tokens: RequestTokens::default(),
            options,
            connection: ConnectionState::Disconnected,
            ever_connected: false,
            auth_error: None,
            refreshing_session: false,
            retry_after_refresh: Vec::new(),
            in_flight: 0,
            completion_tx,
            completion_rx,
        }
    }

    // ---- read accessors ----

    pub fn cache(&self) -> &CaseCache {
        &self.cache
    }

    pub fn list(&self) -> &ListTier {
        self.cache.list()
    }

    pub fn detail(&self) -> &DetailTier {
        self.cache.detail()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn guild_id(&self) -> Option<&str> {
        self.guild_id.as_deref()
    }

    pub fn filters(&self) -> &CaseFilters {
        &self.filters
    }

    /// Query the next list refresh will send.
    pub fn query(&self) -> CaseQuery {
        query::build(&self.filters)
    }

    /// Set when the session was rejected and could not be refreshed.
    pub fn auth_error(&self) -> Option<&str> {
        self.auth_error.as_deref()
    }

    /// Number of spawned requests whose results have not been applied.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    // ---- context changes ----

    /// Switch the active guild. Clears both tiers and invalidates every
    /// in-flight fetch for the previous guild.
    pub fn set_guild(&mut self, guild_id: Option<GuildId>) {
        if self.guild_id == guild_id {
            return;
        }
        tracing::info!(guild_id = ?guild_id, "Switching active guild");
        self.guild_id = guild_id;
        self.cache.clear();
        self.tokens.issue(Slot::List);
        self.tokens.issue(Slot::Detail);
        self.refresh_list();
    }

    /// Replace the filter state and refetch the list.
    pub fn set_filters(&mut self, filters: CaseFilters) {
        if self.filters == filters {
            return;
        }
        self.filters = filters;
        self.refresh_list();
    }

    /// Overlay a saved preset on the current filters.
    pub fn apply_preset(&mut self, preset: &FilterPreset) {
        let mut filters = self.filters.clone();
        filters.apply_preset(preset);
        self.set_filters(filters);
    }

    /// Select a case (or none) and hydrate its detail.
    pub fn select_case(&mut self, case_id: Option<CaseId>) {
        if !self.cache.select(case_id) {
            return;
        }
        if self.cache.selected_id().is_some() {
            self.refresh_detail();
        } else {
            self.tokens.issue(Slot::Detail);
        }
    }

    // ---- fetches ----

    /// Refetch the list for the active guild and filters.
    pub fn refresh_list(&mut self) {
        let Some(guild_id) = self.guild_id.clone() else {
            tracing::debug!("No active guild, skipping list refresh");
            return;
        };
        let token = self.tokens.issue(Slot::List);
        let query = query::build(&self.filters);
        self.cache.begin_list_load();

        tracing::debug!(
            guild_id = %guild_id,
            token,
            query = %query.to_query_string(),
            "Refreshing case list",
        );

        let backend = Arc::clone(&self.backend);
        self.spawn(async move {
            let result = backend.list_cases(&guild_id, &query).await;
            Completion::List { token, result }
        });
    }

    /// Refetch the selected case's detail.
    pub fn refresh_detail(&mut self) {
        let (Some(guild_id), Some(case_id)) = (
            self.guild_id.clone(),
            self.cache.selected_id().map(str::to_owned),
        ) else {
            return;
        };
        let token = self.tokens.issue(Slot::Detail);
        self.cache.begin_detail_load();

        tracing::debug!(guild_id = %guild_id, case_id = %case_id, token, "Refreshing case detail");

        let backend = Arc::clone(&self.backend);
        self.spawn(async move {
            let result = backend.get_case(&guild_id, &case_id).await;
            Completion::Detail {
                token,
                case_id,
                result,
            }
        });
    }

    // ---- response application ----

    /// Apply a list response if `token` is still the latest list token.
    ///
    /// When the selected case is gone from the new list (or nothing is
    /// selected), the first row becomes the selection, or none if the
    /// list is empty.
    pub fn apply_list_response(
        &mut self,
        token: u64,
        result: Result<CaseListResponse, ApiError>,
    ) -> ApplyOutcome {
        if !self.tokens.is_current(Slot::List, token) {
            tracing::debug!(token, "Discarding stale list response");
            return ApplyOutcome::Discarded;
        }

        match result {
            Ok(response) => {
                let check = self.cache.replace_list(response.items, response.total);
                if check != SelectionCheck::Retained {
                    let fallback = self.cache.fallback_candidate();
                    if check == SelectionCheck::Missing {
                        tracing::info!(
                            previous = ?self.cache.selected_id(),
                            fallback = ?fallback,
                            "Selected case left the list",
                        );
                    }
                    self.select_case(fallback);
                }
            }
            Err(ApiError::Unauthorized) => self.refresh_session(Slot::List),
            Err(e) => {
                tracing::error!(error = %e, "Case list refresh failed");
                self.cache.fail_list(e.to_string());
            }
        }
        ApplyOutcome::Applied
    }

    /// Apply a detail response if `token` is still the latest detail token
    /// and `case_id` is still selected.
    pub fn apply_detail_response(
        &mut self,
        token: u64,
        case_id: &str,
        result: Result<Case, ApiError>,
    ) -> ApplyOutcome {
        if !self.tokens.is_current(Slot::Detail, token) || self.cache.selected_id() != Some(case_id) {
            tracing::debug!(token, case_id, "Discarding stale detail response");
            return ApplyOutcome::Discarded;
        }

        match result {
            Ok(case) => {
                if !self.cache.set_detail(case_id, case) {
                    tracing::warn!(case_id, "Detail response did not match the requested case");
                    return ApplyOutcome::Discarded;
                }
            }
            Err(ApiError::NotFound) => {
                tracing::warn!(case_id, "Selected case not found");
                self.cache.fail_detail(case_id, DetailError::NotFound);
            }
            Err(ApiError::Unauthorized) => self.refresh_session(Slot::Detail),
            Err(e) => {
                tracing::error!(case_id, error = %e, "Case detail refresh failed");
                self.cache.fail_detail(case_id, DetailError::Failed(e.to_string()));
            }
        }
        ApplyOutcome::Applied
    }

    fn apply_completion(&mut self, completion: Completion) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match completion {
            Completion::List { token, result } => {
                self.apply_list_response(token, result);
            }
            Completion::Detail {
                token,
                case_id,
                result,
            } => {
                self.apply_detail_response(token, &case_id, result);
            }
            Completion::Action {
                mutation,
                result,
                after_refresh,
            } => self.apply_action_result(mutation, result, after_refresh),
            Completion::Session { result } => self.apply_session_refresh(result),
        }
    }

    // ---- session ----

    /// Refresh the session, then retry `slot`.
    fn refresh_session(&mut self, slot: Slot) {
        if !self.retry_after_refresh.contains(&slot) {
            self.retry_after_refresh.push(slot);
        }
        self.begin_session_refresh();
    }

    /// Start a session refresh unless one is running. Concurrent 401s
    /// share one refresh call.
    pub(crate) fn begin_session_refresh(&mut self) {
        if self.refreshing_session {
            return;
        }
        self.refreshing_session = true;
        tracing::info!("Backend rejected the session, refreshing");

        let backend = Arc::clone(&self.backend);
        self.spawn(async move {
            let result = backend.refresh_session().await;
            Completion::Session { result }
        });
    }

    fn apply_session_refresh(&mut self, result: Result<(), ApiError>) {
        self.refreshing_session = false;
        let slots = std::mem::take(&mut self.retry_after_refresh);
        let mutations = std::mem::take(&mut self.retry_mutations);
        match result {
            Ok(()) => {
                self.auth_error = None;
                self.resubmit_after_refresh(mutations);
                for slot in slots {
                    match slot {
                        Slot::List => self.refresh_list(),
                        Slot::Detail => self.refresh_detail(),
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Session refresh failed");
                self.auth_error = Some(e.to_string());
                self.fail_after_refresh(mutations, &e);
                for slot in slots {
                    match slot {
                        Slot::List => self.cache.fail_list(e.to_string()),
                        Slot::Detail => {
                            if let Some(case_id) = self.cache.selected_id().map(str::to_owned) {
                                self.cache
                                    .fail_detail(&case_id, DetailError::Failed(e.to_string()));
                            }
                        }
                    }
                }
            }
        }
    }

    // ---- stream updates ----

    /// Route one envelope without acting on it.
    pub fn dispatch(&self, envelope: &EventEnvelope) -> Dispatch {
        route(envelope, self.guild_id.as_deref(), self.cache.selected_id())
    }

    /// Route a batch of envelopes and issue at most one list refetch and
    /// one detail refetch for the whole batch.
    pub fn handle_events<I>(&mut self, envelopes: I)
    where
        I: IntoIterator<Item = EventEnvelope>,
    {
        let mut list = false;
        let mut detail = false;
        for envelope in envelopes {
            match self.dispatch(&envelope) {
                Dispatch::RefetchList => list = true,
                Dispatch::RefetchDetail(_) => detail = true,
                Dispatch::Ignore(reason) => {
                    tracing::debug!(event_type = %envelope.event_type, ?reason, "Ignoring event");
                }
            }
        }
        if list {
            self.refresh_list();
        }
        if detail {
            self.refresh_detail();
        }
    }

    /// Apply stream updates in order, coalescing runs of events.
    pub fn handle_stream_updates<I>(&mut self, updates: I)
    where
        I: IntoIterator<Item = StreamUpdate>,
    {
        let mut events = Vec::new();
        for update in updates {
            match update {
                StreamUpdate::Event(envelope) => events.push(envelope),
                other => {
                    self.handle_events(std::mem::take(&mut events));
                    self.handle_control_update(other);
                }
            }
        }
        self.handle_events(events);
    }

    fn handle_control_update(&mut self, update: StreamUpdate) {
        match update {
            StreamUpdate::State(state) => self.on_connection_state(state),
            StreamUpdate::AuthFailed(message) => {
                tracing::warn!(error = %message, "Event stream session could not be refreshed");
                self.auth_error = Some(message);
            }
            StreamUpdate::Event(envelope) => self.handle_events([envelope]),
        }
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        self.connection = state;
        if state != ConnectionState::Connected {
            return;
        }
        self.auth_error = None;
        if self.ever_connected && self.options.resync_on_reconnect {
            tracing::info!("Event stream reconnected, resyncing cases");
            self.refresh_list();
            self.refresh_detail();
        }
        self.ever_connected = true;
    }

    // ---- event loop ----

    /// Wait for one stream update batch or one fetch completion and apply
    /// it. Returns `false` once the stream side has gone away.
    pub async fn step(&mut self, updates: &mut mpsc::UnboundedReceiver<StreamUpdate>) -> bool {
        tokio::select! {
            Some(completion) = self.completion_rx.recv() => {
                self.apply_completion(completion);
                true
            }
            update = updates.recv() => match update {
                Some(first) => {
                    let mut batch = vec![first];
                    while let Ok(more) = updates.try_recv() {
                        batch.push(more);
                    }
                    self.handle_stream_updates(batch);
                    true
                }
                None => false,
            },
        }
    }

    /// Drive the controller until cancelled or the stream side closes.
    pub async fn run(
        mut self,
        mut updates: mpsc::UnboundedReceiver<StreamUpdate>,
        cancel: CancellationToken,
    ) -> Self {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                alive = self.step(&mut updates) => {
                    if !alive {
                        break;
                    }
                }
            }
        }
        tracing::info!("Sync controller stopped");
        self
    }

    /// Apply completions until nothing is in flight.
    pub async fn settle(&mut self) {
        while self.in_flight > 0 {
            match self.completion_rx.recv().await {
                Some(completion) => self.apply_completion(completion),
                None => break,
            }
        }
    }

    pub(crate) fn spawn<F>(&mut self, request: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.completion_tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let completion = request.await;
            // The receiver lives as long as the controller.
            let _ = tx.send(completion);
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(event_type: &str, payload: serde_json::Value) -> EventEnvelope {
        EventEnvelope::new(event_type, payload)
    }

    #[test]
    fn tokens_are_per_slot_and_monotonic() {
        let mut tokens = RequestTokens::default();
        let l1 = tokens.issue(Slot::List);
        let d1 = tokens.issue(Slot::Detail);
        let l2 = tokens.issue(Slot::List);
        assert!(l2 > l1);
        assert!(!tokens.is_current(Slot::List, l1));
        assert!(tokens.is_current(Slot::List, l2));
        assert!(tokens.is_current(Slot::Detail, d1));
    }

    #[test]
    fn list_events_route_to_list_refetch() {
        for &t in casehub_core::event_types::LIST_INVALIDATING {
            let e = env(t, json!({"guildId": "g1", "caseId": "c1"}));
            assert_eq!(route(&e, Some("g1"), None), Dispatch::RefetchList, "{t}");
        }
    }

    #[test]
    fn foreign_guild_is_ignored() {
        let e = env(CASE_STATUS, json!({"guildId": "X"}));
        assert_eq!(
            route(&e, Some("Y"), None),
            Dispatch::Ignore(IgnoreReason::ForeignGuild)
        );
        let m = env(CASE_MESSAGE, json!({"guildId": "X", "caseId": "c1"}));
        assert_eq!(
            route(&m, Some("Y"), Some("c1")),
            Dispatch::Ignore(IgnoreReason::ForeignGuild)
        );
    }

    #[test]
    fn non_string_guild_is_ignored() {
        for guild in [json!(42), json!({"id": "Y"}), json!(["Y"])] {
            let e = env(CASE_STATUS, json!({"guildId": guild}));
            assert_eq!(
                route(&e, Some("Y"), None),
                Dispatch::Ignore(IgnoreReason::InvalidGuild)
            );
        }
    }

    #[test]
    fn events_without_guild_apply_to_active_guild() {
        let e = env(CASES_UPDATED, json!({}));
        assert_eq!(route(&e, Some("g1"), None), Dispatch::RefetchList);
    }

    #[test]
    fn no_active_guild_ignores_everything() {
        let e = env(CASES_UPDATED, json!({"guildId": "g1"}));
        assert_eq!(
            route(&e, None, None),
            Dispatch::Ignore(IgnoreReason::NoActiveGuild)
        );
    }

    #[test]
    fn message_event_only_for_selected_case() {
        let e = env(CASE_MESSAGE, json!({"guildId": "g1", "caseId": "c1"}));
        assert_eq!(
            route(&e, Some("g1"), Some("c1")),
            Dispatch::RefetchDetail("c1".into())
        );
        assert_eq!(
            route(&e, Some("g1"), Some("c2")),
            Dispatch::Ignore(IgnoreReason::NotSelected)
        );
        assert_eq!(
            route(&e, Some("g1"), None),
            Dispatch::Ignore(IgnoreReason::NotSelected)
        );
    }

    #[test]
    fn unknown_type_is_ignored() {
        let e = env("persona:updated", json!({"guildId": "g1"}));
        assert_eq!(
            route(&e, Some("g1"), None),
            Dispatch::Ignore(IgnoreReason::UnknownType)
        );
    }
}
