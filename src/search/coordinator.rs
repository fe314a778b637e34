use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SearchOptions;
use crate::search::normalize::{contains_normalized, normalize_for_search};
use crate::search::query::prepare_fts_query;
use crate::search::snippet::build_snippet;
use crate::search::state::{LoadedMessage, MatchType, SearchResult, SearchState};
use crate::search::store::{MessageHit, SearchStores};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchMetrics {
    pub local_passes: u64,
    pub database_passes: u64,
    pub full_text_fallbacks: u64,
}

#[derive(Debug, Default)]
struct MetricCounters {
    local_passes: AtomicU64,
    database_passes: AtomicU64,
    full_text_fallbacks: AtomicU64,
}

/// Publication point shared with the background jobs. Every state change
/// happens under `generation`, so a job can only publish while its generation
/// is still the current one.
struct Shared {
    generation: Mutex<u64>,
    state: watch::Sender<SearchState>,
    metrics: MetricCounters,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(SearchState::default());
        Self {
            generation: Mutex::new(0),
            state,
            metrics: MetricCounters::default(),
        }
    }

    fn replace<F>(&self, f: F)
    where
        F: FnOnce(&SearchState) -> SearchState,
    {
        let next = {
            let current = self.state.borrow();
            f(&current)
        };
        self.state.send_replace(next);
    }

    /// Starts a new generation, superseding every job of the previous one.
    fn advance<F>(&self, f: F) -> u64
    where
        F: FnOnce(&SearchState) -> SearchState,
    {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.replace(f);
        *generation
    }

    fn publish<F>(&self, generation: u64, f: F) -> bool
    where
        F: FnOnce(&SearchState) -> SearchState,
    {
        let current = self.generation.lock();
        if *current != generation {
            tracing::debug!(generation, current = *current, "dropping stale search update");
            return false;
        }
        self.replace(f);
        true
    }

    /// Generation-independent edits (navigation, sheet flags). `None` leaves
    /// the state untouched and notifies nobody.
    fn modify<F>(&self, f: F) -> bool
    where
        F: FnOnce(&SearchState) -> Option<SearchState>,
    {
        let _generation = self.generation.lock();
        let next = {
            let current = self.state.borrow();
            f(&current)
        };
        match next {
            Some(next) => {
                self.state.send_replace(next);
                true
            }
            None => false,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        *self.generation.lock() == generation
    }
}

/// In-conversation search: instant matching over the loaded window plus a
/// delayed, cancellable full-text pass over the stored history.
pub struct ChatSearchCoordinator {
    chat_guids: Arc<[String]>,
    stores: SearchStores,
    options: SearchOptions,
    runtime: Handle,
    shared: Arc<Shared>,
    loaded: Arc<[LoadedMessage]>,
    local_job: Option<JoinHandle<()>>,
    database_job: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ChatSearchCoordinator {
    pub fn new(
        chat_guids: Vec<String>,
        stores: SearchStores,
        options: SearchOptions,
        runtime: Handle,
    ) -> Self {
        Self {
            chat_guids: chat_guids.into(),
            stores,
            options,
            runtime,
            shared: Arc::new(Shared::new()),
            loaded: Arc::from(Vec::new()),
            local_job: None,
            database_job: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> SearchState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.shared.state.subscribe()
    }

    pub fn metrics(&self) -> SearchMetrics {
        let counters = &self.shared.metrics;
        SearchMetrics {
            local_passes: counters.local_passes.load(Ordering::Relaxed),
            database_passes: counters.database_passes.load(Ordering::Relaxed),
            full_text_fallbacks: counters.full_text_fallbacks.load(Ordering::Relaxed),
        }
    }

    pub fn activate_search(&mut self) {
        self.shared.advance(|_| SearchState::activated());
        self.cancel_jobs();
        self.loaded = Arc::from(Vec::new());
    }

    pub fn close_search(&mut self) {
        self.shared.advance(|_| SearchState::default());
        self.cancel_jobs();
        self.loaded = Arc::from(Vec::new());
        tracing::debug!("search closed");
    }

    pub fn update_search_query(&mut self, query: &str, loaded: Arc<[LoadedMessage]>) {
        // Bump the generation before aborting so a local job racing with us
        // cannot park a superseded database job.
        if query.trim().is_empty() {
            self.shared
                .advance(|state| state.with_query(query).cleared_results());
            self.cancel_jobs();
            self.loaded = loaded;
            return;
        }

        let generation = self.shared.advance(|state| SearchState {
            is_searching_database: false,
            ..state.with_query(query)
        });
        self.cancel_jobs();
        self.loaded = loaded.clone();
        let job = LocalJob {
            generation,
            query: query.trim().to_string(),
            loaded,
            chat_guids: self.chat_guids.clone(),
            stores: self.stores.clone(),
            options: self.options.clone(),
            shared: self.shared.clone(),
            runtime: self.runtime.clone(),
            database_job: self.database_job.clone(),
        };
        self.local_job = Some(self.runtime.spawn(job.run()));
    }

    pub fn navigate_search_up(&mut self) {
        self.shared.modify(|state| {
            state
                .previous_match()
                .map(|index| state.with_match_cursor(index))
        });
    }

    pub fn navigate_search_down(&mut self) {
        self.shared.modify(|state| {
            state
                .next_match()
                .map(|index| state.with_match_cursor(index))
        });
    }

    pub fn show_results_sheet(&mut self) {
        self.shared
            .modify(|state| Some(state.with_results_sheet(true)));
    }

    pub fn hide_results_sheet(&mut self) {
        self.shared
            .modify(|state| Some(state.with_results_sheet(false)));
    }

    /// Moves the match cursor onto the loaded message `guid` when it is one of
    /// the current in-memory matches.
    pub fn select_loaded_message(&mut self, guid: &str) -> bool {
        let Some(position) = self.loaded.iter().position(|message| message.guid == guid) else {
            return false;
        };
        self.shared.modify(|state| {
            let index = state
                .match_indices
                .iter()
                .position(|candidate| *candidate == position)?;
            let index = isize::try_from(index).ok()?;
            Some(state.with_match_cursor(index))
        })
    }

    /// Waits for the jobs of the current generation to finish or be cancelled.
    pub async fn settle(&mut self) {
        if let Some(job) = self.local_job.take() {
            let _ = job.await;
        }
        let database_job = self.database_job.lock().take();
        if let Some(job) = database_job {
            let _ = job.await;
        }
    }

    fn cancel_jobs(&mut self) {
        if let Some(job) = self.local_job.take() {
            job.abort();
        }
        if let Some(job) = self.database_job.lock().take() {
            job.abort();
        }
    }
}

impl Drop for ChatSearchCoordinator {
    fn drop(&mut self) {
        self.cancel_jobs();
    }
}

struct LocalJob {
    generation: u64,
    query: String,
    loaded: Arc<[LoadedMessage]>,
    chat_guids: Arc<[String]>,
    stores: SearchStores,
    options: SearchOptions,
    shared: Arc<Shared>,
    runtime: Handle,
    database_job: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl LocalJob {
    async fn run(self) {
        tokio::time::sleep(self.options.local_debounce()).await;

        let normalized = normalize_for_search(&self.query);
        let matches = match_loaded_messages(&self.loaded, &normalized);
        self.shared
            .metrics
            .local_passes
            .fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            generation = self.generation,
            matches = matches.len(),
            window = self.loaded.len(),
            "local search pass"
        );
        if !self
            .shared
            .publish(self.generation, |state| state.with_local_matches(matches))
        {
            return;
        }
        if self.chat_guids.is_empty() {
            return;
        }

        let job = DatabaseJob {
            generation: self.generation,
            loaded_guids: self
                .loaded
                .iter()
                .map(|message| message.guid.clone())
                .collect(),
            query: self.query,
            chat_guids: self.chat_guids,
            stores: self.stores,
            options: self.options,
            shared: self.shared.clone(),
        };
        let mut slot = self.database_job.lock();
        let handle = self.runtime.spawn(job.run());
        if !self.shared.is_current(self.generation) {
            handle.abort();
            return;
        }
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }
}

struct DatabaseJob {
    generation: u64,
    query: String,
    loaded_guids: HashSet<String>,
    chat_guids: Arc<[String]>,
    stores: SearchStores,
    options: SearchOptions,
    shared: Arc<Shared>,
}

impl DatabaseJob {
    async fn run(self) {
        tokio::time::sleep(self.options.database_delay()).await;
        if !self
            .shared
            .publish(self.generation, SearchState::with_database_searching)
        {
            return;
        }
        self.shared
            .metrics
            .database_passes
            .fetch_add(1, Ordering::Relaxed);

        let generation = self.generation;
        let shared = self.shared.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            run_database_search(
                &self.stores,
                &self.query,
                &self.chat_guids,
                &self.loaded_guids,
                &self.options,
            )
        })
        .await;

        let results = match outcome {
            Ok(Ok(outcome)) => {
                if outcome.used_fallback {
                    shared
                        .metrics
                        .full_text_fallbacks
                        .fetch_add(1, Ordering::Relaxed);
                }
                tracing::debug!(
                    generation,
                    results = outcome.results.len(),
                    fallback = outcome.used_fallback,
                    "database search pass"
                );
                outcome.results
            }
            Ok(Err(err)) => {
                tracing::warn!(?err, generation, "database search failed");
                Vec::new()
            }
            Err(err) => {
                tracing::warn!(?err, generation, "database search task did not complete");
                Vec::new()
            }
        };
        shared.publish(generation, |state| state.with_database_results(results));
    }
}

/// Indices of loaded messages whose text, subject or any attachment name
/// contains the folded query.
pub fn match_loaded_messages(loaded: &[LoadedMessage], normalized_query: &str) -> Vec<usize> {
    if normalized_query.is_empty() {
        return Vec::new();
    }
    loaded
        .iter()
        .enumerate()
        .filter(|(_, message)| {
            message
                .text
                .as_deref()
                .is_some_and(|text| contains_normalized(text, normalized_query))
                || message
                    .subject
                    .as_deref()
                    .is_some_and(|subject| contains_normalized(subject, normalized_query))
                || message
                    .attachment_names
                    .iter()
                    .any(|name| contains_normalized(name, normalized_query))
        })
        .map(|(index, _)| index)
        .collect()
}

#[derive(Debug, Default)]
pub struct DatabaseSearchOutcome {
    pub results: Vec<SearchResult>,
    pub used_fallback: bool,
}

/// The blocking half of the database stage: full-text search with substring
/// fallback, attachment names, merge, snippets, newest first.
pub fn run_database_search(
    stores: &SearchStores,
    query: &str,
    chat_guids: &[String],
    loaded_guids: &HashSet<String>,
    options: &SearchOptions,
) -> Result<DatabaseSearchOutcome> {
    let normalized = normalize_for_search(query);
    let mut used_fallback = false;

    let full_text = match prepare_fts_query(query) {
        Some(fts_query) => {
            match stores.messages.search_full_text(
                &fts_query,
                chat_guids,
                options.message_result_limit,
            ) {
                Ok(hits) => Some(hits),
                Err(err) => {
                    tracing::debug!(?err, %fts_query, "full-text query failed, using substring search");
                    None
                }
            }
        }
        None => None,
    };
    let message_hits = match full_text {
        Some(hits) => hits,
        None => {
            used_fallback = true;
            stores
                .messages
                .search_substring(query, chat_guids, options.message_result_limit)?
        }
    };
    let attachment_hits =
        stores
            .attachments
            .search_filenames(query, chat_guids, options.attachment_result_limit)?;

    let mut merged: IndexMap<String, SearchResult> = IndexMap::new();
    for hit in message_hits {
        if merged.contains_key(&hit.guid) {
            continue;
        }
        let (match_type, source) = classify_message_hit(&hit, &normalized);
        let result = SearchResult {
            snippet: build_snippet(source, &normalized, options.snippet_length),
            is_loaded_in_memory: loaded_guids.contains(&hit.guid),
            message_guid: hit.guid.clone(),
            chat_guid: hit.chat_guid,
            timestamp: hit.date_created,
            match_type,
        };
        merged.insert(hit.guid, result);
    }
    for hit in attachment_hits {
        if merged.contains_key(&hit.message_guid) {
            continue;
        }
        let result = SearchResult {
            snippet: build_snippet(&hit.transfer_name, &normalized, options.snippet_length),
            is_loaded_in_memory: loaded_guids.contains(&hit.message_guid),
            message_guid: hit.message_guid.clone(),
            chat_guid: hit.chat_guid,
            timestamp: hit.date_created,
            match_type: MatchType::AttachmentName,
        };
        merged.insert(hit.message_guid, result);
    }

    let mut results: Vec<SearchResult> = merged.into_values().collect();
    results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(DatabaseSearchOutcome {
        results,
        used_fallback,
    })
}

/// Which field produced the hit. Full-text tokenization can match forms the
/// substring check misses; those fall back to `Text`.
fn classify_message_hit<'a>(hit: &'a MessageHit, normalized: &str) -> (MatchType, &'a str) {
    let text = hit.text.as_deref().unwrap_or_default();
    let subject = hit.subject.as_deref().unwrap_or_default();
    if !text.is_empty() && contains_normalized(text, normalized) {
        return (MatchType::Text, text);
    }
    if !subject.is_empty() && contains_normalized(subject, normalized) {
        return (MatchType::Subject, subject);
    }
    if text.is_empty() {
        (MatchType::Text, subject)
    } else {
        (MatchType::Text, text)
    }
}
