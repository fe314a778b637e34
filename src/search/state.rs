use serde::Serialize;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Text,
    Subject,
    AttachmentName,
}

/// One hit from the database stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub message_guid: String,
    pub chat_guid: String,
    pub snippet: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub match_type: MatchType,
    /// The message is part of the currently loaded window, so the view can
    /// jump to it without paging.
    pub is_loaded_in_memory: bool,
}

/// Snapshot published to observers. Never mutated in place; every change
/// produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchState {
    pub is_active: bool,
    pub query: String,
    pub match_indices: Vec<usize>,
    pub current_match_index: isize,
    pub is_searching_database: bool,
    pub database_results: Vec<SearchResult>,
    pub show_results_sheet: bool,
}

impl Default for SearchState {
    fn default() -> Self {
        Self {
            is_active: false,
            query: String::new(),
            match_indices: Vec::new(),
            current_match_index: -1,
            is_searching_database: false,
            database_results: Vec::new(),
            show_results_sheet: false,
        }
    }
}

impl SearchState {
    pub fn activated() -> Self {
        Self {
            is_active: true,
            ..Self::default()
        }
    }

    pub fn has_query(&self) -> bool {
        !self.query.trim().is_empty()
    }

    pub fn match_count(&self) -> usize {
        self.match_indices.len()
    }

    /// Position in the loaded message list of the selected match.
    pub fn current_message_position(&self) -> Option<usize> {
        usize::try_from(self.current_match_index)
            .ok()
            .and_then(|index| self.match_indices.get(index).copied())
    }

    pub(crate) fn with_query(&self, query: &str) -> Self {
        Self {
            query: query.to_string(),
            ..self.clone()
        }
    }

    pub(crate) fn cleared_results(&self) -> Self {
        Self {
            match_indices: Vec::new(),
            current_match_index: -1,
            is_searching_database: false,
            database_results: Vec::new(),
            ..self.clone()
        }
    }

    pub(crate) fn with_local_matches(&self, match_indices: Vec<usize>) -> Self {
        let current_match_index = if match_indices.is_empty() { -1 } else { 0 };
        Self {
            match_indices,
            current_match_index,
            ..self.clone()
        }
    }

    pub(crate) fn with_database_searching(&self) -> Self {
        Self {
            is_searching_database: true,
            ..self.clone()
        }
    }

    pub(crate) fn with_database_results(&self, database_results: Vec<SearchResult>) -> Self {
        Self {
            is_searching_database: false,
            database_results,
            ..self.clone()
        }
    }

    pub(crate) fn with_results_sheet(&self, show_results_sheet: bool) -> Self {
        Self {
            show_results_sheet,
            ..self.clone()
        }
    }

    pub(crate) fn with_match_cursor(&self, current_match_index: isize) -> Self {
        Self {
            current_match_index,
            ..self.clone()
        }
    }

    /// Cursor one step towards the start of the match list, wrapping to the end.
    pub(crate) fn previous_match(&self) -> Option<isize> {
        let len = self.match_indices.len();
        if len == 0 {
            return None;
        }
        let current = usize::try_from(self.current_match_index).unwrap_or(0);
        let previous = if current == 0 { len - 1 } else { current - 1 };
        isize::try_from(previous).ok()
    }

    /// Cursor one step towards the end of the match list, wrapping to the start.
    pub(crate) fn next_match(&self) -> Option<isize> {
        let len = self.match_indices.len();
        if len == 0 {
            return None;
        }
        let next = match usize::try_from(self.current_match_index) {
            Ok(current) if current + 1 < len => current + 1,
            Ok(_) => 0,
            Err(_) => 0,
        };
        isize::try_from(next).ok()
    }
}

/// A message currently held by the conversation view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedMessage {
    pub guid: String,
    pub text: Option<String>,
    pub subject: Option<String>,
    pub attachment_names: Vec<String>,
}
