pub mod coordinator;
pub mod normalize;
pub mod query;
pub mod snippet;
pub mod state;
pub mod store;

pub use coordinator::{
    match_loaded_messages, run_database_search, ChatSearchCoordinator, DatabaseSearchOutcome,
    SearchMetrics,
};
pub use normalize::{contains_normalized, normalize_for_search};
pub use query::{like_pattern, prepare_fts_query};
pub use snippet::{build_snippet, snippet_for_query};
pub use state::{LoadedMessage, MatchType, SearchResult, SearchState};
pub use store::{
    AttachmentHit, AttachmentSearchStore, MessageHit, MessageSearchStore, SearchStores,
};
