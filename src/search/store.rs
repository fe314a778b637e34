use std::sync::Arc;

use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHit {
    pub guid: String,
    pub chat_guid: String,
    pub text: Option<String>,
    pub subject: Option<String>,
    pub date_created: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentHit {
    pub attachment_guid: String,
    pub message_guid: String,
    pub chat_guid: String,
    pub transfer_name: String,
    pub date_created: i64,
}

/// Persisted message history, searched by the database stage. Calls block and
/// are run on the blocking pool.
pub trait MessageSearchStore: Send + Sync {
    /// `fts_query` is already a prepared MATCH expression.
    fn search_full_text(
        &self,
        fts_query: &str,
        chat_guids: &[String],
        limit: usize,
    ) -> Result<Vec<MessageHit>>;

    /// Case- and diacritic-insensitive substring match on text and subject.
    fn search_substring(
        &self,
        query: &str,
        chat_guids: &[String],
        limit: usize,
    ) -> Result<Vec<MessageHit>>;
}

pub trait AttachmentSearchStore: Send + Sync {
    fn search_filenames(
        &self,
        query: &str,
        chat_guids: &[String],
        limit: usize,
    ) -> Result<Vec<AttachmentHit>>;
}

#[derive(Clone)]
pub struct SearchStores {
    pub messages: Arc<dyn MessageSearchStore>,
    pub attachments: Arc<dyn AttachmentSearchStore>,
}

impl SearchStores {
    pub fn new(
        messages: Arc<dyn MessageSearchStore>,
        attachments: Arc<dyn AttachmentSearchStore>,
    ) -> Self {
        Self {
            messages,
            attachments,
        }
    }

    /// Both roles served by one backend.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: MessageSearchStore + AttachmentSearchStore + 'static,
    {
        Self {
            messages: store.clone(),
            attachments: store,
        }
    }
}
