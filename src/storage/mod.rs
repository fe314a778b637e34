use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rusqlite::config::DbConfig;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::{ConfigPaths, StorageOptions};
use crate::search::normalize::normalize_for_search;
use crate::search::query::like_pattern;
use crate::search::state::LoadedMessage;
use crate::search::store::{AttachmentHit, AttachmentSearchStore, MessageHit, MessageSearchStore};

mod schema;

const ATTACHMENT_DELIMITER: &str = "|:|";
const SEARCH_FOLD_FN: &str = "search_fold";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub id: i64,
    pub guid: String,
    pub display_name: Option<String>,
    pub message_count: i64,
}

#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: i64,
    pub guid: String,
    pub chat_guid: String,
    pub text: Option<String>,
    pub subject: Option<String>,
    pub date_created: i64,
    pub is_from_me: bool,
    pub attachment_names: Vec<String>,
}

impl From<&MessageRecord> for LoadedMessage {
    fn from(record: &MessageRecord) -> Self {
        Self {
            guid: record.guid.clone(),
            text: record.text.clone(),
            subject: record.subject.clone(),
            attachment_names: record.attachment_names.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewAttachment {
    pub transfer_name: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub chat_guid: String,
    pub text: Option<String>,
    pub subject: Option<String>,
    /// Milliseconds since the Unix epoch; `None` stamps the current time.
    pub date_created: Option<i64>,
    pub is_from_me: bool,
    pub attachments: Vec<NewAttachment>,
}

#[derive(Clone)]
pub struct StorageHandle {
    db_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
}

impl StorageHandle {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    /// Returns the chat's row id, creating the chat on first use.
    pub fn create_chat(&self, guid: &str, display_name: Option<&str>) -> Result<i64> {
        let guid = guid.trim();
        if guid.is_empty() {
            bail!("chat guid cannot be empty");
        }
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO chats (guid, display_name) VALUES (?1, ?2)",
                params![guid, display_name],
            )
            .context("inserting chat")?;
            let id = conn
                .query_row("SELECT id FROM chats WHERE guid = ?1", params![guid], |row| {
                    row.get(0)
                })
                .context("resolving chat id")?;
            Ok(id)
        })
    }

    pub fn find_chat(&self, guid: &str) -> Result<Option<ChatRecord>> {
        self.with_connection(|conn| {
            let chat = conn
                .query_row(
                    "SELECT c.id,
                            c.guid,
                            c.display_name,
                            (SELECT COUNT(*) FROM messages m
                             WHERE m.chat_id = c.id AND m.date_deleted IS NULL)
                     FROM chats c
                     WHERE c.guid = ?1",
                    params![guid],
                    chat_from_row,
                )
                .optional()
                .context("looking up chat")?;
            Ok(chat)
        })
    }

    pub fn list_chats(&self) -> Result<Vec<ChatRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id,
                        c.guid,
                        c.display_name,
                        (SELECT COUNT(*) FROM messages m
                         WHERE m.chat_id = c.id AND m.date_deleted IS NULL)
                 FROM chats c
                 ORDER BY c.guid",
            )?;
            let rows = stmt.query_map([], chat_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
                .context("fetching chats")
        })
    }

    /// Stores a message and its attachments, returning the new message guid.
    pub fn insert_message(&self, message: &NewMessage) -> Result<String> {
        if message.text.as_deref().map_or(true, |text| text.trim().is_empty())
            && message.subject.is_none()
            && message.attachments.is_empty()
        {
            bail!("message needs text, a subject or an attachment");
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let chat_id: i64 = tx
            .query_row(
                "SELECT id FROM chats WHERE guid = ?1",
                params![message.chat_guid],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| anyhow::anyhow!("chat '{}' not found", message.chat_guid))?;

        let guid = Uuid::new_v4().to_string().to_uppercase();
        let date_created = message.date_created.unwrap_or_else(now_millis);
        tx.execute(
            "INSERT INTO messages (guid, chat_id, text, subject, date_created, is_from_me)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                guid,
                chat_id,
                message.text,
                message.subject,
                date_created,
                if message.is_from_me { 1 } else { 0 }
            ],
        )
        .context("inserting message")?;
        let message_id = tx.last_insert_rowid();

        for attachment in &message.attachments {
            tx.execute(
                "INSERT INTO attachments (guid, message_id, transfer_name, mime_type)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string().to_uppercase(),
                    message_id,
                    attachment.transfer_name,
                    attachment.mime_type
                ],
            )
            .context("inserting attachment")?;
        }

        tx.commit()?;
        Ok(guid)
    }

    pub fn soft_delete_message(&self, guid: &str) -> Result<()> {
        let now = now_millis();
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET date_deleted = ?1 WHERE guid = ?2 AND date_deleted IS NULL",
                params![now, guid],
            )?;
            if updated == 0 {
                bail!("message {guid} not found");
            }
            Ok(())
        })
    }

    /// Newest messages across `chat_guids`, newest first, with attachment names.
    pub fn fetch_recent_messages(
        &self,
        chat_guids: &[String],
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        if chat_guids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT m.id,
                        m.guid,
                        c.guid,
                        m.text,
                        m.subject,
                        m.date_created,
                        m.is_from_me,
                        COALESCE((
                            SELECT GROUP_CONCAT(a.transfer_name, '{delim}')
                            FROM attachments a
                            WHERE a.message_id = m.id
                              AND a.transfer_name IS NOT NULL
                        ), '')
                 FROM messages m
                 INNER JOIN chats c ON c.id = m.chat_id
                 WHERE m.date_deleted IS NULL
                   AND c.guid IN ({scope})
                 ORDER BY m.date_created DESC, m.id DESC
                 LIMIT ?1",
                delim = ATTACHMENT_DELIMITER,
                scope = scope_placeholders(chat_guids.len(), 2),
            );
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map(params_from_iter(bind_values(None, limit, chat_guids)), |row| {
                    let attachments: String = row.get(7)?;
                    Ok(MessageRecord {
                        id: row.get(0)?,
                        guid: row.get(1)?,
                        chat_guid: row.get(2)?,
                        text: row.get(3)?,
                        subject: row.get(4)?,
                        date_created: row.get(5)?,
                        is_from_me: row.get::<_, i64>(6)? != 0,
                        attachment_names: parse_attachment_names(&attachments),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()
                .context("fetching recent messages")?;
            Ok(records)
        })
    }

    /// Runs a prepared FTS5 MATCH expression. Malformed expressions surface as
    /// errors so callers can fall back to substring search.
    pub fn search_messages_fts(
        &self,
        fts_query: &str,
        chat_guids: &[String],
        limit: usize,
    ) -> Result<Vec<MessageHit>> {
        if chat_guids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT m.guid, c.guid, m.text, m.subject, m.date_created
                 FROM fts_messages
                 INNER JOIN messages m ON m.id = fts_messages.rowid
                 INNER JOIN chats c ON c.id = m.chat_id
                 WHERE fts_messages MATCH ?1
                   AND m.date_deleted IS NULL
                   AND c.guid IN ({scope})
                 ORDER BY m.date_created DESC
                 LIMIT ?2",
                scope = scope_placeholders(chat_guids.len(), 3),
            );
            let mut stmt = conn.prepare(&sql)?;
            let hits = stmt
                .query_map(
                    params_from_iter(bind_values(Some(fts_query.to_string()), limit, chat_guids)),
                    message_hit_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("running full-text query {fts_query}"))?;
            Ok(hits)
        })
    }

    /// Case- and diacritic-insensitive substring search over text and subject.
    pub fn search_messages_substring(
        &self,
        query: &str,
        chat_guids: &[String],
        limit: usize,
    ) -> Result<Vec<MessageHit>> {
        if chat_guids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT m.guid, c.guid, m.text, m.subject, m.date_created
                 FROM messages m
                 INNER JOIN chats c ON c.id = m.chat_id
                 WHERE ({fold}(m.text) LIKE ?1 ESCAPE '\\'
                        OR {fold}(m.subject) LIKE ?1 ESCAPE '\\')
                   AND m.date_deleted IS NULL
                   AND c.guid IN ({scope})
                 ORDER BY m.date_created DESC
                 LIMIT ?2",
                fold = SEARCH_FOLD_FN,
                scope = scope_placeholders(chat_guids.len(), 3),
            );
            let mut stmt = conn.prepare(&sql)?;
            let hits = stmt
                .query_map(
                    params_from_iter(bind_values(Some(like_pattern(query)), limit, chat_guids)),
                    message_hit_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()
                .context("running substring message search")?;
            Ok(hits)
        })
    }

    pub fn search_attachment_names(
        &self,
        query: &str,
        chat_guids: &[String],
        limit: usize,
    ) -> Result<Vec<AttachmentHit>> {
        if chat_guids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT a.guid, m.guid, c.guid, a.transfer_name, m.date_created
                 FROM attachments a
                 INNER JOIN messages m ON m.id = a.message_id
                 INNER JOIN chats c ON c.id = m.chat_id
                 WHERE {fold}(a.transfer_name) LIKE ?1 ESCAPE '\\'
                   AND m.date_deleted IS NULL
                   AND c.guid IN ({scope})
                 ORDER BY m.date_created DESC
                 LIMIT ?2",
                fold = SEARCH_FOLD_FN,
                scope = scope_placeholders(chat_guids.len(), 3),
            );
            let mut stmt = conn.prepare(&sql)?;
            let hits = stmt
                .query_map(
                    params_from_iter(bind_values(Some(like_pattern(query)), limit, chat_guids)),
                    |row| {
                        Ok(AttachmentHit {
                            attachment_guid: row.get(0)?,
                            message_guid: row.get(1)?,
                            chat_guid: row.get(2)?,
                            transfer_name: row.get(3)?,
                            date_created: row.get(4)?,
                        })
                    },
                )?
                .collect::<Result<Vec<_>, _>>()
                .context("running attachment name search")?;
            Ok(hits)
        })
    }
}

impl MessageSearchStore for StorageHandle {
    fn search_full_text(
        &self,
        fts_query: &str,
        chat_guids: &[String],
        limit: usize,
    ) -> Result<Vec<MessageHit>> {
        self.search_messages_fts(fts_query, chat_guids, limit)
    }

    fn search_substring(
        &self,
        query: &str,
        chat_guids: &[String],
        limit: usize,
    ) -> Result<Vec<MessageHit>> {
        self.search_messages_substring(query, chat_guids, limit)
    }
}

impl AttachmentSearchStore for StorageHandle {
    fn search_filenames(
        &self,
        query: &str,
        chat_guids: &[String],
        limit: usize,
    ) -> Result<Vec<AttachmentHit>> {
        self.search_attachment_names(query, chat_guids, limit)
    }
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRecord> {
    Ok(ChatRecord {
        id: row.get(0)?,
        guid: row.get(1)?,
        display_name: row.get(2)?,
        message_count: row.get(3)?,
    })
}

fn message_hit_from_row(row: &Row<'_>) -> rusqlite::Result<MessageHit> {
    Ok(MessageHit {
        guid: row.get(0)?,
        chat_guid: row.get(1)?,
        text: row.get(2)?,
        subject: row.get(3)?,
        date_created: row.get(4)?,
    })
}

/// `?first, ?first+1, ...` for an `IN (...)` list of `count` chat guids.
fn scope_placeholders(count: usize, first: usize) -> String {
    (first..first + count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Positional values in placeholder order: optional query, limit, chat guids.
fn bind_values(query: Option<String>, limit: usize, chat_guids: &[String]) -> Vec<Value> {
    let mut values = Vec::with_capacity(chat_guids.len() + 2);
    if let Some(query) = query {
        values.push(Value::Text(query));
    }
    values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    values.extend(chat_guids.iter().cloned().map(Value::Text));
    values
}

fn parse_attachment_names(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(ATTACHMENT_DELIMITER)
        .filter(|name| !name.is_empty())
        .map(|name| name.to_string())
        .collect()
}

fn now_millis() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000)
        .unwrap_or(i64::MAX)
}

pub fn init(paths: &ConfigPaths, storage: &StorageOptions) -> Result<StorageHandle> {
    let db_path = if storage.database_path.as_os_str().is_empty() {
        paths.database_path.clone()
    } else {
        storage.database_path.clone()
    };
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    prepare_connection(&conn, storage)?;
    schema::apply(&conn)?;
    tracing::debug!(path = %db_path.display(), "message store ready");
    Ok(StorageHandle {
        db_path: Arc::new(db_path),
        options: Arc::new(storage.clone()),
    })
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, true)
        .context("enabling foreign keys")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    conn.create_scalar_function(
        SEARCH_FOLD_FN,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            Ok(value.map(|text| normalize_for_search(&text)))
        },
    )
    .context("registering search_fold function")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchOptions;
    use crate::search::query::prepare_fts_query;
    use crate::search::{ChatSearchCoordinator, MatchType, SearchStores};
    use tempfile::TempDir;

    const CHAT: &str = "iMessage;-;+15550100";
    const OTHER_CHAT: &str = "SMS;-;+15550199";

    fn init_storage() -> anyhow::Result<(TempDir, StorageHandle)> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::rooted_at(temp.path());
        paths.ensure_directories()?;
        let opts = StorageOptions {
            database_path: paths.database_path.clone(),
            ..StorageOptions::default()
        };
        let storage = init(&paths, &opts)?;
        storage.create_chat(CHAT, Some("Alex"))?;
        storage.create_chat(OTHER_CHAT, None)?;
        Ok((temp, storage))
    }

    fn text_message(chat: &str, text: &str, date_created: i64) -> NewMessage {
        NewMessage {
            chat_guid: chat.into(),
            text: Some(text.into()),
            date_created: Some(date_created),
            ..NewMessage::default()
        }
    }

    fn scope(chats: &[&str]) -> Vec<String> {
        chats.iter().map(|chat| chat.to_string()).collect()
    }

    #[test]
    fn create_chat_is_idempotent() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let first = storage.create_chat(CHAT, Some("Alex"))?;
        let second = storage.create_chat(CHAT, None)?;
        assert_eq!(first, second);
        assert_eq!(storage.list_chats()?.len(), 2);
        Ok(())
    }

    #[test]
    fn insert_rejects_unknown_chat_and_empty_messages() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        assert!(storage
            .insert_message(&text_message("missing", "hi", 1))
            .is_err());
        assert!(storage
            .insert_message(&NewMessage {
                chat_guid: CHAT.into(),
                text: Some("   ".into()),
                ..NewMessage::default()
            })
            .is_err());
        Ok(())
    }

    #[test]
    fn full_text_matches_prefix_and_ignores_accents() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.insert_message(&text_message(CHAT, "Meet at the café tonight", 10))?;
        storage.insert_message(&text_message(CHAT, "Cafeteria food again", 20))?;
        storage.insert_message(&text_message(CHAT, "unrelated", 30))?;

        let fts = prepare_fts_query("cafe").expect("fts query");
        let hits = storage.search_messages_fts(&fts, &scope(&[CHAT]), 10)?;
        let texts: Vec<_> = hits.iter().filter_map(|hit| hit.text.as_deref()).collect();
        assert_eq!(texts, vec!["Cafeteria food again", "Meet at the café tonight"]);
        Ok(())
    }

    #[test]
    fn searches_are_scoped_to_target_chats() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.insert_message(&text_message(CHAT, "dinner at eight", 10))?;
        storage.insert_message(&text_message(OTHER_CHAT, "dinner at nine", 20))?;

        let fts = prepare_fts_query("dinner").expect("fts query");
        assert_eq!(storage.search_messages_fts(&fts, &scope(&[CHAT]), 10)?.len(), 1);
        assert_eq!(
            storage
                .search_messages_fts(&fts, &scope(&[CHAT, OTHER_CHAT]), 10)?
                .len(),
            2
        );
        assert_eq!(
            storage
                .search_messages_substring("dinner", &scope(&[OTHER_CHAT]), 10)?
                .len(),
            1
        );
        assert!(storage.search_messages_fts(&fts, &[], 10)?.is_empty());
        Ok(())
    }

    #[test]
    fn malformed_full_text_query_is_an_error() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.insert_message(&text_message(CHAT, "anything", 10))?;
        assert!(storage
            .search_messages_fts("\"unterminated", &scope(&[CHAT]), 10)
            .is_err());
        Ok(())
    }

    #[test]
    fn substring_search_folds_accents_and_escapes_wildcards() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.insert_message(&text_message(CHAT, "Crème BRÛLÉE for dessert", 10))?;
        storage.insert_message(&text_message(CHAT, "50% off today", 20))?;
        storage.insert_message(&text_message(CHAT, "500 off today", 30))?;
        storage.insert_message(&NewMessage {
            chat_guid: CHAT.into(),
            subject: Some("Brûlée recipe".into()),
            date_created: Some(40),
            ..NewMessage::default()
        })?;

        let chats = scope(&[CHAT]);
        let hits = storage.search_messages_substring("brulee", &chats, 10)?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].subject.as_deref(), Some("Brûlée recipe"));

        let hits = storage.search_messages_substring("50%", &chats, 10)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text.as_deref(), Some("50% off today"));
        Ok(())
    }

    #[test]
    fn deleted_messages_never_match() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let guid = storage.insert_message(&NewMessage {
            chat_guid: CHAT.into(),
            text: Some("secret plan".into()),
            date_created: Some(10),
            attachments: vec![NewAttachment {
                transfer_name: "secret.png".into(),
                mime_type: Some("image/png".into()),
            }],
            ..NewMessage::default()
        })?;
        storage.soft_delete_message(&guid)?;

        let chats = scope(&[CHAT]);
        let fts = prepare_fts_query("secret").expect("fts query");
        assert!(storage.search_messages_fts(&fts, &chats, 10)?.is_empty());
        assert!(storage.search_messages_substring("secret", &chats, 10)?.is_empty());
        assert!(storage.search_attachment_names("secret", &chats, 10)?.is_empty());
        assert!(storage.fetch_recent_messages(&chats, 10)?.is_empty());
        assert!(storage.soft_delete_message(&guid).is_err());
        Ok(())
    }

    #[test]
    fn attachment_names_match_without_accents() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let guid = storage.insert_message(&NewMessage {
            chat_guid: CHAT.into(),
            date_created: Some(10),
            attachments: vec![
                NewAttachment {
                    transfer_name: "Résumé 2024.pdf".into(),
                    mime_type: Some("application/pdf".into()),
                },
                NewAttachment {
                    transfer_name: "IMG_0001.HEIC".into(),
                    mime_type: None,
                },
            ],
            ..NewMessage::default()
        })?;

        let hits = storage.search_attachment_names("resume", &scope(&[CHAT]), 10)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message_guid, guid);
        assert_eq!(hits[0].transfer_name, "Résumé 2024.pdf");
        Ok(())
    }

    #[test]
    fn recent_messages_are_newest_first_with_attachments() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.insert_message(&text_message(CHAT, "first", 10))?;
        storage.insert_message(&NewMessage {
            chat_guid: CHAT.into(),
            text: Some("look".into()),
            date_created: Some(20),
            attachments: vec![
                NewAttachment {
                    transfer_name: "a.jpg".into(),
                    mime_type: None,
                },
                NewAttachment {
                    transfer_name: "b.jpg".into(),
                    mime_type: None,
                },
            ],
            ..NewMessage::default()
        })?;
        storage.insert_message(&text_message(CHAT, "third", 30))?;

        let recent = storage.fetch_recent_messages(&scope(&[CHAT]), 2)?;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].text.as_deref(), Some("third"));
        let mut names = recent[1].attachment_names.clone();
        names.sort();
        assert_eq!(names, vec!["a.jpg", "b.jpg"]);

        let chat = storage.find_chat(CHAT)?.expect("chat present");
        assert_eq!(chat.message_count, 3);
        assert_eq!(chat.display_name.as_deref(), Some("Alex"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn coordinator_searches_stored_history() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        for day in 0..5 {
            storage.insert_message(&text_message(CHAT, &format!("filler {day}"), day))?;
        }
        storage.insert_message(&text_message(CHAT, "Old photos from Zürich", 100))?;
        storage.insert_message(&NewMessage {
            chat_guid: CHAT.into(),
            text: Some("here you go".into()),
            date_created: Some(200),
            attachments: vec![NewAttachment {
                transfer_name: "zurich-lake.jpg".into(),
                mime_type: Some("image/jpeg".into()),
            }],
            ..NewMessage::default()
        })?;
        for minute in 300..310 {
            storage.insert_message(&text_message(CHAT, "newer chatter", minute))?;
        }

        let chats = scope(&[CHAT]);
        let window: Arc<[LoadedMessage]> = storage
            .fetch_recent_messages(&chats, 11)?
            .iter()
            .map(LoadedMessage::from)
            .collect::<Vec<_>>()
            .into();

        let mut search = ChatSearchCoordinator::new(
            chats,
            SearchStores::shared(Arc::new(storage)),
            SearchOptions::default(),
            tokio::runtime::Handle::current(),
        );
        search.activate_search();
        search.update_search_query("zurich", window);
        search.settle().await;

        let state = search.state();
        assert_eq!(state.match_indices, vec![10]);
        assert_eq!(state.database_results.len(), 2);
        let attachment = &state.database_results[0];
        assert_eq!(attachment.match_type, MatchType::AttachmentName);
        assert!(attachment.is_loaded_in_memory);
        let text = &state.database_results[1];
        assert_eq!(text.match_type, MatchType::Text);
        assert_eq!(text.snippet, "Old photos from Zürich");
        assert!(!text.is_loaded_in_memory);
        Ok(())
    }
}
