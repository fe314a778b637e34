use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn apply(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS chats (
            id INTEGER PRIMARY KEY,
            guid TEXT NOT NULL UNIQUE,
            display_name TEXT
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY,
            guid TEXT NOT NULL UNIQUE,
            chat_id INTEGER NOT NULL,
            text TEXT,
            subject TEXT,
            date_created INTEGER NOT NULL,
            is_from_me INTEGER NOT NULL DEFAULT 0,
            date_deleted INTEGER,
            FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat_date
            ON messages(chat_id, date_created DESC);

        CREATE TABLE IF NOT EXISTS attachments (
            id INTEGER PRIMARY KEY,
            guid TEXT NOT NULL UNIQUE,
            message_id INTEGER NOT NULL,
            transfer_name TEXT,
            mime_type TEXT,
            FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_attachments_message
            ON attachments(message_id);

        CREATE VIRTUAL TABLE IF NOT EXISTS fts_messages USING fts5(
            text,
            subject,
            content='messages',
            content_rowid='id',
            tokenize='unicode61 remove_diacritics 2'
        );

        CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
            INSERT INTO fts_messages(rowid, text, subject)
            VALUES (new.id, new.text, new.subject);
        END;

        CREATE TRIGGER IF NOT EXISTS messages_ad AFTER DELETE ON messages BEGIN
            INSERT INTO fts_messages(fts_messages, rowid, text, subject)
            VALUES ('delete', old.id, old.text, old.subject);
        END;

        CREATE TRIGGER IF NOT EXISTS messages_au AFTER UPDATE OF text, subject ON messages BEGIN
            INSERT INTO fts_messages(fts_messages, rowid, text, subject)
            VALUES ('delete', old.id, old.text, old.subject);
            INSERT INTO fts_messages(rowid, text, subject)
            VALUES (new.id, new.text, new.subject);
        END;
        "#,
    )
    .context("applying schema migrations")?;
    Ok(())
}
