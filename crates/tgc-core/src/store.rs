//! SQLite-backed progress store with idempotent upserts.

use std::{collections::VecDeque, path::Path, sync::Mutex, time::Duration};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    domain::{DialogId, MessageId, UserId},
    errors::Error,
    ports::{MessageRecord, PeerRecord, ProgressStore, StoredMessage},
    Result,
};

/// Rows per read-back batch for the offline re-scan.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug)]
pub struct SqliteProgressStore {
    conn: Mutex<Connection>,
}

impl SqliteProgressStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("connection mutex poisoned".to_string()))
    }

    /// Read one message row regardless of its deleted flag.
    pub fn message(&self, id: MessageId, dialog_id: DialogId) -> Result<Option<StoredMessage>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("{SELECT_MESSAGE} WHERE id = ?1 AND dialog_id = ?2"),
                params![id.0, dialog_id.0],
                read_row,
            )
            .optional()?;
        row.map(decode_row).transpose()
    }

    pub fn message_rows(&self) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT count(*) FROM message", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn dialog_rows(&self) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT count(*) FROM user_dialog", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    /// `(title, username, users_count, has_full_chat_data)` for a peer row.
    pub fn peer_summary(
        &self,
        id: DialogId,
    ) -> Result<Option<(String, Option<String>, i64, bool)>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT title, username, users_count, full_chat_data IS NOT NULL FROM peer WHERE id = ?1",
                params![id.0],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        Ok(row)
    }
}

fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS peer (
            id INTEGER PRIMARY KEY,
            title TEXT NULL,
            username TEXT NULL,
            peer_type TEXT NULL,
            users_count INTEGER NOT NULL DEFAULT 0,
            data TEXT NULL,
            full_chat_data TEXT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS message (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id INTEGER NOT NULL,
            dialog_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            dialog_name TEXT NULL,
            message_text TEXT NULL,
            message TEXT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (id, dialog_id)
        );

        CREATE INDEX IF NOT EXISTS idx_message_user ON message (user_id, deleted, seq);

        CREATE TABLE IF NOT EXISTS user_dialog (
            dialog_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (dialog_id, user_id)
        );
        "#,
    )?;
    Ok(())
}

const SELECT_MESSAGE: &str =
    "SELECT seq, id, dialog_id, user_id, dialog_name, message_text, message, deleted FROM message";

type RawRow = (
    i64,
    i64,
    i64,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    bool,
);

fn read_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
        r.get(7)?,
    ))
}

fn decode_row(row: RawRow) -> Result<StoredMessage> {
    let (seq, id, dialog_id, user_id, dialog_name, text, raw, deleted) = row;
    let raw = match raw {
        Some(s) if !s.is_empty() => serde_json::from_str(&s)?,
        _ => serde_json::Value::Null,
    };
    Ok(StoredMessage {
        seq,
        id: MessageId(id),
        dialog_id: DialogId(dialog_id),
        user_id: UserId(user_id),
        dialog_name: dialog_name.unwrap_or_default(),
        text: text.unwrap_or_default(),
        raw,
        deleted,
    })
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    async fn upsert_peer(&self, record: PeerRecord) -> Result<()> {
        let data = serde_json::to_string(&record.data)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO peer (id, title, username, peer_type, data)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                username = excluded.username,
                peer_type = excluded.peer_type,
                data = excluded.data
            "#,
            params![
                record.id.0,
                record.title,
                record.username,
                record.peer_type,
                data
            ],
        )?;
        Ok(())
    }

    async fn update_channel_info(
        &self,
        peer_id: DialogId,
        participant_count: Option<u32>,
        raw: &serde_json::Value,
    ) -> Result<()> {
        let raw = serde_json::to_string(raw)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            UPDATE peer
            SET users_count = COALESCE(?1, users_count), full_chat_data = ?2
            WHERE id = ?3
            "#,
            params![participant_count.map(i64::from), raw, peer_id.0],
        )?;
        Ok(())
    }

    async fn register_dialog(&self, dialog_id: DialogId, user_id: UserId) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO user_dialog (dialog_id, user_id) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
            params![dialog_id.0, user_id.0],
        )?;
        Ok(())
    }

    async fn upsert_messages(&self, batch: &[MessageRecord]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let encoded = batch
            .iter()
            .map(|m| serde_json::to_string(&m.raw))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            // `deleted` is not in the update list: it only ever goes 0 -> 1.
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO message (id, dialog_id, user_id, dialog_name, message_text, message)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT (id, dialog_id) DO UPDATE SET
                    user_id = excluded.user_id,
                    dialog_name = excluded.dialog_name,
                    message_text = excluded.message_text,
                    message = excluded.message
                "#,
            )?;
            for (m, raw) in batch.iter().zip(encoded.iter()) {
                stmt.execute(params![
                    m.id.0,
                    m.dialog_id.0,
                    m.user_id.0,
                    m.dialog_name,
                    m.text,
                    raw
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn mark_processed(&self, dialog_id: DialogId, user_id: UserId) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO user_dialog (dialog_id, user_id, processed) VALUES (?1, ?2, 1)
            ON CONFLICT (dialog_id, user_id) DO UPDATE SET processed = 1
            "#,
            params![dialog_id.0, user_id.0],
        )?;
        Ok(())
    }

    async fn is_processed(&self, dialog_id: DialogId, user_id: UserId) -> Result<bool> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT count(*) FROM user_dialog WHERE dialog_id = ?1 AND user_id = ?2 AND processed = 1",
            params![dialog_id.0, user_id.0],
            |r| r.get(0),
        )?;
        Ok(n == 1)
    }

    async fn mark_deleted(&self, message_id: MessageId, dialog_id: DialogId) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE message SET deleted = 1 WHERE id = ?1 AND dialog_id = ?2",
            params![message_id.0, dialog_id.0],
        )?;
        Ok(())
    }

    async fn count(&self, user_id: UserId) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT count(*) FROM message WHERE user_id = ?1 AND deleted = 0",
            params![user_id.0],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    async fn load_batch(
        &self,
        user_id: UserId,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&format!(
                "{SELECT_MESSAGE} WHERE user_id = ?1 AND deleted = 0 AND seq > ?2 ORDER BY seq LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(params![user_id.0, after_seq, limit as i64], read_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter().map(decode_row).collect()
    }
}

/// Lazy, batched walk over a user's non-deleted cached messages.
pub struct MessageStream<'a> {
    store: &'a dyn ProgressStore,
    user_id: UserId,
    after_seq: i64,
    batch_size: usize,
    buf: VecDeque<StoredMessage>,
    exhausted: bool,
}

impl<'a> MessageStream<'a> {
    pub fn new(store: &'a dyn ProgressStore, user_id: UserId, batch_size: usize) -> Self {
        Self {
            store,
            user_id,
            after_seq: 0,
            batch_size: batch_size.max(1),
            buf: VecDeque::new(),
            exhausted: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<StoredMessage>> {
        if self.buf.is_empty() && !self.exhausted {
            let batch = self
                .store
                .load_batch(self.user_id, self.after_seq, self.batch_size)
                .await?;
            if batch.len() < self.batch_size {
                self.exhausted = true;
            }
            if let Some(last) = batch.last() {
                self.after_seq = last.seq;
            }
            self.buf.extend(batch);
        }
        Ok(self.buf.pop_front())
    }
}

/// Non-deleted messages for `user_id`, in store order.
pub fn stream(store: &dyn ProgressStore, user_id: UserId) -> MessageStream<'_> {
    MessageStream::new(store, user_id, DEFAULT_BATCH_SIZE)
}
