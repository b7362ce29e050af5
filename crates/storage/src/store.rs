//! Local object store
//!
//! Durable CRUD over four record families (captures, text-processing
//! history, settings, sync queue) with secondary lookup by owning user and
//! timestamp. Every mutation of the first three families appends a queue
//! entry describing the change, so no local write can escape the sync
//! pipeline. Queue entries are only ever originated here; the sync engine
//! reads, updates, and removes them but never creates them.

use serde_json::{json, Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;

use crate::database::{DatabaseConfig, DatabaseError, Migration, SqliteDatabase};
use crate::models::{
    generate_id, now_millis, setting_id, CaptureRecord, ExportData, ExportDocument, ImportSummary,
    NewCapture, NewSyncQueueEntry, NewTextProcessing, RecordType, SyncAction, SyncQueueEntry,
    TextProcessingRecord, UserSetting, UserStats,
};

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failure opening or migrating the underlying database.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Engine failure during a CRUD operation.
    #[error("storage error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A record failed to serialize or deserialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Update of a record that does not exist. Caller misuse, not a
    /// transient condition; reads return `None` instead.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored row no longer matches the expected shape.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Retry count at which a queue entry is considered permanently failed.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// How long permanently-failed queue entries are kept before `cleanup`
/// removes them (30 days, in milliseconds).
const QUEUE_RETENTION_MILLIS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Export/import document format version.
const EXPORT_VERSION: u32 = 1;

fn schema_migrations() -> Vec<Migration> {
    vec![
        Migration::new(
            1,
            "captures table",
            "CREATE TABLE IF NOT EXISTS captures (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                timestamp INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER,
                payload TEXT NOT NULL
            )",
        ),
        Migration::new(
            2,
            "captures user index",
            "CREATE INDEX IF NOT EXISTS idx_captures_user ON captures(user_id)",
        ),
        Migration::new(
            3,
            "captures timestamp index",
            "CREATE INDEX IF NOT EXISTS idx_captures_timestamp ON captures(timestamp)",
        ),
        Migration::new(
            4,
            "captures synced index",
            "CREATE INDEX IF NOT EXISTS idx_captures_synced ON captures(synced)",
        ),
        Migration::new(
            5,
            "text_processing table",
            "CREATE TABLE IF NOT EXISTS text_processing (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                kind TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER,
                payload TEXT NOT NULL
            )",
        ),
        Migration::new(
            6,
            "text_processing user index",
            "CREATE INDEX IF NOT EXISTS idx_text_processing_user ON text_processing(user_id)",
        ),
        Migration::new(
            7,
            "text_processing timestamp index",
            "CREATE INDEX IF NOT EXISTS idx_text_processing_timestamp ON text_processing(timestamp)",
        ),
        Migration::new(
            8,
            "text_processing kind index",
            "CREATE INDEX IF NOT EXISTS idx_text_processing_kind ON text_processing(kind)",
        ),
        Migration::new(
            9,
            "settings table",
            "CREATE TABLE IF NOT EXISTS settings (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        ),
        Migration::new(
            10,
            "sync_queue table",
            "CREATE TABLE IF NOT EXISTS sync_queue (
                id TEXT PRIMARY KEY,
                record_type TEXT NOT NULL,
                action TEXT NOT NULL,
                payload TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )",
        ),
        Migration::new(
            11,
            "sync_queue timestamp index",
            "CREATE INDEX IF NOT EXISTS idx_sync_queue_timestamp ON sync_queue(timestamp)",
        ),
        Migration::new(
            12,
            "sync_queue retry index",
            "CREATE INDEX IF NOT EXISTS idx_sync_queue_retry ON sync_queue(retry_count)",
        ),
    ]
}

/// The local object store.
///
/// One long-lived instance per process, constructed with [`LocalStore::open`]
/// and shared by reference. All operations are independent SQLite
/// transactions; a record write and its queue append are two transactions,
/// so a crash between them can leave a record without a queue entry. That
/// window is accepted: providers are expected to be idempotent.
pub struct LocalStore {
    db: SqliteDatabase,
}

impl LocalStore {
    /// Open the store, creating and migrating the database on first run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] wrapping
    /// [`DatabaseError::Unavailable`] when the engine cannot be opened. No
    /// other operation may be issued after that.
    pub async fn open(config: DatabaseConfig) -> Result<Self> {
        let db = SqliteDatabase::open(config).await?;
        db.migrate(&schema_migrations()).await?;
        Ok(Self { db })
    }

    /// Open an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self> {
        let db = SqliteDatabase::in_memory().await?;
        db.migrate(&schema_migrations()).await?;
        Ok(Self { db })
    }

    /// Access the underlying database handle.
    pub fn database(&self) -> &SqliteDatabase {
        &self.db
    }

    // ---- captures -------------------------------------------------------

    /// Persist a new capture and enqueue a `create` entry.
    ///
    /// Assigns a generated identifier, defaults the timestamp to now, and
    /// marks the record unsynced. Returns the assigned identifier.
    pub async fn save_capture(&self, new: NewCapture) -> Result<String> {
        let record = CaptureRecord {
            id: generate_id(),
            user_id: new.user_id,
            timestamp: new.timestamp.unwrap_or_else(now_millis),
            synced: false,
            updated_at: None,
            fields: new.fields,
        };

        self.write_capture(&record).await?;
        self.enqueue(RecordType::Capture, SyncAction::Create, serde_json::to_value(&record)?)
            .await?;

        Ok(record.id)
    }

    /// Fetch a capture by identifier; `None` if absent.
    pub async fn get_capture_by_id(&self, id: &str) -> Result<Option<CaptureRecord>> {
        let row = sqlx::query("SELECT payload FROM captures WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        row.map(|row| parse_payload(&row)).transpose()
    }

    /// Merge `partial` fields over an existing capture and enqueue an
    /// `update` entry carrying the full merged record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no capture has this identifier.
    pub async fn update_capture(
        &self,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<CaptureRecord> {
        let existing = self
            .get_capture_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("capture {id}")))?;

        let merged: CaptureRecord = merge_record(serde_json::to_value(&existing)?, id, partial)?;

        self.write_capture(&merged).await?;
        self.enqueue(RecordType::Capture, SyncAction::Update, serde_json::to_value(&merged)?)
            .await?;

        Ok(merged)
    }

    /// Remove a capture and enqueue a `delete` entry carrying only the
    /// identifier.
    pub async fn delete_capture(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM captures WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        self.enqueue(RecordType::Capture, SyncAction::Delete, json!({ "id": id }))
            .await
    }

    /// List captures, newest first.
    ///
    /// `user_id` filters by owning user; `None` returns every capture. The
    /// descending timestamp order is part of the contract.
    pub async fn get_captures(
        &self,
        user_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<CaptureRecord>> {
        let rows = match user_id {
            Some(uid) => {
                sqlx::query(
                    "SELECT payload FROM captures WHERE user_id = ? ORDER BY timestamp DESC",
                )
                .bind(uid)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query("SELECT payload FROM captures ORDER BY timestamp DESC")
                    .fetch_all(self.db.pool())
                    .await?
            }
        };

        collect_records(rows, limit)
    }

    async fn write_capture(&self, record: &CaptureRecord) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO captures (id, user_id, timestamp, synced, updated_at, payload)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(record.timestamp)
        .bind(record.synced)
        .bind(record.updated_at)
        .bind(serde_json::to_string(record)?)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    // ---- text processing ------------------------------------------------

    /// Persist a new text-processing record and enqueue a `create` entry.
    pub async fn save_text_processing(&self, new: NewTextProcessing) -> Result<String> {
        let record = TextProcessingRecord {
            id: generate_id(),
            user_id: new.user_id,
            kind: new.kind,
            timestamp: new.timestamp.unwrap_or_else(now_millis),
            synced: false,
            updated_at: None,
            fields: new.fields,
        };

        self.write_text_processing(&record).await?;
        self.enqueue(
            RecordType::TextProcessing,
            SyncAction::Create,
            serde_json::to_value(&record)?,
        )
        .await?;

        Ok(record.id)
    }

    /// Fetch a text-processing record by identifier; `None` if absent.
    pub async fn get_text_processing_by_id(&self, id: &str) -> Result<Option<TextProcessingRecord>> {
        let row = sqlx::query("SELECT payload FROM text_processing WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        row.map(|row| parse_payload(&row)).transpose()
    }

    /// Merge `partial` fields over an existing text-processing record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no record has this identifier.
    pub async fn update_text_processing(
        &self,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<TextProcessingRecord> {
        let existing = self
            .get_text_processing_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("text processing record {id}")))?;

        let merged: TextProcessingRecord =
            merge_record(serde_json::to_value(&existing)?, id, partial)?;

        self.write_text_processing(&merged).await?;
        self.enqueue(
            RecordType::TextProcessing,
            SyncAction::Update,
            serde_json::to_value(&merged)?,
        )
        .await?;

        Ok(merged)
    }

    /// Remove a text-processing record and enqueue a `delete` entry.
    pub async fn delete_text_processing(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM text_processing WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        self.enqueue(RecordType::TextProcessing, SyncAction::Delete, json!({ "id": id }))
            .await
    }

    /// List text-processing records, newest first, optionally filtered by
    /// owning user and operation kind.
    pub async fn get_text_processing(
        &self,
        user_id: Option<&str>,
        kind: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<TextProcessingRecord>> {
        let mut sql = String::from("SELECT payload FROM text_processing");
        let mut clauses = Vec::new();
        if user_id.is_some() {
            clauses.push("user_id = ?");
        }
        if kind.is_some() {
            clauses.push("kind = ?");
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp DESC");

        let mut query = sqlx::query(&sql);
        if let Some(uid) = user_id {
            query = query.bind(uid);
        }
        if let Some(kind) = kind {
            query = query.bind(kind);
        }

        let rows = query.fetch_all(self.db.pool()).await?;
        collect_records(rows, limit)
    }

    async fn write_text_processing(&self, record: &TextProcessingRecord) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO text_processing
                (id, user_id, kind, timestamp, synced, updated_at, payload)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.kind)
        .bind(record.timestamp)
        .bind(record.synced)
        .bind(record.updated_at)
        .bind(serde_json::to_string(record)?)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    // ---- settings -------------------------------------------------------

    /// Save (upsert) a setting and enqueue a `create` entry.
    ///
    /// The identifier is derived from `(user_id or "global") + "_" + key`,
    /// so re-saving the same key for the same user overwrites in place.
    /// Returns the derived identifier.
    pub async fn save_setting(
        &self,
        key: &str,
        value: Value,
        user_id: Option<&str>,
    ) -> Result<String> {
        let setting = self.write_setting(key, value, user_id).await?;
        self.enqueue(RecordType::Settings, SyncAction::Create, serde_json::to_value(&setting)?)
            .await?;

        Ok(setting.id)
    }

    /// Save a device-local setting without enqueueing sync work.
    ///
    /// Used for process-wide engine bookkeeping (`autoSyncEnabled`,
    /// `lastSyncTimestamp`) that must not re-enter the sync pipeline.
    pub async fn set_local_setting(&self, key: &str, value: Value) -> Result<()> {
        self.write_setting(key, value, None).await.map(|_| ())
    }

    /// Fetch a setting by key and scope; `None` if absent.
    pub async fn get_setting(&self, key: &str, user_id: Option<&str>) -> Result<Option<UserSetting>> {
        let row = sqlx::query("SELECT id, user_id, key, value, updated_at FROM settings WHERE id = ?")
            .bind(setting_id(user_id, key))
            .fetch_optional(self.db.pool())
            .await?;

        row.map(row_to_setting).transpose()
    }

    /// List settings for a user; `None` returns every stored setting.
    pub async fn get_settings(&self, user_id: Option<&str>) -> Result<Vec<UserSetting>> {
        let rows = match user_id {
            Some(uid) => {
                sqlx::query("SELECT id, user_id, key, value, updated_at FROM settings WHERE user_id = ?")
                    .bind(uid)
                    .fetch_all(self.db.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT id, user_id, key, value, updated_at FROM settings")
                    .fetch_all(self.db.pool())
                    .await?
            }
        };

        rows.into_iter().map(row_to_setting).collect()
    }

    /// Remove a setting and enqueue a `delete` entry.
    pub async fn delete_setting(&self, key: &str, user_id: Option<&str>) -> Result<()> {
        let id = setting_id(user_id, key);

        sqlx::query("DELETE FROM settings WHERE id = ?")
            .bind(&id)
            .execute(self.db.pool())
            .await?;

        self.enqueue(RecordType::Settings, SyncAction::Delete, json!({ "id": id }))
            .await
    }

    async fn write_setting(
        &self,
        key: &str,
        value: Value,
        user_id: Option<&str>,
    ) -> Result<UserSetting> {
        let setting = UserSetting {
            id: setting_id(user_id, key),
            key: key.to_string(),
            value,
            user_id: user_id.map(str::to_string),
            updated_at: now_millis(),
        };

        sqlx::query(
            "INSERT OR REPLACE INTO settings (id, user_id, key, value, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&setting.id)
        .bind(&setting.user_id)
        .bind(&setting.key)
        .bind(serde_json::to_string(&setting.value)?)
        .bind(setting.updated_at)
        .execute(self.db.pool())
        .await?;

        Ok(setting)
    }

    // ---- sync queue -----------------------------------------------------

    /// Append a queue entry with a generated identifier, the current
    /// timestamp, and a zero retry counter. Returns the identifier.
    pub async fn add_to_sync_queue(&self, new: NewSyncQueueEntry) -> Result<String> {
        let entry = SyncQueueEntry {
            id: generate_id(),
            record_type: new.record_type,
            action: new.action,
            payload: new.payload,
            timestamp: now_millis(),
            retry_count: 0,
            last_error: None,
        };

        sqlx::query(
            "INSERT INTO sync_queue (id, record_type, action, payload, timestamp, retry_count, last_error)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(entry.record_type.as_str())
        .bind(entry.action.as_str())
        .bind(serde_json::to_string(&entry.payload)?)
        .bind(entry.timestamp)
        .bind(entry.retry_count as i64)
        .bind(&entry.last_error)
        .execute(self.db.pool())
        .await?;

        Ok(entry.id)
    }

    /// List every queue entry, oldest first.
    ///
    /// The ascending enqueue-timestamp order is part of the contract: sync
    /// passes process items in FIFO order.
    pub async fn get_sync_queue(&self) -> Result<Vec<SyncQueueEntry>> {
        let rows = sqlx::query(
            "SELECT id, record_type, action, payload, timestamp, retry_count, last_error
             FROM sync_queue ORDER BY timestamp ASC, rowid ASC",
        )
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(row_to_queue_entry).collect()
    }

    /// List queue entries still eligible for sync (retry below the maximum),
    /// oldest first.
    pub async fn get_pending_sync_queue(&self, max_retries: u32) -> Result<Vec<SyncQueueEntry>> {
        let rows = sqlx::query(
            "SELECT id, record_type, action, payload, timestamp, retry_count, last_error
             FROM sync_queue WHERE retry_count < ? ORDER BY timestamp ASC, rowid ASC",
        )
        .bind(max_retries as i64)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(row_to_queue_entry).collect()
    }

    /// List permanently-failed queue entries (retry at or above the
    /// maximum), oldest first.
    pub async fn get_failed_sync_queue(&self, max_retries: u32) -> Result<Vec<SyncQueueEntry>> {
        let rows = sqlx::query(
            "SELECT id, record_type, action, payload, timestamp, retry_count, last_error
             FROM sync_queue WHERE retry_count >= ? ORDER BY timestamp ASC, rowid ASC",
        )
        .bind(max_retries as i64)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(row_to_queue_entry).collect()
    }

    /// Fetch a single queue entry by identifier; `None` if it was removed.
    pub async fn get_sync_queue_item(&self, id: &str) -> Result<Option<SyncQueueEntry>> {
        let row = sqlx::query(
            "SELECT id, record_type, action, payload, timestamp, retry_count, last_error
             FROM sync_queue WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(row_to_queue_entry).transpose()
    }

    /// Remove a queue entry, typically after a provider accepted it.
    pub async fn remove_sync_queue_item(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    /// Update retry bookkeeping on a queue entry.
    ///
    /// Missing entries are ignored: a deferred retry may race a full pass
    /// that already removed the entry.
    pub async fn update_sync_queue_item(
        &self,
        id: &str,
        retry_count: u32,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE sync_queue SET retry_count = ?, last_error = ? WHERE id = ?")
            .bind(retry_count as i64)
            .bind(last_error)
            .bind(id)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    /// Remove every queue entry.
    pub async fn clear_sync_queue(&self) -> Result<()> {
        sqlx::query("DELETE FROM sync_queue")
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    // ---- aggregates -----------------------------------------------------

    /// Count a user's records and report their most recent queue activity.
    pub async fn get_user_stats(&self, user_id: Option<&str>) -> Result<UserStats> {
        let capture_count: i64 = match user_id {
            Some(uid) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM captures WHERE user_id = ?")
                    .bind(uid)
                    .fetch_one(self.db.pool())
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM captures")
                    .fetch_one(self.db.pool())
                    .await?
            }
        };

        let text_processing_count: i64 = match user_id {
            Some(uid) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM text_processing WHERE user_id = ?")
                    .bind(uid)
                    .fetch_one(self.db.pool())
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM text_processing")
                    .fetch_one(self.db.pool())
                    .await?
            }
        };

        let last_sync: Option<i64> = match user_id {
            Some(uid) => {
                sqlx::query_scalar(
                    "SELECT MAX(timestamp) FROM sync_queue
                     WHERE json_extract(payload, '$.userId') = ?",
                )
                .bind(uid)
                .fetch_one(self.db.pool())
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT MAX(timestamp) FROM sync_queue")
                    .fetch_one(self.db.pool())
                    .await?
            }
        };

        Ok(UserStats {
            capture_count: capture_count as u64,
            text_processing_count: text_processing_count as u64,
            last_sync,
        })
    }

    /// Serialize a user's captures, text-processing records, and settings
    /// (or everything, when `user_id` is `None`) into a versioned document.
    pub async fn export_data(&self, user_id: Option<&str>) -> Result<ExportDocument> {
        let captures = self.get_captures(user_id, None).await?;
        let text_processing = self.get_text_processing(user_id, None, None).await?;
        let settings = self.get_settings(user_id).await?;

        Ok(ExportDocument {
            version: EXPORT_VERSION,
            export_date: chrono::Utc::now().to_rfc3339(),
            user_id: user_id.map(str::to_string),
            data: ExportData {
                captures,
                text_processing,
                settings,
            },
        })
    }

    /// Replay an exported document through the normal save paths.
    ///
    /// Imported records receive new generated identifiers and are
    /// re-enqueued for sync; this is "replay as new writes", not a raw
    /// restore. `user_id` overrides record ownership when given.
    pub async fn import_data(
        &self,
        document: ExportDocument,
        user_id: Option<&str>,
    ) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();

        for record in document.data.captures {
            self.save_capture(NewCapture {
                user_id: user_id.map(str::to_string).or(record.user_id),
                timestamp: Some(record.timestamp),
                fields: record.fields,
            })
            .await?;
            summary.captures += 1;
        }

        for record in document.data.text_processing {
            self.save_text_processing(NewTextProcessing {
                user_id: user_id.map(str::to_string).or(record.user_id),
                kind: record.kind,
                timestamp: Some(record.timestamp),
                fields: record.fields,
            })
            .await?;
            summary.text_processing += 1;
        }

        for setting in document.data.settings {
            let owner = user_id.map(str::to_string).or(setting.user_id);
            self.save_setting(&setting.key, setting.value, owner.as_deref())
                .await?;
            summary.settings += 1;
        }

        tracing::info!(
            captures = summary.captures,
            text_processing = summary.text_processing,
            settings = summary.settings,
            "import finished"
        );

        Ok(summary)
    }

    /// Delete a user's records across all families, including their queue
    /// entries; with no user, wipe all four families entirely.
    pub async fn clear_user_data(&self, user_id: Option<&str>) -> Result<()> {
        match user_id {
            Some(uid) => {
                sqlx::query("DELETE FROM captures WHERE user_id = ?")
                    .bind(uid)
                    .execute(self.db.pool())
                    .await?;
                sqlx::query("DELETE FROM text_processing WHERE user_id = ?")
                    .bind(uid)
                    .execute(self.db.pool())
                    .await?;
                sqlx::query("DELETE FROM settings WHERE user_id = ?")
                    .bind(uid)
                    .execute(self.db.pool())
                    .await?;
                sqlx::query("DELETE FROM sync_queue WHERE json_extract(payload, '$.userId') = ?")
                    .bind(uid)
                    .execute(self.db.pool())
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM captures").execute(self.db.pool()).await?;
                sqlx::query("DELETE FROM text_processing").execute(self.db.pool()).await?;
                sqlx::query("DELETE FROM settings").execute(self.db.pool()).await?;
                sqlx::query("DELETE FROM sync_queue").execute(self.db.pool()).await?;
            }
        }

        Ok(())
    }

    /// Remove queue entries past the retention window that also exhausted
    /// their retries, so permanent failures do not accumulate unboundedly.
    /// Returns the number of entries removed.
    pub async fn cleanup(&self) -> Result<u64> {
        let cutoff = now_millis() - QUEUE_RETENTION_MILLIS;

        let result = sqlx::query("DELETE FROM sync_queue WHERE timestamp < ? AND retry_count >= ?")
            .bind(cutoff)
            .bind(DEFAULT_MAX_RETRIES as i64)
            .execute(self.db.pool())
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!(removed, "cleaned up stale sync queue entries");
        }

        Ok(removed)
    }

    async fn enqueue(
        &self,
        record_type: RecordType,
        action: SyncAction,
        payload: Value,
    ) -> Result<()> {
        self.add_to_sync_queue(NewSyncQueueEntry {
            record_type,
            action,
            payload,
        })
        .await?;

        tracing::debug!(%record_type, %action, "queued mutation for sync");
        Ok(())
    }
}

/// Shallow-merge `partial` over a serialized record, pinning the identifier
/// and refreshing the update timestamp.
fn merge_record<T: serde::de::DeserializeOwned>(
    existing: Value,
    id: &str,
    partial: Map<String, Value>,
) -> Result<T> {
    let Value::Object(mut merged) = existing else {
        return Err(StoreError::Corrupt(format!("record {id} is not an object")));
    };

    for (key, value) in partial {
        merged.insert(key, value);
    }
    merged.insert("id".to_string(), json!(id));
    merged.insert("updatedAt".to_string(), json!(now_millis()));

    Ok(serde_json::from_value(Value::Object(merged))?)
}

fn parse_payload<T: serde::de::DeserializeOwned>(row: &SqliteRow) -> Result<T> {
    let payload: String = row.get("payload");
    Ok(serde_json::from_str(&payload)?)
}

fn collect_records<T: serde::de::DeserializeOwned>(
    rows: Vec<SqliteRow>,
    limit: Option<usize>,
) -> Result<Vec<T>> {
    let mut records = rows
        .iter()
        .map(parse_payload)
        .collect::<Result<Vec<T>>>()?;

    if let Some(limit) = limit {
        records.truncate(limit);
    }

    Ok(records)
}

fn row_to_setting(row: SqliteRow) -> Result<UserSetting> {
    let value: String = row.get("value");

    Ok(UserSetting {
        id: row.get("id"),
        key: row.get("key"),
        value: serde_json::from_str(&value)?,
        user_id: row.get("user_id"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_queue_entry(row: SqliteRow) -> Result<SyncQueueEntry> {
    let record_type: String = row.get("record_type");
    let record_type = RecordType::parse(&record_type)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown record type: {record_type}")))?;

    let action: String = row.get("action");
    let action = SyncAction::parse(&action)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown sync action: {action}")))?;

    let payload: String = row.get("payload");
    let retry_count: i64 = row.get("retry_count");

    Ok(SyncQueueEntry {
        id: row.get("id"),
        record_type,
        action,
        payload: serde_json::from_str(&payload)?,
        timestamp: row.get("timestamp"),
        retry_count: retry_count as u32,
        last_error: row.get("last_error"),
    })
}
