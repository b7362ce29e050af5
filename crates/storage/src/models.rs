//! Record families stored by the local store
//!
//! Four families share the same envelope pattern: a generated string
//! identifier, an optional owning user, an epoch-millisecond timestamp, and
//! an arbitrary JSON payload. Every mutation of the first three families
//! produces a [`SyncQueueEntry`] describing the change for later replication.

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Scope label used in derived setting identifiers when no user is set.
pub const GLOBAL_SCOPE: &str = "global";

/// Current epoch time in milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generate a record identifier of the shape `<epoch_millis>_<random suffix>`.
pub fn generate_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("{}_{}", now_millis(), suffix.to_lowercase())
}

/// Derive the deterministic identifier for a setting key.
///
/// Re-saving the same `(user, key)` pair lands on the same identifier, which
/// is what makes setting saves upsert rather than duplicate.
pub fn setting_id(user_id: Option<&str>, key: &str) -> String {
    format!("{}_{}", user_id.unwrap_or(GLOBAL_SCOPE), key)
}

/// A snapshot of captured page content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    /// Generated identifier.
    pub id: String,

    /// Owning user; `None` means global/unauthenticated scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Creation time in epoch milliseconds.
    pub timestamp: i64,

    /// Whether the record has been acknowledged by a remote provider.
    #[serde(default)]
    pub synced: bool,

    /// Last partial-update time in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,

    /// Captured payload fields (title, url, markdown, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Draft for [`CaptureRecord`] — identifier and defaults are assigned at save.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCapture {
    /// Owning user, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Explicit creation time; defaults to the save time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    /// Captured payload fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A history record of one text-transform operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextProcessingRecord {
    /// Generated identifier.
    pub id: String,

    /// Owning user; `None` means global/unauthenticated scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Operation kind (summarize, translate, ...); used for history filters.
    #[serde(rename = "type")]
    pub kind: String,

    /// Creation time in epoch milliseconds.
    pub timestamp: i64,

    /// Whether the record has been acknowledged by a remote provider.
    #[serde(default)]
    pub synced: bool,

    /// Last partial-update time in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,

    /// Operation payload fields (input, output, model, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Draft for [`TextProcessingRecord`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTextProcessing {
    /// Owning user, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Operation kind discriminator.
    #[serde(rename = "type")]
    pub kind: String,

    /// Explicit creation time; defaults to the save time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    /// Operation payload fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A key/value pair scoped to a user (or global).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSetting {
    /// Derived identifier: `(user_id or "global") + "_" + key`.
    pub id: String,

    /// Setting key.
    pub key: String,

    /// Setting value.
    pub value: Value,

    /// Owning user; `None` means global scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Last write time in epoch milliseconds.
    pub updated_at: i64,
}

/// Record family tag carried by queue entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordType {
    /// Capture records.
    Capture,
    /// Text-processing history records.
    TextProcessing,
    /// User settings.
    Settings,
}

impl RecordType {
    /// Stable string form used in queue storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Capture => "capture",
            RecordType::TextProcessing => "textProcessing",
            RecordType::Settings => "settings",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "capture" => Some(RecordType::Capture),
            "textProcessing" => Some(RecordType::TextProcessing),
            "settings" => Some(RecordType::Settings),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mutation kind carried by queue entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    /// A record was created.
    Create,
    /// A record was partially updated.
    Update,
    /// A record was deleted.
    Delete,
}

impl SyncAction {
    /// Stable string form used in queue storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(SyncAction::Create),
            "update" => Some(SyncAction::Update),
            "delete" => Some(SyncAction::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of pending synchronization work.
///
/// The retry counter is monotonically non-decreasing until the entry is
/// removed. An entry whose counter reached the configured maximum is
/// permanently failed: excluded from normal passes, still queryable, and
/// resettable by explicit operator action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueEntry {
    /// Generated identifier.
    pub id: String,

    /// Which record family the mutation touched.
    pub record_type: RecordType,

    /// Which mutation happened.
    pub action: SyncAction,

    /// The full record for create/update, a minimal `{id}` for delete.
    pub payload: Value,

    /// Enqueue time in epoch milliseconds.
    pub timestamp: i64,

    /// Failed attempt count; starts at zero.
    #[serde(default)]
    pub retry_count: u32,

    /// Error message of the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Draft for [`SyncQueueEntry`] — identifier, timestamp, and retry counter
/// are assigned at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSyncQueueEntry {
    /// Which record family the mutation touched.
    pub record_type: RecordType,

    /// Which mutation happened.
    pub action: SyncAction,

    /// Payload to replicate.
    pub payload: Value,
}

/// Aggregate per-user counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    /// Number of capture records.
    pub capture_count: u64,

    /// Number of text-processing records.
    pub text_processing_count: u64,

    /// Timestamp of the most recent queue entry for the user.
    ///
    /// This reflects the last local mutation, not a confirmed remote sync;
    /// the engine's `lastSyncTimestamp` setting carries the latter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<i64>,
}

/// Versioned export/import container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    /// Document format version.
    pub version: u32,

    /// Export time as an ISO-8601 string.
    pub export_date: String,

    /// User the export was scoped to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// The exported records.
    pub data: ExportData,
}

/// Record payload of an [`ExportDocument`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    /// Exported capture records.
    #[serde(default)]
    pub captures: Vec<CaptureRecord>,

    /// Exported text-processing records.
    #[serde(default)]
    pub text_processing: Vec<TextProcessingRecord>,

    /// Exported settings.
    #[serde(default)]
    pub settings: Vec<UserSetting>,
}

/// Counts of records replayed by an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    /// Capture records imported.
    pub captures: usize,

    /// Text-processing records imported.
    pub text_processing: usize,

    /// Settings imported.
    pub settings: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generate_id_shape() {
        let before = now_millis();
        let id = generate_id();
        let after = now_millis();

        let (millis, suffix) = id.split_once('_').unwrap();
        let millis: i64 = millis.parse().unwrap();
        assert!(millis >= before && millis <= after);
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generate_id_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_setting_id_derivation() {
        assert_eq!(setting_id(Some("u1"), "theme"), "u1_theme");
        assert_eq!(setting_id(None, "theme"), "global_theme");
    }

    #[test]
    fn test_record_type_round_trip() {
        for rt in [RecordType::Capture, RecordType::TextProcessing, RecordType::Settings] {
            assert_eq!(RecordType::parse(rt.as_str()), Some(rt));
        }
        assert_eq!(RecordType::parse("bogus"), None);
        assert_eq!(RecordType::TextProcessing.to_string(), "textProcessing");
    }

    #[test]
    fn test_sync_action_round_trip() {
        for action in [SyncAction::Create, SyncAction::Update, SyncAction::Delete] {
            assert_eq!(SyncAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(SyncAction::parse("upsert"), None);
    }

    #[test]
    fn test_capture_record_serde_camel_case() {
        let record = CaptureRecord {
            id: "1_abc".to_string(),
            user_id: Some("u1".to_string()),
            timestamp: 42,
            synced: false,
            updated_at: Some(43),
            fields: {
                let mut fields = Map::new();
                fields.insert("title".to_string(), json!("A"));
                fields
            },
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["userId"], json!("u1"));
        assert_eq!(value["updatedAt"], json!(43));
        assert_eq!(value["title"], json!("A"));

        let back: CaptureRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_text_processing_type_discriminator() {
        let record = TextProcessingRecord {
            id: "1_abc".to_string(),
            user_id: None,
            kind: "summarize".to_string(),
            timestamp: 42,
            synced: false,
            updated_at: None,
            fields: Map::new(),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], json!("summarize"));
    }

    #[test]
    fn test_queue_entry_tag_serialization() {
        let entry = SyncQueueEntry {
            id: "1_abc".to_string(),
            record_type: RecordType::TextProcessing,
            action: SyncAction::Create,
            payload: json!({"id": "2_def"}),
            timestamp: 42,
            retry_count: 0,
            last_error: None,
        };

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["recordType"], json!("textProcessing"));
        assert_eq!(value["action"], json!("create"));
        assert_eq!(value["retryCount"], json!(0));
    }
}
