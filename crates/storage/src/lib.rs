//! Local-first storage layer for clipvault
//!
//! This crate provides the embedded object store: SQLite-backed CRUD over
//! captures, text-processing history, user settings, and the durable sync
//! queue that records every mutation for background replication.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
pub mod models;
pub mod store;

pub use database::{DatabaseConfig, DatabaseError, Migration, SqliteDatabase, SynchronousMode};
pub use models::{
    generate_id, now_millis, setting_id, CaptureRecord, ExportData, ExportDocument, ImportSummary,
    NewCapture, NewSyncQueueEntry, NewTextProcessing, RecordType, SyncAction, SyncQueueEntry,
    TextProcessingRecord, UserSetting, UserStats, GLOBAL_SCOPE,
};
pub use store::{LocalStore, StoreError, DEFAULT_MAX_RETRIES};
