//! Background sync engine
//!
//! Drains the local store's sync queue against the registered providers,
//! with bounded retries, exponential backoff, and an optional periodic
//! auto-sync task. One engine instance lives for the whole process; at most
//! one full pass runs at any time.

use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use storage::{now_millis, LocalStore, StoreError, SyncQueueEntry, DEFAULT_MAX_RETRIES};

use crate::provider::SyncProvider;

/// Setting key for the persisted auto-sync flag.
const AUTO_SYNC_KEY: &str = "autoSyncEnabled";

/// Setting key for the persisted last-sync timestamp.
const LAST_SYNC_KEY: &str = "lastSyncTimestamp";

/// Engine error types
#[derive(Debug, Error)]
pub enum EngineError {
    /// The local store failed underneath the engine.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry count at which an entry becomes permanently failed.
    pub max_retries: u32,

    /// Backoff delays indexed by attempt number, clamped to the last value.
    pub backoff: Vec<Duration>,

    /// How often the auto-sync task triggers a full pass.
    pub auto_sync_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(15),
                Duration::from_secs(60),
                Duration::from_secs(300),
            ],
            auto_sync_interval: Duration::from_secs(300),
        }
    }
}

impl SyncConfig {
    /// Set the maximum retry count
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the backoff schedule
    pub fn backoff(mut self, delays: Vec<Duration>) -> Self {
        self.backoff = delays;
        self
    }

    /// Set the auto-sync interval
    pub fn auto_sync_interval(mut self, interval: Duration) -> Self {
        self.auto_sync_interval = interval;
        self
    }

    /// Backoff delay for the given attempt number (1-based), clamped to the
    /// last schedule entry once attempts run past the end.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        const FALLBACK: Duration = Duration::from_secs(300);

        let index = attempt.saturating_sub(1) as usize;
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(FALLBACK)
    }
}

/// Outcome of one full sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Whether the pass itself ran to completion.
    pub success: bool,

    /// Items accepted by a provider and removed from the queue.
    pub synced: usize,

    /// Items routed to retry handling.
    pub failed: usize,

    /// Top-level failure, if the pass could not run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncReport {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            synced: 0,
            failed: 0,
            error: Some(error.into()),
        }
    }
}

/// Snapshot of engine state for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Whether a full pass is running right now.
    pub is_syncing: bool,

    /// Queue entries still eligible for sync.
    pub pending_items: usize,

    /// Persisted auto-sync flag.
    pub auto_sync_enabled: bool,

    /// Persisted completion time of the most recent pass, epoch millis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<i64>,

    /// Error message of the most recent permanently-failed entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Resets the busy flag when a pass ends, even if its future is dropped.
struct PassGuard(Arc<AtomicBool>);

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The background sync coordinator.
///
/// Owns the ordered provider list and all retry bookkeeping. Reads and
/// removes queue entries but never originates them; only the store's own
/// mutation methods append queue work.
pub struct SyncEngine {
    store: Arc<LocalStore>,
    config: SyncConfig,
    providers: Arc<RwLock<Vec<Arc<dyn SyncProvider>>>>,
    syncing: Arc<AtomicBool>,
    auto_sync_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SyncEngine {
    /// Create an engine with the default configuration.
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self::with_config(store, SyncConfig::default())
    }

    /// Create an engine with an explicit configuration.
    pub fn with_config(store: Arc<LocalStore>, config: SyncConfig) -> Self {
        Self {
            store,
            config,
            providers: Arc::new(RwLock::new(Vec::new())),
            syncing: Arc::new(AtomicBool::new(false)),
            auto_sync_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Register a provider at the end of the ordered list.
    pub async fn add_provider(&self, provider: Arc<dyn SyncProvider>) {
        self.providers.write().await.push(provider);
    }

    /// Remove a previously registered provider (by identity).
    pub async fn remove_provider(&self, provider: &Arc<dyn SyncProvider>) {
        self.providers
            .write()
            .await
            .retain(|p| !Arc::ptr_eq(p, provider));
    }

    /// Whether a full pass is running right now.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Run one full sync pass.
    ///
    /// At most one pass runs system-wide: a second concurrent call reports
    /// "Sync already in progress" without touching the queue. The check and
    /// set of the busy flag happen with no suspension point in between, so
    /// the cooperative scheduler cannot interleave another pass.
    ///
    /// Never returns an error; top-level faults are captured in the report.
    pub async fn sync_all(&self) -> SyncReport {
        if self.syncing.swap(true, Ordering::SeqCst) {
            return SyncReport::failure("Sync already in progress");
        }
        let _guard = PassGuard(Arc::clone(&self.syncing));

        self.run_pass().await
    }

    async fn run_pass(&self) -> SyncReport {
        let providers = self.providers.read().await.clone();
        let authenticated: Vec<_> = providers
            .into_iter()
            .filter(|p| p.is_authenticated())
            .collect();

        if authenticated.is_empty() {
            return SyncReport::failure("No authenticated sync providers");
        }

        let pending = match self.store.get_pending_sync_queue(self.config.max_retries).await {
            Ok(pending) => pending,
            Err(e) => return SyncReport::failure(e.to_string()),
        };

        let mut synced = 0;
        let mut failed = 0;

        for entry in &pending {
            match self.attempt_item(&authenticated, entry).await {
                Ok(()) => match self.store.remove_sync_queue_item(&entry.id).await {
                    Ok(()) => synced += 1,
                    Err(e) => {
                        failed += 1;
                        tracing::error!(item = %entry.id, "failed to dequeue synced item: {e}");
                    }
                },
                Err(message) => {
                    failed += 1;
                    self.handle_sync_failure(entry, &message).await;
                }
            }
        }

        // Completion time is recorded regardless of per-item outcomes, and
        // as a device-local setting so it does not re-enter the queue.
        if let Err(e) = self
            .store
            .set_local_setting(LAST_SYNC_KEY, json!(now_millis()))
            .await
        {
            tracing::warn!("failed to persist last-sync timestamp: {e}");
        }

        tracing::info!(synced, failed, "sync pass finished");

        SyncReport {
            success: true,
            synced,
            failed,
            error: None,
        }
    }

    /// Offer one entry to the authenticated providers in order; the first
    /// acceptance wins and no later provider is consulted.
    async fn attempt_item(
        &self,
        providers: &[Arc<dyn SyncProvider>],
        entry: &SyncQueueEntry,
    ) -> std::result::Result<(), String> {
        let mut last_error = String::from("no provider accepted the item");

        for provider in providers {
            match provider.sync_item(entry).await {
                Ok(true) => return Ok(()),
                Ok(false) => last_error = "provider declined the item".to_string(),
                Err(e) => last_error = e.to_string(),
            }
        }

        Err(last_error)
    }

    /// Per-item failure bookkeeping.
    ///
    /// Below the retry maximum, persists the incremented counter and error
    /// and schedules exactly one deferred single-item retry after the
    /// backoff delay for that attempt. At the maximum, the entry is marked
    /// permanently failed and nothing further is scheduled.
    async fn handle_sync_failure(&self, entry: &SyncQueueEntry, error: &str) {
        let retries = entry.retry_count + 1;

        if retries >= self.config.max_retries {
            let message = format!("Max retries exceeded: {error}");
            if let Err(e) = self
                .store
                .update_sync_queue_item(&entry.id, retries, Some(&message))
                .await
            {
                tracing::error!(item = %entry.id, "failed to record permanent failure: {e}");
            }
            tracing::warn!(item = %entry.id, retries, "sync item permanently failed");
            return;
        }

        if let Err(e) = self
            .store
            .update_sync_queue_item(&entry.id, retries, Some(error))
            .await
        {
            tracing::error!(item = %entry.id, "failed to record retry: {e}");
            return;
        }

        let delay = self.config.backoff_delay(retries);
        tracing::debug!(item = %entry.id, retries, ?delay, "scheduling sync retry");
        self.schedule_retry(entry.id.clone(), delay);
    }

    fn schedule_retry(&self, id: String, delay: Duration) {
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // A full pass owns the queue right now and will handle this
            // entry itself; bowing out avoids double-processing.
            if engine.is_syncing() {
                return;
            }

            engine.retry_item(&id).await;
        });
    }

    async fn retry_item(&self, id: &str) {
        let entry = match self.store.get_sync_queue_item(id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(item = %id, "failed to load entry for retry: {e}");
                return;
            }
        };

        if entry.retry_count >= self.config.max_retries {
            return;
        }

        let providers = self.providers.read().await.clone();
        let authenticated: Vec<_> = providers
            .into_iter()
            .filter(|p| p.is_authenticated())
            .collect();
        if authenticated.is_empty() {
            return;
        }

        match self.attempt_item(&authenticated, &entry).await {
            Ok(()) => {
                if let Err(e) = self.store.remove_sync_queue_item(id).await {
                    tracing::error!(item = %id, "failed to dequeue retried item: {e}");
                }
            }
            Err(message) => self.handle_sync_failure(&entry, &message).await,
        }
    }

    /// Reset every permanently-failed entry and run a full pass.
    pub async fn force_sync_all(&self) -> Result<SyncReport> {
        self.reset_failed_items().await?;
        Ok(self.sync_all().await)
    }

    /// Reset permanently-failed entries back to `retry_count = 0` (clearing
    /// their errors) and run a full pass over the result.
    pub async fn retry_failed_items(&self) -> Result<SyncReport> {
        self.reset_failed_items().await?;
        Ok(self.sync_all().await)
    }

    async fn reset_failed_items(&self) -> Result<usize> {
        let failed = self
            .store
            .get_failed_sync_queue(self.config.max_retries)
            .await?;

        for entry in &failed {
            self.store
                .update_sync_queue_item(&entry.id, 0, None)
                .await?;
        }

        Ok(failed.len())
    }

    /// List permanently-failed queue entries.
    pub async fn get_failed_items(&self) -> Result<Vec<SyncQueueEntry>> {
        Ok(self
            .store
            .get_failed_sync_queue(self.config.max_retries)
            .await?)
    }

    /// Remove every permanently-failed queue entry. Returns how many were
    /// removed.
    pub async fn clear_failed_items(&self) -> Result<usize> {
        let failed = self
            .store
            .get_failed_sync_queue(self.config.max_retries)
            .await?;

        for entry in &failed {
            self.store.remove_sync_queue_item(&entry.id).await?;
        }

        Ok(failed.len())
    }

    /// Persist the auto-sync flag and start the periodic pass task.
    ///
    /// Idempotent: enabling while already enabled keeps the running task.
    pub async fn enable_auto_sync(&self) -> Result<()> {
        self.store
            .set_local_setting(AUTO_SYNC_KEY, json!(true))
            .await?;

        let mut task = self.auto_sync_task.lock().await;
        if task.is_some() {
            return Ok(());
        }

        let engine = self.clone();
        let interval = self.config.auto_sync_interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; consume it so passes
            // start one interval from now.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if engine.is_syncing() {
                    continue;
                }
                let report = engine.sync_all().await;
                if let Some(error) = report.error {
                    tracing::warn!(%error, "auto-sync pass did not run");
                }
            }
        }));

        tracing::info!(?interval, "auto-sync enabled");
        Ok(())
    }

    /// Persist the auto-sync flag off and cancel the periodic task.
    pub async fn disable_auto_sync(&self) -> Result<()> {
        self.store
            .set_local_setting(AUTO_SYNC_KEY, json!(false))
            .await?;

        if let Some(task) = self.auto_sync_task.lock().await.take() {
            task.abort();
        }

        tracing::info!("auto-sync disabled");
        Ok(())
    }

    /// Report engine state for a status display.
    pub async fn get_sync_status(&self) -> Result<SyncStatus> {
        let pending = self
            .store
            .get_pending_sync_queue(self.config.max_retries)
            .await?;

        let auto_sync_enabled = self
            .store
            .get_setting(AUTO_SYNC_KEY, None)
            .await?
            .map(|s| s.value.as_bool().unwrap_or(false))
            .unwrap_or(false);

        let last_sync = self
            .store
            .get_setting(LAST_SYNC_KEY, None)
            .await?
            .and_then(|s| s.value.as_i64());

        let failed = self
            .store
            .get_failed_sync_queue(self.config.max_retries)
            .await?;
        let last_error = failed.last().and_then(|e| e.last_error.clone());

        Ok(SyncStatus {
            is_syncing: self.is_syncing(),
            pending_items: pending.len(),
            auto_sync_enabled,
            last_sync,
            last_error,
        })
    }

    /// Cancel the auto-sync task. Idempotent; in-flight passes are not
    /// interrupted.
    pub async fn destroy(&self) {
        if let Some(task) = self.auto_sync_task.lock().await.take() {
            task.abort();
        }
    }
}

impl Clone for SyncEngine {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            providers: Arc::clone(&self.providers),
            syncing: Arc::clone(&self.syncing),
            auto_sync_task: Arc::clone(&self.auto_sync_task),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::sync::atomic::AtomicUsize;
    use storage::NewCapture;

    /// Provider with a fixed authentication state and answer.
    struct StaticProvider {
        authenticated: bool,
        accept: bool,
        calls: AtomicUsize,
    }

    impl StaticProvider {
        fn accepting() -> Arc<Self> {
            Arc::new(Self {
                authenticated: true,
                accept: true,
                calls: AtomicUsize::new(0),
            })
        }

        fn declining() -> Arc<Self> {
            Arc::new(Self {
                authenticated: true,
                accept: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn unauthenticated() -> Arc<Self> {
            Arc::new(Self {
                authenticated: false,
                accept: true,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SyncProvider for StaticProvider {
        fn is_authenticated(&self) -> bool {
            self.authenticated
        }

        fn user_id(&self) -> Option<String> {
            self.authenticated.then(|| "u1".to_string())
        }

        async fn sync_item(&self, _entry: &SyncQueueEntry) -> std::result::Result<bool, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.accept)
        }
    }

    /// Provider that fails a fixed number of times before accepting.
    struct FlakyProvider {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl SyncProvider for FlakyProvider {
        fn is_authenticated(&self) -> bool {
            true
        }

        fn user_id(&self) -> Option<String> {
            Some("u1".to_string())
        }

        async fn sync_item(&self, _entry: &SyncQueueEntry) -> std::result::Result<bool, ProviderError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(ProviderError::Network("connection reset".to_string()));
            }
            Ok(true)
        }
    }

    /// Provider that holds each sync for a while, for concurrency tests.
    struct SlowProvider {
        delay: Duration,
    }

    #[async_trait]
    impl SyncProvider for SlowProvider {
        fn is_authenticated(&self) -> bool {
            true
        }

        fn user_id(&self) -> Option<String> {
            Some("u1".to_string())
        }

        async fn sync_item(&self, _entry: &SyncQueueEntry) -> std::result::Result<bool, ProviderError> {
            tokio::time::sleep(self.delay).await;
            Ok(true)
        }
    }

    async fn engine_with(config: SyncConfig) -> (Arc<LocalStore>, SyncEngine) {
        let store = Arc::new(LocalStore::in_memory().await.unwrap());
        let engine = SyncEngine::with_config(Arc::clone(&store), config);
        (store, engine)
    }

    /// Backoff long enough that deferred retries never fire inside a test.
    fn no_deferred_retries() -> SyncConfig {
        SyncConfig::default().backoff(vec![Duration::from_secs(3600)])
    }

    async fn save_capture(store: &LocalStore, title: &str) -> String {
        let mut fields = Map::new();
        fields.insert("title".to_string(), json!(title));
        store
            .save_capture(NewCapture {
                user_id: Some("u1".to_string()),
                timestamp: None,
                fields,
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_backoff_schedule_clamps() {
        let config = SyncConfig::default();

        assert_eq!(config.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(5));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(15));
        assert_eq!(config.backoff_delay(4), Duration::from_secs(60));
        assert_eq!(config.backoff_delay(5), Duration::from_secs(300));
        assert_eq!(config.backoff_delay(99), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_sync_all_drains_queue_and_keeps_records() {
        let (store, engine) = engine_with(no_deferred_retries()).await;
        engine.add_provider(StaticProvider::accepting()).await;

        save_capture(&store, "A").await;
        assert_eq!(store.get_sync_queue().await.unwrap().len(), 1);

        let report = engine.sync_all().await;
        assert!(report.success);
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 0);

        // Sync removes the queue entry, not the record.
        assert!(store.get_sync_queue().await.unwrap().is_empty());
        assert_eq!(store.get_captures(Some("u1"), None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sync_reports_in_progress() {
        let (store, engine) = engine_with(no_deferred_retries()).await;
        engine
            .add_provider(Arc::new(SlowProvider {
                delay: Duration::from_millis(200),
            }))
            .await;

        save_capture(&store, "A").await;

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.sync_all().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = engine.sync_all().await;
        assert!(!second.success);
        assert_eq!(second.error.as_deref(), Some("Sync already in progress"));
        assert_eq!(second.synced, 0);

        let first = first.await.unwrap();
        assert!(first.success);
        assert_eq!(first.synced, 1);
    }

    #[tokio::test]
    async fn test_sync_without_authenticated_providers() {
        let (store, engine) = engine_with(no_deferred_retries()).await;
        engine.add_provider(StaticProvider::unauthenticated()).await;

        save_capture(&store, "A").await;

        let report = engine.sync_all().await;
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("No authenticated sync providers"));

        // Nothing was attempted; the entry did not burn a retry.
        let queue = store.get_sync_queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_first_accepting_provider_wins() {
        let (store, engine) = engine_with(no_deferred_retries()).await;

        let skipped = StaticProvider::unauthenticated();
        let winner = StaticProvider::accepting();
        let never_reached = StaticProvider::accepting();

        engine.add_provider(skipped.clone()).await;
        engine.add_provider(winner.clone()).await;
        engine.add_provider(never_reached.clone()).await;

        save_capture(&store, "A").await;
        let report = engine.sync_all().await;

        assert_eq!(report.synced, 1);
        assert_eq!(skipped.calls(), 0);
        assert_eq!(winner.calls(), 1);
        assert_eq!(never_reached.calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_increments_retry_and_records_error() {
        let (store, engine) = engine_with(no_deferred_retries()).await;
        engine.add_provider(StaticProvider::declining()).await;

        save_capture(&store, "A").await;

        let report = engine.sync_all().await;
        assert!(report.success);
        assert_eq!(report.failed, 1);

        let queue = store.get_sync_queue().await.unwrap();
        assert_eq!(queue[0].retry_count, 1);
        assert_eq!(queue[0].last_error.as_deref(), Some("provider declined the item"));
    }

    #[tokio::test]
    async fn test_entry_becomes_permanently_failed() {
        let (store, engine) =
            engine_with(no_deferred_retries().max_retries(2)).await;
        engine.add_provider(StaticProvider::declining()).await;

        save_capture(&store, "A").await;

        engine.sync_all().await;
        engine.sync_all().await;

        let failed = engine.get_failed_items().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 2);
        assert!(failed[0]
            .last_error
            .as_deref()
            .unwrap()
            .starts_with("Max retries exceeded"));

        // Excluded from further passes but still in raw storage.
        let report = engine.sync_all().await;
        assert_eq!(report.synced + report.failed, 0);
        assert_eq!(store.get_sync_queue().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deferred_retry_syncs_single_item() {
        let config = SyncConfig::default().backoff(vec![Duration::from_millis(10)]);
        let (store, engine) = engine_with(config).await;
        engine
            .add_provider(Arc::new(FlakyProvider {
                failures_left: AtomicUsize::new(1),
            }))
            .await;

        save_capture(&store, "A").await;

        let report = engine.sync_all().await;
        assert_eq!(report.failed, 1);
        assert_eq!(store.get_sync_queue().await.unwrap().len(), 1);

        // The deferred single-item retry fires after the backoff delay and
        // succeeds on the provider's second attempt.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.get_sync_queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_force_sync_all_resets_failed_entries() {
        let (store, engine) =
            engine_with(no_deferred_retries().max_retries(1)).await;

        let declining: Arc<dyn SyncProvider> = StaticProvider::declining();
        engine.add_provider(declining.clone()).await;

        save_capture(&store, "A").await;
        save_capture(&store, "B").await;
        engine.sync_all().await;

        assert_eq!(engine.get_failed_items().await.unwrap().len(), 2);

        // Swap in a provider that accepts, then force: retries reset to 0
        // and both entries sync on the new pass.
        engine.remove_provider(&declining).await;
        engine.add_provider(StaticProvider::accepting()).await;

        let report = engine.force_sync_all().await.unwrap();
        assert!(report.success);
        assert_eq!(report.synced, 2);
        assert!(store.get_sync_queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_failed_items_resets_error_state() {
        let (store, engine) =
            engine_with(no_deferred_retries().max_retries(1)).await;
        engine.add_provider(StaticProvider::declining()).await;

        save_capture(&store, "A").await;
        engine.sync_all().await;
        assert_eq!(engine.get_failed_items().await.unwrap().len(), 1);

        let report = engine.retry_failed_items().await.unwrap();
        assert!(report.success);

        // The reset cleared the recorded error before the new attempt
        // failed again.
        let queue = store.get_sync_queue().await.unwrap();
        assert_eq!(queue[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_get_and_clear_failed_items() {
        let (store, engine) =
            engine_with(no_deferred_retries().max_retries(1)).await;
        engine.add_provider(StaticProvider::declining()).await;

        save_capture(&store, "A").await;
        engine.sync_all().await;

        assert_eq!(engine.get_failed_items().await.unwrap().len(), 1);
        assert_eq!(engine.clear_failed_items().await.unwrap(), 1);
        assert!(engine.get_failed_items().await.unwrap().is_empty());
        assert!(store.get_sync_queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_status() {
        let (store, engine) = engine_with(no_deferred_retries()).await;
        engine.add_provider(StaticProvider::accepting()).await;

        save_capture(&store, "A").await;

        let status = engine.get_sync_status().await.unwrap();
        assert!(!status.is_syncing);
        assert_eq!(status.pending_items, 1);
        assert!(!status.auto_sync_enabled);
        assert!(status.last_sync.is_none());
        assert!(status.last_error.is_none());

        engine.sync_all().await;

        let status = engine.get_sync_status().await.unwrap();
        assert_eq!(status.pending_items, 0);
        assert!(status.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_status_surfaces_last_permanent_error() {
        let (store, engine) =
            engine_with(no_deferred_retries().max_retries(1)).await;
        engine.add_provider(StaticProvider::declining()).await;

        save_capture(&store, "A").await;
        engine.sync_all().await;

        let status = engine.get_sync_status().await.unwrap();
        assert!(status
            .last_error
            .as_deref()
            .unwrap()
            .starts_with("Max retries exceeded"));
    }

    #[tokio::test]
    async fn test_auto_sync_runs_periodically() {
        let config = no_deferred_retries().auto_sync_interval(Duration::from_millis(50));
        let (store, engine) = engine_with(config).await;
        engine.add_provider(StaticProvider::accepting()).await;

        save_capture(&store, "A").await;
        engine.enable_auto_sync().await.unwrap();

        let status = engine.get_sync_status().await.unwrap();
        assert!(status.auto_sync_enabled);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.get_sync_queue().await.unwrap().is_empty());

        engine.disable_auto_sync().await.unwrap();
        let status = engine.get_sync_status().await.unwrap();
        assert!(!status.auto_sync_enabled);

        // No further passes after disable.
        save_capture(&store, "B").await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.get_sync_queue().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (_store, engine) = engine_with(no_deferred_retries()).await;

        engine.enable_auto_sync().await.unwrap();
        engine.destroy().await;
        engine.destroy().await;
    }
}
