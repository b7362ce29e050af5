//! Remote sync provider contract
//!
//! Providers are the pluggable remote backends the engine drains the queue
//! into. The engine never speaks a wire protocol itself; it hands one queue
//! entry at a time to the first authenticated provider that will take it.

use async_trait::async_trait;
use storage::SyncQueueEntry;
use thiserror::Error;

/// Provider error types
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider is not (or no longer) authenticated.
    #[error("not authenticated: {0}")]
    Auth(String),

    /// The remote could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The remote rejected the item.
    #[error("remote rejected item: {0}")]
    Rejected(String),
}

/// A pluggable remote synchronization backend.
///
/// Implementations must be idempotent with respect to repeated delivery of
/// the same entry: the engine guarantees at-least-once, not exactly-once.
#[async_trait]
pub trait SyncProvider: Send + Sync {
    /// Whether this provider currently holds valid credentials.
    ///
    /// Unauthenticated providers are skipped during a pass.
    fn is_authenticated(&self) -> bool;

    /// The remote user this provider syncs for, if signed in.
    fn user_id(&self) -> Option<String>;

    /// Push one queue entry to the remote.
    ///
    /// Returns `Ok(true)` when the remote accepted the item, `Ok(false)`
    /// when it declined. Both `Ok(false)` and `Err` route the entry to the
    /// engine's retry handling.
    async fn sync_item(&self, entry: &SyncQueueEntry) -> Result<bool, ProviderError>;
}
