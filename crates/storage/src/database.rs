//! SQLite open/pool/migration layer
//!
//! Thin wrapper around an sqlx SQLite pool: connection options, WAL mode,
//! and versioned migrations recorded in a `_migrations` table.

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Database error types
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The storage engine could not be opened. Fatal to initialization;
    /// callers must not issue other operations after seeing this.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Any other engine failure during a query.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),
}

/// Result type for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// SQLite synchronous mode
#[derive(Debug, Clone, Copy)]
pub enum SynchronousMode {
    /// Off - no synchronization
    Off,
    /// Normal - synchronize at critical moments
    Normal,
    /// Full - synchronize after each write
    Full,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file path
    pub path: String,
    /// Maximum number of connections in pool
    pub max_connections: u32,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Enable WAL mode
    pub wal_mode: bool,
    /// Synchronous mode
    pub synchronous: SynchronousMode,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "clipvault.db".to_string(),
            max_connections: 5,
            connect_timeout: Duration::from_secs(30),
            wal_mode: true,
            synchronous: SynchronousMode::Normal,
        }
    }
}

impl DatabaseConfig {
    /// Create a configuration for the given database file
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable WAL mode
    pub fn wal_mode(mut self, enabled: bool) -> Self {
        self.wal_mode = enabled;
        self
    }

    /// Set synchronous mode
    pub fn synchronous(mut self, mode: SynchronousMode) -> Self {
        self.synchronous = mode;
        self
    }
}

/// A versioned schema migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number
    pub version: i64,
    /// Migration description
    pub description: String,
    /// SQL statement to execute
    pub sql: String,
    /// Checksum for verification
    pub checksum: String,
}

impl Migration {
    /// Create a migration; the checksum is derived from the SQL
    pub fn new(version: i64, description: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let checksum = format!("{:x}", md5::compute(&sql));

        Self {
            version,
            description: description.into(),
            sql,
            checksum,
        }
    }
}

/// Pooled SQLite database handle
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Open (creating on first run) the database described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Unavailable`] if the engine cannot be opened.
    pub async fn open(config: DatabaseConfig) -> Result<Self> {
        let mut options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.path))
            .map_err(|e| DatabaseError::Unavailable(e.to_string()))?
            .create_if_missing(true);

        if config.wal_mode {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        options = match config.synchronous {
            SynchronousMode::Off => options.synchronous(SqliteSynchronous::Off),
            SynchronousMode::Normal => options.synchronous(SqliteSynchronous::Normal),
            SynchronousMode::Full => options.synchronous(SqliteSynchronous::Full),
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::Unavailable(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Create an in-memory database (for testing)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| DatabaseError::Unavailable(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply any migrations newer than the recorded version
    pub async fn migrate(&self, migrations: &[Migration]) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                installed_on TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                checksum TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        let current_version = self.current_version().await?;

        for migration in migrations {
            if migration.version <= current_version {
                continue;
            }

            tracing::info!(
                "Applying migration {} - {}",
                migration.version,
                migration.description
            );

            let mut tx = self.pool.begin().await?;

            sqlx::query(&migration.sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    DatabaseError::Migration(format!("migration {} failed: {e}", migration.version))
                })?;

            sqlx::query("INSERT INTO _migrations (version, description, checksum) VALUES (?, ?, ?)")
                .bind(migration.version)
                .bind(&migration.description)
                .bind(&migration.checksum)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
        }

        Ok(())
    }

    /// Get the most recently applied migration version
    pub async fn current_version(&self) -> Result<i64> {
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM _migrations")
            .fetch_one(&self.pool)
            .await?;

        Ok(version.unwrap_or(0))
    }

    /// Check if the database is healthy
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_creation() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        assert!(db.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_open_bad_path_is_unavailable() {
        let config = DatabaseConfig::new("/nonexistent-dir/for-sure/clipvault.db")
            .connect_timeout(Duration::from_secs(1));
        let result = SqliteDatabase::open(config).await;
        assert!(matches!(result, Err(DatabaseError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let config = DatabaseConfig::new(path.to_string_lossy().to_string());

        let db = SqliteDatabase::open(config).await.unwrap();
        db.health_check().await.unwrap();
        db.close().await;

        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_migrations_apply_in_order() {
        let db = SqliteDatabase::in_memory().await.unwrap();

        let migrations = vec![
            Migration::new(
                1,
                "users table",
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
            ),
            Migration::new(2, "email column", "ALTER TABLE users ADD COLUMN email TEXT"),
        ];

        db.migrate(&migrations).await.unwrap();
        assert_eq!(db.current_version().await.unwrap(), 2);

        let table: String = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='users'",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(table, "users");
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let db = SqliteDatabase::in_memory().await.unwrap();

        let migrations = vec![Migration::new(
            1,
            "users table",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
        )];

        db.migrate(&migrations).await.unwrap();
        db.migrate(&migrations).await.unwrap();
        assert_eq!(db.current_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DatabaseConfig::new("test.db")
            .max_connections(3)
            .connect_timeout(Duration::from_secs(10))
            .wal_mode(false)
            .synchronous(SynchronousMode::Full);

        assert_eq!(config.path, "test.db");
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(!config.wal_mode);
        assert!(matches!(config.synchronous, SynchronousMode::Full));
    }
}
