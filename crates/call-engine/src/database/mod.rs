//! # Async Database Management (sqlx + SQLite)
//!
//! All persistent state of the engine lives behind [`DatabaseManager`]:
//!
//! - [`calls`]: call records keyed by the provider session id
//! - [`routing_sessions`]: hunt-group traversal state per inbound call
//! - [`hunt_groups`]: routing templates with the single-active invariant
//! - [`availability`]: append-only manual availability history
//! - [`directory`]: agent endpoints (phone number, browser identity)
//! - [`sms`]: SMS records keyed by message sid
//! - [`settings`]: feature toggles
//!
//! Every write is a keyed upsert or a conditional update, so handlers stay
//! safe under duplicate and out-of-order webhook delivery without holding a
//! lock across requests. Timestamps are stored as Unix milliseconds.
//!
//! ```rust
//! use careline_call_engine::database::DatabaseManager;
//!
//! # async fn example() -> careline_call_engine::Result<()> {
//! let db = DatabaseManager::new_in_memory().await?;
//! let calls = db.list_calls(50, 0).await?;
//! assert!(calls.is_empty());
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{CallEngineError, Result};

pub mod availability;
pub mod calls;
pub mod directory;
pub mod hunt_groups;
pub mod routing_sessions;
pub mod settings;
pub mod sms;

pub use availability::{AvailabilityRecord, AvailabilityStatus};
pub use calls::{CallDirection, CallRecord, CallStatus, NewCallRecord, StatusApplied, StatusUpdate};
pub use directory::DirectoryEntry;
pub use hunt_groups::{HuntGroup, HuntGroupInput, HuntGroupMember, HuntStrategy};
pub use routing_sessions::{RoutedMember, RoutingSession, RoutingState};
pub use settings::{FeatureSettings, FeatureSettingsUpdate};
pub use sms::{NewSmsRecord, SmsDirection, SmsRecord};

/// Main database manager using sqlx for async operations
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Connect with the default pool size and run migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(database_url, 8).await
    }

    /// Connect and run migrations
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("🗄️ Initializing sqlx database manager: {}", database_url);

        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| CallEngineError::database(format!("Invalid database URL: {}", e)))?
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true)
            .create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` is its own database, so keep exactly
        // one connection alive for the lifetime of the pool.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| CallEngineError::database(format!("Failed to connect to database: {}", e)))?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("✅ Database manager initialized (in_memory={})", in_memory);
        Ok(Self { pool })
    }

    /// Create an in-memory database, used by tests and ephemeral deployments
    pub async fn new_in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(|| Utc.timestamp_nanos(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_runs_migrations() {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM calls")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn test_on_disk_database_survives_reconnect() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("calls.db").display());

        {
            let db = DatabaseManager::new(&url).await.unwrap();
            db.set_setting("display_timezone", "Australia/Sydney").await.unwrap();
        }

        let db = DatabaseManager::new(&url).await.unwrap();
        let settings = db.feature_settings().await.unwrap();
        assert_eq!(settings.display_timezone, "Australia/Sydney");
    }

    #[test]
    fn test_millis_round_trip_is_stable() {
        let now = from_millis(1_717_200_000_123);
        assert_eq!(to_millis(now), 1_717_200_000_123);
    }
}
