//! # Call Engine Server
//!
//! Lifecycle around [`CallEngine`]: database connection and migrations,
//! provider clients, the HTTP router and the optional periodic correlation
//! sweep.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            CallEngineServer             │
//! ├─────────────────────────────────────────┤
//! │  /webhooks/*  │  /api/*  │  /health     │
//! ├─────────────────────────────────────────┤
//! │               CallEngine                │
//! ├─────────────────────────────────────────┤
//! │ Router │ Webhooks │ Correlation │ Audio │
//! ├─────────────────────────────────────────┤
//! │     sqlx SQLite   │  provider clients   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Examples
//!
//! ```rust
//! use careline_call_engine::{server::CallEngineServerBuilder, CallEngineConfig};
//!
//! # async fn example() -> careline_call_engine::Result<()> {
//! let server = CallEngineServerBuilder::new()
//!     .with_config(CallEngineConfig::default())
//!     .with_in_memory_database()
//!     .build()
//!     .await?;
//!
//! // the router can be served directly or driven in tests
//! let _app = server.router();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::agent::{AgentDirectory, SqliteAgentDirectory};
use crate::api;
use crate::config::CallEngineConfig;
use crate::database::DatabaseManager;
use crate::error::{CallEngineError, Result};
use crate::integration::Integrations;
use crate::notify::{BroadcastNotifier, NotificationSink};
use crate::orchestrator::CallEngine;

pub struct CallEngineServer {
    engine: Arc<CallEngine>,
    config: Arc<CallEngineConfig>,
    sweep_handle: Option<JoinHandle<()>>,
}

impl CallEngineServer {
    pub fn new(
        config: CallEngineConfig,
        db: DatabaseManager,
        integrations: Integrations,
        directory: Arc<dyn AgentDirectory>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let config = Arc::new(config);
        let engine = Arc::new(CallEngine::new(db, config.clone(), integrations, directory, notifier));
        Self {
            engine,
            config,
            sweep_handle: None,
        }
    }

    pub fn engine(&self) -> &Arc<CallEngine> {
        &self.engine
    }

    pub fn router(&self) -> Router {
        api::create_router(self.engine.clone())
    }

    /// Start background work. Idempotent.
    pub fn start(&mut self) {
        let secs = self.config.correlation.sweep_interval_secs;
        if secs == 0 || self.sweep_handle.is_some() {
            return;
        }
        let engine = self.engine.clone();
        self.sweep_handle = Some(tokio::spawn(async move {
            Self::sweep_loop(engine, Duration::from_secs(secs)).await;
        }));
        info!("✅ Periodic correlation sweep every {}s", secs);
    }

    pub async fn stop(&mut self) {
        if let Some(handle) = self.sweep_handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        info!("✅ Call engine server stopped");
    }

    /// Bind, serve until ctrl-c, then stop background work
    pub async fn run(mut self) -> Result<()> {
        self.start();
        let addr = self.config.general.bind_addr;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| CallEngineError::configuration(format!("Failed to bind {}: {}", addr, e)))?;
        info!("📞 Call engine listening on http://{}", addr);
        info!("   Provider callbacks: {}", self.config.general.callback_url("/webhooks/voice/*"));

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await;
        self.stop().await;
        served.map_err(|e| CallEngineError::internal(format!("HTTP server error: {}", e)))
    }

    async fn sweep_loop(engine: Arc<CallEngine>, period: Duration) {
        info!("🔄 Starting correlation sweep loop");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick fires immediately; skip it so startup stays quiet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match engine.correlation().sweep().await {
                Ok(report) if report.examined > 0 => info!(
                    "🔄 Periodic sweep: {} examined, {} matched, {} placeholders",
                    report.examined, report.matched, report.placeholders
                ),
                Ok(_) => {}
                Err(e) => error!("❌ Periodic correlation sweep failed: {}", e),
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("⚠️ Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown requested");
}

/// Builder for [`CallEngineServer`]
pub struct CallEngineServerBuilder {
    config: Option<CallEngineConfig>,
    database_url: Option<String>,
    database: Option<DatabaseManager>,
    in_memory: bool,
    integrations: Option<Integrations>,
    directory: Option<Arc<dyn AgentDirectory>>,
    notifier: Option<Arc<dyn NotificationSink>>,
}

impl CallEngineServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            database_url: None,
            database: None,
            in_memory: false,
            integrations: None,
            directory: None,
            notifier: None,
        }
    }

    pub fn with_config(mut self, config: CallEngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Override `database.url`
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_in_memory_database(mut self) -> Self {
        self.in_memory = true;
        self
    }

    /// Use an already connected database
    pub fn with_database(mut self, db: DatabaseManager) -> Self {
        self.database = Some(db);
        self
    }

    pub fn with_integrations(mut self, integrations: Integrations) -> Self {
        self.integrations = Some(integrations);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn AgentDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub async fn build(self) -> Result<CallEngineServer> {
        let config = self
            .config
            .ok_or_else(|| CallEngineError::configuration("Configuration not provided"))?;
        config.validate()?;

        let db = match (self.database, self.in_memory) {
            (Some(db), _) => db,
            (None, true) => DatabaseManager::new_in_memory().await?,
            (None, false) => {
                let url = self.database_url.unwrap_or_else(|| config.database.url.clone());
                DatabaseManager::connect(&url, config.database.max_connections).await?
            }
        };

        let integrations = match self.integrations {
            Some(integrations) => integrations,
            None => Integrations::from_config(&config)?,
        };
        let directory = self
            .directory
            .unwrap_or_else(|| Arc::new(SqliteAgentDirectory::new(db.clone())));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(BroadcastNotifier::new()));

        Ok(CallEngineServer::new(config, db, integrations, directory, notifier))
    }
}

impl Default for CallEngineServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
