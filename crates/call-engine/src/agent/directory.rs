//! Agent directory lookups

use async_trait::async_trait;
use dashmap::DashMap;

use super::AgentEndpoint;
use crate::database::{DatabaseManager, DirectoryEntry};
use crate::error::Result;

/// Resolves an agent id to its endpoints
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// `None` when the directory does not know the agent
    async fn lookup(&self, agent_id: &str) -> Result<Option<AgentEndpoint>>;
}

/// Directory backed by the `agent_directory` table
#[derive(Clone)]
pub struct SqliteAgentDirectory {
    db: DatabaseManager,
}

impl SqliteAgentDirectory {
    pub fn new(db: DatabaseManager) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AgentDirectory for SqliteAgentDirectory {
    async fn lookup(&self, agent_id: &str) -> Result<Option<AgentEndpoint>> {
        Ok(self.db.get_directory_entry(agent_id).await?.map(|entry: DirectoryEntry| AgentEndpoint {
            agent_id: entry.agent_id,
            phone_number: entry.phone_number,
            browser_identity: entry.browser_identity,
        }))
    }
}

/// Fixed in-process directory
#[derive(Debug, Default)]
pub struct StaticAgentDirectory {
    entries: DashMap<String, AgentEndpoint>,
}

impl StaticAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, endpoint: AgentEndpoint) {
        self.entries.insert(endpoint.agent_id.clone(), endpoint);
    }

    pub fn with(self, endpoint: AgentEndpoint) -> Self {
        self.insert(endpoint);
        self
    }
}

#[async_trait]
impl AgentDirectory for StaticAgentDirectory {
    async fn lookup(&self, agent_id: &str) -> Result<Option<AgentEndpoint>> {
        Ok(self.entries.get(agent_id).map(|e| e.value().clone()))
    }
}
