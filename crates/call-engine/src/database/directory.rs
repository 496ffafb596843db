//! Agent directory rows backing the default [`crate::agent::SqliteAgentDirectory`]

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::DatabaseManager;
use crate::error::{CallEngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub agent_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub browser_identity: Option<String>,
}

impl DirectoryEntry {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            agent_id: row.try_get("agent_id")?,
            display_name: row.try_get("display_name")?,
            phone_number: row.try_get("phone_number")?,
            browser_identity: row.try_get("browser_identity")?,
        })
    }
}

impl DatabaseManager {
    pub async fn upsert_directory_entry(&self, entry: &DirectoryEntry) -> Result<()> {
        if entry.agent_id.trim().is_empty() {
            return Err(CallEngineError::invalid_input("agent id is required"));
        }
        sqlx::query(
            "INSERT INTO agent_directory (agent_id, display_name, phone_number, browser_identity)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(agent_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 phone_number = excluded.phone_number,
                 browser_identity = excluded.browser_identity",
        )
        .bind(&entry.agent_id)
        .bind(&entry.display_name)
        .bind(&entry.phone_number)
        .bind(&entry.browser_identity)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_directory_entry(&self, agent_id: &str) -> Result<Option<DirectoryEntry>> {
        let row = sqlx::query(
            "SELECT agent_id, display_name, phone_number, browser_identity FROM agent_directory WHERE agent_id = ?",
        )
        .bind(agent_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(DirectoryEntry::from_row).transpose()
    }
}
