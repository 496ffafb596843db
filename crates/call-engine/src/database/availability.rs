//! Manual agent availability
//!
//! Append-only history. The current status of an agent is its most recent
//! row; an agent that never set a status counts as online.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::{from_millis, to_millis, DatabaseManager};
use crate::error::{CallEngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityStatus {
    Online,
    Offline,
    Busy,
}

impl AvailabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityStatus::Online => "online",
            AvailabilityStatus::Offline => "offline",
            AvailabilityStatus::Busy => "busy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => Some(AvailabilityStatus::Online),
            "offline" => Some(AvailabilityStatus::Offline),
            "busy" => Some(AvailabilityStatus::Busy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRecord {
    pub agent_id: String,
    pub status: AvailabilityStatus,
    pub changed_at: DateTime<Utc>,
}

impl DatabaseManager {
    pub async fn record_availability(&self, agent_id: &str, status: AvailabilityStatus) -> Result<AvailabilityRecord> {
        if agent_id.trim().is_empty() {
            return Err(CallEngineError::invalid_input("agent id is required"));
        }
        let record = AvailabilityRecord {
            agent_id: agent_id.to_string(),
            status,
            changed_at: Utc::now(),
        };
        sqlx::query("INSERT INTO agent_availability (agent_id, status, changed_at) VALUES (?, ?, ?)")
            .bind(&record.agent_id)
            .bind(status.as_str())
            .bind(to_millis(record.changed_at))
            .execute(self.pool())
            .await?;
        Ok(record)
    }

    /// Most recent manual status, `None` if the agent has no history
    pub async fn current_availability(&self, agent_id: &str) -> Result<Option<AvailabilityStatus>> {
        let row = sqlx::query(
            "SELECT status FROM agent_availability WHERE agent_id = ?
             ORDER BY changed_at DESC, id DESC LIMIT 1",
        )
        .bind(agent_id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => {
                let status: String = row.try_get("status")?;
                AvailabilityStatus::parse(&status)
                    .map(Some)
                    .ok_or_else(|| CallEngineError::database(format!("Unknown availability status '{}'", status)))
            }
            None => Ok(None),
        }
    }

    /// History, newest first
    pub async fn availability_history(&self, agent_id: &str, limit: i64) -> Result<Vec<AvailabilityRecord>> {
        let rows = sqlx::query(
            "SELECT agent_id, status, changed_at FROM agent_availability WHERE agent_id = ?
             ORDER BY changed_at DESC, id DESC LIMIT ?",
        )
        .bind(agent_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                Ok(AvailabilityRecord {
                    agent_id: row.try_get("agent_id")?,
                    status: AvailabilityStatus::parse(&status).ok_or_else(|| {
                        CallEngineError::database(format!("Unknown availability status '{}'", status))
                    })?,
                    changed_at: from_millis(row.try_get("changed_at")?),
                })
            })
            .collect()
    }
}
