//! Hunt group configuration store
//!
//! Exactly one hunt group may be active. Activating a group deactivates every
//! other group inside the same transaction, and a partial unique index on
//! `active = 1` rejects anything that slips past.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use super::{from_millis, to_millis, DatabaseManager};
use crate::error::{CallEngineError, Result};

pub const DEFAULT_RING_SECONDS: u32 = 20;
pub const MIN_RING_SECONDS: u32 = 5;
pub const MAX_RING_SECONDS: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HuntStrategy {
    #[default]
    Sequential,
}

impl HuntStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            HuntStrategy::Sequential => "sequential",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sequential" => Some(HuntStrategy::Sequential),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HuntGroupMember {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ring_seconds_override: Option<u32>,
}

impl HuntGroupMember {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ring_seconds_override: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HuntGroup {
    pub id: String,
    pub name: String,
    pub strategy: HuntStrategy,
    pub ring_seconds: u32,
    pub members: Vec<HuntGroupMember>,
    pub skip_if_busy: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HuntGroup {
    /// Ring timeout for a member, honouring its override
    pub fn ring_seconds_for(&self, member: &HuntGroupMember) -> u32 {
        member.ring_seconds_override.unwrap_or(self.ring_seconds)
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        let strategy: String = row.try_get("strategy")?;
        let members: String = row.try_get("members")?;
        let ring_seconds: i64 = row.try_get("ring_seconds")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            strategy: HuntStrategy::parse(&strategy)
                .ok_or_else(|| CallEngineError::database(format!("Unknown hunt strategy '{}'", strategy)))?,
            ring_seconds: ring_seconds.clamp(0, i64::from(u32::MAX)) as u32,
            members: serde_json::from_str(&members)?,
            skip_if_busy: row.try_get("skip_if_busy")?,
            active: row.try_get("active")?,
            created_at: from_millis(row.try_get("created_at")?),
            updated_at: from_millis(row.try_get("updated_at")?),
        })
    }
}

/// Create/update payload. Omitted fields keep their current value on update
/// and take the default on create.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HuntGroupInput {
    pub name: Option<String>,
    pub strategy: Option<HuntStrategy>,
    pub ring_seconds: Option<u32>,
    pub members: Option<Vec<HuntGroupMember>>,
    pub skip_if_busy: Option<bool>,
    pub active: Option<bool>,
}

fn validate_ring_seconds(value: u32, what: &str) -> Result<()> {
    if !(MIN_RING_SECONDS..=MAX_RING_SECONDS).contains(&value) {
        return Err(CallEngineError::validation(format!(
            "{} must be between {} and {} seconds",
            what, MIN_RING_SECONDS, MAX_RING_SECONDS
        )));
    }
    Ok(())
}

fn validate_group(group: &HuntGroup) -> Result<()> {
    if group.name.trim().is_empty() {
        return Err(CallEngineError::validation("hunt group name is required"));
    }
    validate_ring_seconds(group.ring_seconds, "ringSeconds")?;

    let mut seen = HashSet::new();
    for member in &group.members {
        if member.agent_id.trim().is_empty() {
            return Err(CallEngineError::validation("hunt group member agentId is required"));
        }
        if !seen.insert(member.agent_id.as_str()) {
            return Err(CallEngineError::validation(format!(
                "agent {} appears more than once",
                member.agent_id
            )));
        }
        if let Some(ring) = member.ring_seconds_override {
            validate_ring_seconds(ring, "ringSecondsOverride")?;
        }
    }
    Ok(())
}

const SELECT_GROUP: &str = "SELECT id, name, strategy, ring_seconds, members, skip_if_busy, active,
        created_at, updated_at
     FROM hunt_groups";

impl DatabaseManager {
    pub async fn create_hunt_group(&self, input: HuntGroupInput) -> Result<HuntGroup> {
        let now = Utc::now();
        let group = HuntGroup {
            id: Uuid::new_v4().to_string(),
            name: input.name.unwrap_or_default(),
            strategy: input.strategy.unwrap_or_default(),
            ring_seconds: input.ring_seconds.unwrap_or(DEFAULT_RING_SECONDS),
            members: input.members.unwrap_or_default(),
            skip_if_busy: input.skip_if_busy.unwrap_or(true),
            active: input.active.unwrap_or(false),
            created_at: now,
            updated_at: now,
        };
        validate_group(&group)?;
        self.write_hunt_group(&group, true).await?;
        info!("✅ Created hunt group '{}' ({} members, active={})", group.name, group.members.len(), group.active);
        Ok(group)
    }

    pub async fn update_hunt_group(&self, id: &str, input: HuntGroupInput) -> Result<HuntGroup> {
        let current = self
            .get_hunt_group(id)
            .await?
            .ok_or_else(|| CallEngineError::not_found(format!("hunt group {}", id)))?;

        let group = HuntGroup {
            name: input.name.unwrap_or(current.name),
            strategy: input.strategy.unwrap_or(current.strategy),
            ring_seconds: input.ring_seconds.unwrap_or(current.ring_seconds),
            members: input.members.unwrap_or(current.members),
            skip_if_busy: input.skip_if_busy.unwrap_or(current.skip_if_busy),
            active: input.active.unwrap_or(current.active),
            updated_at: Utc::now(),
            ..current
        };
        validate_group(&group)?;
        self.write_hunt_group(&group, false).await?;
        info!("✅ Updated hunt group '{}' (active={})", group.name, group.active);
        Ok(group)
    }

    async fn write_hunt_group(&self, group: &HuntGroup, insert: bool) -> Result<()> {
        let members = serde_json::to_string(&group.members)?;
        let mut tx = self.pool().begin().await?;

        if group.active {
            sqlx::query("UPDATE hunt_groups SET active = 0, updated_at = ? WHERE active = 1 AND id != ?")
                .bind(to_millis(group.updated_at))
                .bind(&group.id)
                .execute(&mut *tx)
                .await?;
        }

        let sql = if insert {
            "INSERT INTO hunt_groups (name, strategy, ring_seconds, members, skip_if_busy, active,
                 updated_at, id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        } else {
            "UPDATE hunt_groups SET name = ?, strategy = ?, ring_seconds = ?, members = ?,
                 skip_if_busy = ?, active = ?, updated_at = ?
             WHERE id = ? AND created_at = ?"
        };
        sqlx::query(sql)
            .bind(&group.name)
            .bind(group.strategy.as_str())
            .bind(i64::from(group.ring_seconds))
            .bind(members)
            .bind(group.skip_if_busy)
            .bind(group.active)
            .bind(to_millis(group.updated_at))
            .bind(&group.id)
            .bind(to_millis(group.created_at))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_hunt_group(&self, id: &str) -> Result<Option<HuntGroup>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_GROUP))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(HuntGroup::from_row).transpose()
    }

    pub async fn list_hunt_groups(&self) -> Result<Vec<HuntGroup>> {
        let rows = sqlx::query(&format!("{} ORDER BY created_at ASC, id ASC", SELECT_GROUP))
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(HuntGroup::from_row).collect()
    }

    /// The single active hunt group, if any
    pub async fn active_hunt_group(&self) -> Result<Option<HuntGroup>> {
        let row = sqlx::query(&format!("{} WHERE active = 1", SELECT_GROUP))
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(HuntGroup::from_row).transpose()
    }

    pub async fn delete_hunt_group(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM hunt_groups WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
