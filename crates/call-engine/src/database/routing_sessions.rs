//! Routing sessions
//!
//! A routing session is the engine's own record of where an inbound call is
//! in its hunt-group traversal. The member list is snapshotted when the
//! session is created, so later edits to the hunt group do not shift the step
//! indices of calls already in flight.
//!
//! Transitions are conditional updates on `(step_index, state)`. A redelivered
//! dial-outcome webhook for a step that was already processed finds the row
//! moved on and changes nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use super::{from_millis, to_millis, DatabaseManager};
use crate::error::{CallEngineError, Result};

/// Traversal state of a routing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingState {
    Ringing,
    FallbackAi,
    FallbackVoicemail,
    Connected,
    Ended,
}

impl RoutingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingState::Ringing => "ringing",
            RoutingState::FallbackAi => "fallback_ai",
            RoutingState::FallbackVoicemail => "fallback_voicemail",
            RoutingState::Connected => "connected",
            RoutingState::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ringing" => Some(RoutingState::Ringing),
            "fallback_ai" => Some(RoutingState::FallbackAi),
            "fallback_voicemail" => Some(RoutingState::FallbackVoicemail),
            "connected" => Some(RoutingState::Connected),
            "ended" => Some(RoutingState::Ended),
            _ => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, RoutingState::FallbackAi | RoutingState::FallbackVoicemail)
    }
}

/// A hunt-group member as resolved at call start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedMember {
    pub agent_id: String,
    pub phone_number: Option<String>,
    pub browser_identity: Option<String>,
    pub ring_seconds: u32,
}

impl RoutedMember {
    pub fn has_endpoint(&self) -> bool {
        self.phone_number.as_deref().is_some_and(|p| !p.trim().is_empty())
            || self.browser_identity.as_deref().is_some_and(|b| !b.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingSession {
    pub call_session_id: String,
    pub hunt_group_id: String,
    pub step_index: usize,
    pub members: Vec<RoutedMember>,
    pub originating_number: String,
    pub state: RoutingState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoutingSession {
    pub fn new(
        call_session_id: impl Into<String>,
        hunt_group_id: impl Into<String>,
        members: Vec<RoutedMember>,
        originating_number: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            call_session_id: call_session_id.into(),
            hunt_group_id: hunt_group_id.into(),
            step_index: 0,
            members,
            originating_number: originating_number.into(),
            state: RoutingState::Ringing,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn current_member(&self) -> Option<&RoutedMember> {
        self.members.get(self.step_index)
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        let state: String = row.try_get("state")?;
        let members: String = row.try_get("members")?;
        let step: i64 = row.try_get("step_index")?;
        Ok(Self {
            call_session_id: row.try_get("call_session_id")?,
            hunt_group_id: row.try_get("hunt_group_id")?,
            step_index: step.max(0) as usize,
            members: serde_json::from_str(&members)?,
            originating_number: row.try_get("originating_number")?,
            state: RoutingState::parse(&state)
                .ok_or_else(|| CallEngineError::database(format!("Unknown routing state '{}'", state)))?,
            created_at: from_millis(row.try_get("created_at")?),
            updated_at: from_millis(row.try_get("updated_at")?),
        })
    }
}

impl DatabaseManager {
    /// Persist a new routing session unless the call already has one.
    /// Returns whether a row was created.
    pub async fn create_routing_session_if_absent(&self, session: &RoutingSession) -> Result<bool> {
        let members = serde_json::to_string(&session.members)?;
        let result = sqlx::query(
            "INSERT INTO call_routing (call_session_id, hunt_group_id, step_index, member_count, members,
                 originating_number, state, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(call_session_id) DO NOTHING",
        )
        .bind(&session.call_session_id)
        .bind(&session.hunt_group_id)
        .bind(session.step_index as i64)
        .bind(session.member_count() as i64)
        .bind(members)
        .bind(&session.originating_number)
        .bind(session.state.as_str())
        .bind(to_millis(session.created_at))
        .bind(to_millis(session.updated_at))
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_routing_session(&self, call_session_id: &str) -> Result<Option<RoutingSession>> {
        let row = sqlx::query(
            "SELECT call_session_id, hunt_group_id, step_index, members, originating_number, state,
                    created_at, updated_at
             FROM call_routing WHERE call_session_id = ?",
        )
        .bind(call_session_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(RoutingSession::from_row).transpose()
    }

    /// Sessions still ringing or connected that started at or after `since`
    ///
    /// While a session rings its current member, the provider owns that leg
    /// and reports nothing until it ends, so these rows are the only record
    /// of which agent a live call is holding.
    pub async fn list_live_routing_sessions_since(&self, since: DateTime<Utc>) -> Result<Vec<RoutingSession>> {
        let rows = sqlx::query(
            "SELECT call_session_id, hunt_group_id, step_index, members, originating_number, state,
                    created_at, updated_at
             FROM call_routing
             WHERE state IN ('ringing', 'connected') AND created_at >= ?
             ORDER BY created_at ASC",
        )
        .bind(to_millis(since))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(RoutingSession::from_row).collect()
    }

    /// Move a ringing session from `from_step` to `to_step` in `to_state`
    ///
    /// Applies only while the session is still ringing at `from_step`, and
    /// only forward (`to_step >= from_step`, never past the member count).
    /// Returns whether this call performed the transition.
    pub async fn transition_routing_session(
        &self,
        call_session_id: &str,
        from_step: usize,
        to_step: usize,
        to_state: RoutingState,
    ) -> Result<bool> {
        if to_step < from_step {
            return Err(CallEngineError::routing(format!(
                "step for {} may not move backwards ({} -> {})",
                call_session_id, from_step, to_step
            )));
        }

        let result = sqlx::query(
            "UPDATE call_routing SET step_index = ?, state = ?, updated_at = ?
             WHERE call_session_id = ? AND step_index = ? AND state = 'ringing' AND ? <= member_count",
        )
        .bind(to_step as i64)
        .bind(to_state.as_str())
        .bind(to_millis(Utc::now()))
        .bind(call_session_id)
        .bind(from_step as i64)
        .bind(to_step as i64)
        .execute(self.pool())
        .await?;

        let applied = result.rows_affected() > 0;
        debug!(
            "Routing {} step {} -> {} ({}): applied={}",
            call_session_id,
            from_step,
            to_step,
            to_state.as_str(),
            applied
        );
        Ok(applied)
    }

    /// Mark a ringing or connected session ended once its call is terminal
    pub async fn end_routing_session(&self, call_session_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE call_routing SET state = 'ended', updated_at = ?
             WHERE call_session_id = ? AND state IN ('ringing', 'connected')",
        )
        .bind(to_millis(Utc::now()))
        .bind(call_session_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(agent: &str) -> RoutedMember {
        RoutedMember {
            agent_id: agent.to_string(),
            phone_number: Some(format!("+6141234567{}", agent.len())),
            browser_identity: None,
            ring_seconds: 20,
        }
    }

    async fn db_with_session() -> DatabaseManager {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        let session = RoutingSession::new("CA1", "hg-1", vec![member("a"), member("bb")], "0412345678");
        assert!(db.create_routing_session_if_absent(&session).await.unwrap());
        db
    }

    #[tokio::test]
    async fn test_session_is_created_once() {
        let db = db_with_session().await;
        let other = RoutingSession::new("CA1", "hg-2", vec![], "");
        assert!(!db.create_routing_session_if_absent(&other).await.unwrap());

        let stored = db.get_routing_session("CA1").await.unwrap().unwrap();
        assert_eq!(stored.hunt_group_id, "hg-1");
        assert_eq!(stored.member_count(), 2);
        assert_eq!(stored.current_member().unwrap().agent_id, "a");
    }

    #[tokio::test]
    async fn test_transition_applies_once_per_step() {
        let db = db_with_session().await;
        assert!(db
            .transition_routing_session("CA1", 0, 1, RoutingState::Ringing)
            .await
            .unwrap());
        // redelivered outcome for step 0
        assert!(!db
            .transition_routing_session("CA1", 0, 1, RoutingState::Ringing)
            .await
            .unwrap());
        assert_eq!(db.get_routing_session("CA1").await.unwrap().unwrap().step_index, 1);
    }

    #[tokio::test]
    async fn test_step_is_capped_and_never_decreases() {
        let db = db_with_session().await;
        assert!(!db
            .transition_routing_session("CA1", 0, 3, RoutingState::FallbackVoicemail)
            .await
            .unwrap());
        assert!(db.transition_routing_session("CA1", 1, 0, RoutingState::Ringing).await.is_err());
        assert!(db
            .transition_routing_session("CA1", 0, 2, RoutingState::FallbackVoicemail)
            .await
            .unwrap());

        let stored = db.get_routing_session("CA1").await.unwrap().unwrap();
        assert_eq!(stored.step_index, 2);
        assert_eq!(stored.state, RoutingState::FallbackVoicemail);
        assert!(stored.current_member().is_none());
    }

    #[tokio::test]
    async fn test_terminal_sessions_do_not_move() {
        let db = db_with_session().await;
        assert!(db
            .transition_routing_session("CA1", 0, 0, RoutingState::Connected)
            .await
            .unwrap());
        assert!(!db
            .transition_routing_session("CA1", 0, 1, RoutingState::Ringing)
            .await
            .unwrap());
        assert!(db.end_routing_session("CA1").await.unwrap());
        assert_eq!(
            db.get_routing_session("CA1").await.unwrap().unwrap().state,
            RoutingState::Ended
        );
    }

    #[tokio::test]
    async fn test_live_sessions_exclude_ended_and_fallback() {
        let db = db_with_session().await;
        let other = RoutingSession::new("CA2", "hg-1", vec![member("a")], "0412345678");
        db.create_routing_session_if_absent(&other).await.unwrap();
        db.transition_routing_session("CA2", 0, 1, RoutingState::FallbackVoicemail)
            .await
            .unwrap();

        let since = Utc::now() - chrono::Duration::hours(2);
        let live = db.list_live_routing_sessions_since(since).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].call_session_id, "CA1");

        assert!(db.end_routing_session("CA1").await.unwrap());
        assert!(db.list_live_routing_sessions_since(since).await.unwrap().is_empty());
    }
}
