//! Call records
//!
//! One row per telephony session, keyed by the provider-assigned session id.
//! Two rules make the table safe under duplicate and out-of-order webhooks:
//!
//! - terminal status is sticky: once `completed` or `failed`, later status
//!   updates leave the status alone
//! - `transcript` is write-once: every write is conditional on it being NULL

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, warn};

use super::{from_millis, to_millis, DatabaseManager};
use crate::error::{CallEngineError, Result};
use crate::phone;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }

    /// Parse stored values and provider vocabulary (`outbound-api`,
    /// `outbound-dial`)
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s == "inbound" {
            Some(CallDirection::Inbound)
        } else if s.starts_with("outbound") {
            Some(CallDirection::Outbound)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
        }
    }

    /// Parse a stored status or the provider's call-status vocabulary
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "initiated" | "queued" => Some(CallStatus::Initiated),
            "ringing" => Some(CallStatus::Ringing),
            "in-progress" | "answered" => Some(CallStatus::InProgress),
            "completed" => Some(CallStatus::Completed),
            "failed" | "busy" | "no-answer" | "canceled" => Some(CallStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Failed)
    }

    /// Whether a record in this status may move to `next`
    ///
    /// `completed` never moves. `failed` may still become `completed`, since
    /// the provider can report a failed leg before the call's final outcome.
    pub fn accepts(&self, next: CallStatus) -> bool {
        match self {
            CallStatus::Completed => false,
            CallStatus::Failed => next == CallStatus::Completed,
            _ => true,
        }
    }
}

/// A persisted call record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub session_id: String,
    pub direction: CallDirection,
    pub counterparty_number: String,
    pub counterparty_canonical: String,
    pub internal_number: String,
    pub internal_canonical: String,
    pub status: CallStatus,
    pub duration_seconds: i64,
    pub recording_url: Option<String>,
    pub recording_sid: Option<String>,
    pub transcript: Option<String>,
    pub ai_summary: Option<String>,
    pub summary_is_placeholder: bool,
    pub external_conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let direction: String = row.try_get("direction")?;
        let status: String = row.try_get("status")?;
        Ok(Self {
            session_id: row.try_get("session_id")?,
            direction: CallDirection::parse(&direction)
                .ok_or_else(|| CallEngineError::database(format!("Unknown call direction '{}'", direction)))?,
            counterparty_number: row.try_get("counterparty_number")?,
            counterparty_canonical: row.try_get("counterparty_canonical")?,
            internal_number: row.try_get("internal_number")?,
            internal_canonical: row.try_get("internal_canonical")?,
            status: CallStatus::parse(&status)
                .ok_or_else(|| CallEngineError::database(format!("Unknown call status '{}'", status)))?,
            duration_seconds: row.try_get("duration_seconds")?,
            recording_url: row.try_get("recording_url")?,
            recording_sid: row.try_get("recording_sid")?,
            transcript: row.try_get("transcript")?,
            ai_summary: row.try_get("ai_summary")?,
            summary_is_placeholder: row.try_get("summary_is_placeholder")?,
            external_conversation_id: row.try_get("external_conversation_id")?,
            created_at: from_millis(row.try_get("created_at")?),
            updated_at: from_millis(row.try_get("updated_at")?),
        })
    }

    /// Whether the transcript is still missing on a finished, non-empty call
    pub fn needs_transcript(&self) -> bool {
        self.transcript.is_none() && self.status == CallStatus::Completed && self.duration_seconds > 0
    }
}

/// Input for insert-or-ignore
#[derive(Debug, Clone)]
pub struct NewCallRecord {
    pub session_id: String,
    pub direction: CallDirection,
    pub counterparty_number: String,
    pub internal_number: String,
    pub status: CallStatus,
    pub created_at: DateTime<Utc>,
}

impl NewCallRecord {
    pub fn new(session_id: impl Into<String>, direction: CallDirection, status: CallStatus) -> Self {
        Self {
            session_id: session_id.into(),
            direction,
            counterparty_number: String::new(),
            internal_number: String::new(),
            status,
            created_at: Utc::now(),
        }
    }

    pub fn with_numbers(mut self, counterparty: impl Into<String>, internal: impl Into<String>) -> Self {
        self.counterparty_number = counterparty.into();
        self.internal_number = internal.into();
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Fields carried by a status webhook. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub status: Option<CallStatus>,
    pub duration_seconds: Option<i64>,
    pub direction: Option<CallDirection>,
    pub counterparty_number: Option<String>,
    pub internal_number: Option<String>,
}

impl StatusUpdate {
    /// Merge this update into a record
    ///
    /// Status follows the terminal-sticky rule (see [`CallStatus::accepts`]).
    /// Numbers are facts of the session and only fill empty fields: a bridged
    /// outbound call reports the operator's leg in `To`, which must not
    /// replace the destination. Duration and direction are last-write-wins.
    pub fn merge_into(&self, current: &CallRecord) -> CallRecord {
        let mut next = current.clone();

        if let Some(status) = self.status {
            if current.status.accepts(status) {
                next.status = status;
            }
        }
        if let Some(duration) = self.duration_seconds {
            next.duration_seconds = duration.max(0);
        }
        if let Some(direction) = self.direction {
            next.direction = direction;
        }
        if let Some(number) = self.counterparty_number.as_deref().filter(|n| !n.is_empty()) {
            if next.counterparty_number.is_empty() {
                next.counterparty_number = number.to_string();
                next.counterparty_canonical = phone::canonical(number);
            }
        }
        if let Some(number) = self.internal_number.as_deref().filter(|n| !n.is_empty()) {
            if next.internal_number.is_empty() {
                next.internal_number = number.to_string();
                next.internal_canonical = phone::canonical(number);
            }
        }
        next
    }
}

/// Outcome of applying a status update
#[derive(Debug, Clone)]
pub struct StatusApplied {
    pub record: CallRecord,
    pub previous_status: CallStatus,
    pub changed: bool,
}

impl StatusApplied {
    /// The record moved into `completed` with this update
    pub fn just_completed(&self) -> bool {
        self.previous_status != CallStatus::Completed && self.record.status == CallStatus::Completed
    }
}

const SELECT_CALL: &str = "SELECT session_id, direction, counterparty_number, counterparty_canonical,
        internal_number, internal_canonical, status, duration_seconds, recording_url, recording_sid,
        transcript, ai_summary, summary_is_placeholder, external_conversation_id, created_at, updated_at
     FROM calls";

const MAX_STATUS_RETRIES: usize = 3;

impl DatabaseManager {
    /// Insert a call record unless one already exists for the session.
    /// Returns whether a row was created.
    pub async fn insert_call_if_absent(&self, call: &NewCallRecord) -> Result<bool> {
        let created = to_millis(call.created_at);
        let result = sqlx::query(
            "INSERT INTO calls (session_id, direction, counterparty_number, counterparty_canonical,
                 internal_number, internal_canonical, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO NOTHING",
        )
        .bind(&call.session_id)
        .bind(call.direction.as_str())
        .bind(&call.counterparty_number)
        .bind(phone::canonical(&call.counterparty_number))
        .bind(&call.internal_number)
        .bind(phone::canonical(&call.internal_number))
        .bind(call.status.as_str())
        .bind(created)
        .bind(created)
        .execute(self.pool())
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            debug!("📞 Call record created for {}", call.session_id);
        }
        Ok(inserted)
    }

    pub async fn get_call(&self, session_id: &str) -> Result<Option<CallRecord>> {
        let row = sqlx::query(&format!("{} WHERE session_id = ?", SELECT_CALL))
            .bind(session_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(CallRecord::from_row).transpose()
    }

    /// Most recent first
    pub async fn list_calls(&self, limit: i64, offset: i64) -> Result<Vec<CallRecord>> {
        let rows = sqlx::query(&format!("{} ORDER BY created_at DESC LIMIT ? OFFSET ?", SELECT_CALL))
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(CallRecord::from_row).collect()
    }

    /// Apply a status webhook to an existing record
    ///
    /// The write is guarded on the status that was read, so a concurrent
    /// writer that made the call terminal in between forces a re-read instead
    /// of being overwritten.
    pub async fn apply_status_update(&self, session_id: &str, update: &StatusUpdate) -> Result<StatusApplied> {
        for _ in 0..MAX_STATUS_RETRIES {
            let current = self
                .get_call(session_id)
                .await?
                .ok_or_else(|| CallEngineError::not_found(format!("call {}", session_id)))?;

            let merged = update.merge_into(&current);
            if merged == current {
                return Ok(StatusApplied {
                    record: current.clone(),
                    previous_status: current.status,
                    changed: false,
                });
            }

            let now = Utc::now();
            let result = sqlx::query(
                "UPDATE calls SET status = ?, duration_seconds = ?, direction = ?,
                     counterparty_number = ?, counterparty_canonical = ?,
                     internal_number = ?, internal_canonical = ?, updated_at = ?
                 WHERE session_id = ? AND status = ?",
            )
            .bind(merged.status.as_str())
            .bind(merged.duration_seconds)
            .bind(merged.direction.as_str())
            .bind(&merged.counterparty_number)
            .bind(&merged.counterparty_canonical)
            .bind(&merged.internal_number)
            .bind(&merged.internal_canonical)
            .bind(to_millis(now))
            .bind(session_id)
            .bind(current.status.as_str())
            .execute(self.pool())
            .await?;

            if result.rows_affected() > 0 {
                return Ok(StatusApplied {
                    record: CallRecord {
                        updated_at: now,
                        ..merged
                    },
                    previous_status: current.status,
                    changed: true,
                });
            }
            debug!("Status of {} changed concurrently, re-reading", session_id);
        }

        Err(CallEngineError::database(format!(
            "status update for {} kept racing with other writers",
            session_id
        )))
    }

    /// Attach a recording by sid; a missing URL keeps the stored one
    pub async fn set_recording(
        &self,
        session_id: &str,
        recording_sid: &str,
        recording_url: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE calls SET recording_sid = ?, recording_url = COALESCE(?, recording_url), updated_at = ?
             WHERE session_id = ?",
        )
        .bind(recording_sid)
        .bind(recording_url)
        .bind(to_millis(Utc::now()))
        .bind(session_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write the transcript only if none exists yet
    pub async fn set_transcript_if_absent(&self, session_id: &str, transcript: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE calls SET transcript = ?, updated_at = ? WHERE session_id = ? AND transcript IS NULL",
        )
        .bind(transcript)
        .bind(to_millis(Utc::now()))
        .bind(session_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Claim an external conversation for a call and write its transcript
    ///
    /// Fails softly (returns `false`) when the call already has a transcript
    /// or the conversation is already assigned to another call.
    pub async fn assign_conversation(&self, session_id: &str, conversation_id: &str, transcript: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE calls SET transcript = ?, external_conversation_id = ?, updated_at = ?
             WHERE session_id = ? AND transcript IS NULL AND external_conversation_id IS NULL",
        )
        .bind(transcript)
        .bind(conversation_id)
        .bind(to_millis(Utc::now()))
        .bind(session_id)
        .execute(self.pool())
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                warn!("Conversation {} is already assigned to another call", conversation_id);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Conversation ids already assigned to some call
    pub async fn assigned_conversation_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT external_conversation_id FROM calls WHERE external_conversation_id IS NOT NULL")
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("external_conversation_id").map_err(Into::into))
            .collect()
    }

    pub async fn find_call_by_conversation(&self, conversation_id: &str) -> Result<Option<CallRecord>> {
        let row = sqlx::query(&format!("{} WHERE external_conversation_id = ?", SELECT_CALL))
            .bind(conversation_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(CallRecord::from_row).transpose()
    }

    /// Store a real summary. Replaces a placeholder note, never another summary.
    pub async fn set_ai_summary(&self, session_id: &str, summary: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE calls SET ai_summary = ?, summary_is_placeholder = 0, updated_at = ?
             WHERE session_id = ? AND (ai_summary IS NULL OR summary_is_placeholder = 1)",
        )
        .bind(summary)
        .bind(to_millis(Utc::now()))
        .bind(session_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Store a synthesized note on a call that has neither summary nor transcript
    pub async fn set_placeholder_summary(&self, session_id: &str, note: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE calls SET ai_summary = ?, summary_is_placeholder = 1, updated_at = ?
             WHERE session_id = ? AND ai_summary IS NULL AND transcript IS NULL",
        )
        .bind(note)
        .bind(to_millis(Utc::now()))
        .bind(session_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Completed, non-empty calls still without a transcript, oldest first
    pub async fn list_calls_needing_transcript(&self) -> Result<Vec<CallRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE status = 'completed' AND duration_seconds > 0 AND transcript IS NULL
             ORDER BY created_at ASC, session_id ASC",
            SELECT_CALL
        ))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(CallRecord::from_row).collect()
    }

    /// Non-terminal calls created at or after `since`
    pub async fn list_live_calls_since(&self, since: DateTime<Utc>) -> Result<Vec<CallRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE status NOT IN ('completed', 'failed') AND created_at >= ?",
            SELECT_CALL
        ))
        .bind(to_millis(since))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(CallRecord::from_row).collect()
    }

    /// Inbound calls without a transcript created at or after `since`,
    /// most recent first
    pub async fn list_transcriptless_inbound_since(&self, since: DateTime<Utc>) -> Result<Vec<CallRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE direction = 'inbound' AND transcript IS NULL AND created_at >= ?
             ORDER BY created_at DESC",
            SELECT_CALL
        ))
        .bind(to_millis(since))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(CallRecord::from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn db_with_call(sid: &str) -> DatabaseManager {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        db.insert_call_if_absent(
            &NewCallRecord::new(sid, CallDirection::Inbound, CallStatus::Ringing)
                .with_numbers("0412345678", "+61290000000"),
        )
        .await
        .unwrap();
        db
    }

    #[test]
    fn test_provider_status_vocabulary() {
        assert_eq!(CallStatus::parse("queued"), Some(CallStatus::Initiated));
        assert_eq!(CallStatus::parse("no-answer"), Some(CallStatus::Failed));
        assert_eq!(CallStatus::parse("In-Progress"), Some(CallStatus::InProgress));
        assert_eq!(CallStatus::parse("on-hold"), None);
        assert_eq!(CallDirection::parse("outbound-api"), Some(CallDirection::Outbound));
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let db = db_with_call("CA1").await;
        let again = db
            .insert_call_if_absent(&NewCallRecord::new("CA1", CallDirection::Outbound, CallStatus::Initiated))
            .await
            .unwrap();
        assert!(!again);

        let call = db.get_call("CA1").await.unwrap().unwrap();
        assert_eq!(call.direction, CallDirection::Inbound);
        assert_eq!(call.counterparty_canonical, "+61412345678");
        assert_eq!(db.list_calls(10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_completed_status_is_sticky() {
        let db = db_with_call("CA2").await;
        let done = db
            .apply_status_update(
                "CA2",
                &StatusUpdate {
                    status: Some(CallStatus::Completed),
                    duration_seconds: Some(42),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(done.just_completed());

        let late = db
            .apply_status_update(
                "CA2",
                &StatusUpdate {
                    status: Some(CallStatus::Ringing),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!late.changed);
        assert_eq!(late.record.status, CallStatus::Completed);
        assert_eq!(late.record.duration_seconds, 42);
    }

    #[tokio::test]
    async fn test_duplicate_status_update_changes_nothing() {
        let db = db_with_call("CA3").await;
        let update = StatusUpdate {
            status: Some(CallStatus::InProgress),
            ..Default::default()
        };
        let first = db.apply_status_update("CA3", &update).await.unwrap();
        let second = db.apply_status_update("CA3", &update).await.unwrap();
        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(first.record, second.record);
    }

    #[tokio::test]
    async fn test_failed_status_only_yields_to_completed() {
        let db = db_with_call("CA3f").await;
        let status = |status| StatusUpdate {
            status: Some(status),
            ..Default::default()
        };

        let failed = db.apply_status_update("CA3f", &status(CallStatus::Failed)).await.unwrap();
        assert_eq!(failed.record.status, CallStatus::Failed);

        let late = db.apply_status_update("CA3f", &status(CallStatus::Ringing)).await.unwrap();
        assert!(!late.changed);
        assert_eq!(late.record.status, CallStatus::Failed);

        let completed = db.apply_status_update("CA3f", &status(CallStatus::Completed)).await.unwrap();
        assert!(completed.just_completed());

        let after = db.apply_status_update("CA3f", &status(CallStatus::Failed)).await.unwrap();
        assert!(!after.changed);
        assert_eq!(after.record.status, CallStatus::Completed);
    }

    #[tokio::test]
    async fn test_numbers_only_fill_empty_fields() {
        let db = db_with_call("CA4").await;
        let applied = db
            .apply_status_update(
                "CA4",
                &StatusUpdate {
                    counterparty_number: Some("0499999999".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(applied.record.counterparty_number, "0412345678");
    }

    #[tokio::test]
    async fn test_transcript_is_write_once() {
        let db = db_with_call("CA5").await;
        assert!(db.set_transcript_if_absent("CA5", "first").await.unwrap());
        assert!(!db.set_transcript_if_absent("CA5", "second").await.unwrap());
        assert!(!db.assign_conversation("CA5", "conv-1", "third").await.unwrap());
        let call = db.get_call("CA5").await.unwrap().unwrap();
        assert_eq!(call.transcript.as_deref(), Some("first"));
        assert!(call.external_conversation_id.is_none());
    }

    #[tokio::test]
    async fn test_conversation_cannot_be_assigned_twice() {
        let db = db_with_call("CA6").await;
        db.insert_call_if_absent(&NewCallRecord::new("CA7", CallDirection::Inbound, CallStatus::Completed))
            .await
            .unwrap();
        assert!(db.assign_conversation("CA6", "conv-9", "hello").await.unwrap());
        assert!(!db.assign_conversation("CA7", "conv-9", "hello").await.unwrap());
        assert_eq!(db.assigned_conversation_ids().await.unwrap(), vec!["conv-9".to_string()]);
    }

    #[tokio::test]
    async fn test_placeholder_gives_way_to_real_summary() {
        let db = db_with_call("CA8").await;
        assert!(db.set_placeholder_summary("CA8", "Inbound call, 30s").await.unwrap());
        assert!(!db.set_placeholder_summary("CA8", "again").await.unwrap());
        assert!(db.set_ai_summary("CA8", "Caller asked about rostering.").await.unwrap());
        assert!(!db.set_ai_summary("CA8", "Another summary").await.unwrap());

        let call = db.get_call("CA8").await.unwrap().unwrap();
        assert_eq!(call.ai_summary.as_deref(), Some("Caller asked about rostering."));
        assert!(!call.summary_is_placeholder);
    }

    #[tokio::test]
    async fn test_calls_needing_transcript_are_oldest_first() {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        let base = Utc::now() - Duration::hours(1);
        for (sid, offset) in [("late", 30), ("early", 0), ("middle", 10)] {
            db.insert_call_if_absent(
                &NewCallRecord::new(sid, CallDirection::Inbound, CallStatus::Completed)
                    .created_at(base + Duration::minutes(offset)),
            )
            .await
            .unwrap();
            sqlx::query("UPDATE calls SET duration_seconds = 20 WHERE session_id = ?")
                .bind(sid)
                .execute(db.pool())
                .await
                .unwrap();
        }
        db.insert_call_if_absent(&NewCallRecord::new("empty", CallDirection::Inbound, CallStatus::Completed))
            .await
            .unwrap();

        let pending: Vec<String> = db
            .list_calls_needing_transcript()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.session_id)
            .collect();
        assert_eq!(pending, vec!["early", "middle", "late"]);
    }
}
