//! SMS records, idempotent by provider message sid

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{from_millis, to_millis, DatabaseManager};
use crate::error::{CallEngineError, Result};

/// Delivery states after which a status callback is ignored
const FINAL_SMS_STATUSES: &[&str] = &["delivered", "undelivered", "failed", "received"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmsDirection {
    Inbound,
    Outbound,
}

impl SmsDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmsDirection::Inbound => "inbound",
            SmsDirection::Outbound => "outbound",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsRecord {
    pub message_sid: String,
    pub direction: SmsDirection,
    pub from_number: String,
    pub to_number: String,
    pub body: String,
    pub media_urls: Vec<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SmsRecord {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let direction: String = row.try_get("direction")?;
        let media: String = row.try_get("media_urls")?;
        Ok(Self {
            message_sid: row.try_get("message_sid")?,
            direction: match direction.as_str() {
                "inbound" => SmsDirection::Inbound,
                "outbound" => SmsDirection::Outbound,
                other => return Err(CallEngineError::database(format!("Unknown SMS direction '{}'", other))),
            },
            from_number: row.try_get("from_number")?,
            to_number: row.try_get("to_number")?,
            body: row.try_get("body")?,
            media_urls: serde_json::from_str(&media)?,
            status: row.try_get("status")?,
            created_at: from_millis(row.try_get("created_at")?),
            updated_at: from_millis(row.try_get("updated_at")?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewSmsRecord {
    pub message_sid: String,
    pub direction: SmsDirection,
    pub from_number: String,
    pub to_number: String,
    pub body: String,
    pub media_urls: Vec<String>,
    pub status: String,
}

impl DatabaseManager {
    pub async fn insert_sms_if_absent(&self, sms: &NewSmsRecord) -> Result<bool> {
        let now = to_millis(Utc::now());
        let result = sqlx::query(
            "INSERT INTO sms_messages (message_sid, direction, from_number, to_number, body, media_urls,
                 status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(message_sid) DO NOTHING",
        )
        .bind(&sms.message_sid)
        .bind(sms.direction.as_str())
        .bind(&sms.from_number)
        .bind(&sms.to_number)
        .bind(&sms.body)
        .bind(serde_json::to_string(&sms.media_urls)?)
        .bind(&sms.status)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Apply a delivery status callback. Final states are not overwritten.
    pub async fn update_sms_status(&self, message_sid: &str, status: &str) -> Result<bool> {
        let status = status.trim().to_ascii_lowercase();
        let result = sqlx::query(
            "UPDATE sms_messages SET status = ?, updated_at = ?
             WHERE message_sid = ? AND status NOT IN (?, ?, ?, ?)",
        )
        .bind(&status)
        .bind(to_millis(Utc::now()))
        .bind(message_sid)
        .bind(FINAL_SMS_STATUSES[0])
        .bind(FINAL_SMS_STATUSES[1])
        .bind(FINAL_SMS_STATUSES[2])
        .bind(FINAL_SMS_STATUSES[3])
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_sms(&self, message_sid: &str) -> Result<Option<SmsRecord>> {
        let row = sqlx::query(
            "SELECT message_sid, direction, from_number, to_number, body, media_urls, status, created_at, updated_at
             FROM sms_messages WHERE message_sid = ?",
        )
        .bind(message_sid)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(SmsRecord::from_row).transpose()
    }

    /// Most recent first
    pub async fn list_sms(&self, limit: i64, offset: i64) -> Result<Vec<SmsRecord>> {
        let rows = sqlx::query(
            "SELECT message_sid, direction, from_number, to_number, body, media_urls, status, created_at, updated_at
             FROM sms_messages ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(SmsRecord::from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound(sid: &str) -> NewSmsRecord {
        NewSmsRecord {
            message_sid: sid.to_string(),
            direction: SmsDirection::Outbound,
            from_number: "+61290000000".to_string(),
            to_number: "+61412345678".to_string(),
            body: "Your support worker is on the way".to_string(),
            media_urls: vec![],
            status: "queued".to_string(),
        }
    }

    #[tokio::test]
    async fn test_sms_insert_is_idempotent() {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        assert!(db.insert_sms_if_absent(&outbound("SM1")).await.unwrap());
        assert!(!db.insert_sms_if_absent(&outbound("SM1")).await.unwrap());
        assert_eq!(db.list_sms(10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_final_status_is_not_overwritten() {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        db.insert_sms_if_absent(&outbound("SM2")).await.unwrap();
        assert!(db.update_sms_status("SM2", "sent").await.unwrap());
        assert!(db.update_sms_status("SM2", "Delivered").await.unwrap());
        assert!(!db.update_sms_status("SM2", "sent").await.unwrap());
        assert_eq!(db.get_sms("SM2").await.unwrap().unwrap().status, "delivered");
    }
}
