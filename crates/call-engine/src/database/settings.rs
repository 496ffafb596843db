//! Feature toggles stored as key/value rows

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::{to_millis, DatabaseManager};
use crate::error::{CallEngineError, Result};

pub const AI_FALLBACK_ENABLED: &str = "ai_fallback_enabled";
pub const DISPLAY_TIMEZONE: &str = "display_timezone";

pub const DEFAULT_DISPLAY_TIMEZONE: &str = "Australia/Sydney";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSettings {
    pub ai_fallback_enabled: bool,
    pub display_timezone: String,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            ai_fallback_enabled: false,
            display_timezone: DEFAULT_DISPLAY_TIMEZONE.to_string(),
        }
    }
}

/// Partial update for [`FeatureSettings`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSettingsUpdate {
    pub ai_fallback_enabled: Option<bool>,
    pub display_timezone: Option<String>,
}

impl DatabaseManager {
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| r.try_get("value").map_err(Into::into)).transpose()
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(to_millis(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn feature_settings(&self) -> Result<FeatureSettings> {
        let defaults = FeatureSettings::default();
        let ai_fallback_enabled = self
            .get_setting(AI_FALLBACK_ENABLED)
            .await?
            .map(|v| v == "true")
            .unwrap_or(defaults.ai_fallback_enabled);
        let display_timezone = self
            .get_setting(DISPLAY_TIMEZONE)
            .await?
            .unwrap_or(defaults.display_timezone);
        Ok(FeatureSettings {
            ai_fallback_enabled,
            display_timezone,
        })
    }

    pub async fn update_feature_settings(&self, update: FeatureSettingsUpdate) -> Result<FeatureSettings> {
        if let Some(tz) = update.display_timezone.as_deref() {
            if tz.trim().is_empty() {
                return Err(CallEngineError::invalid_input("displayTimezone must not be empty"));
            }
            self.set_setting(DISPLAY_TIMEZONE, tz.trim()).await?;
        }
        if let Some(enabled) = update.ai_fallback_enabled {
            self.set_setting(AI_FALLBACK_ENABLED, if enabled { "true" } else { "false" })
                .await?;
        }
        self.feature_settings().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_until_set() {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        assert_eq!(db.feature_settings().await.unwrap(), FeatureSettings::default());

        let updated = db
            .update_feature_settings(FeatureSettingsUpdate {
                ai_fallback_enabled: Some(true),
                display_timezone: None,
            })
            .await
            .unwrap();
        assert!(updated.ai_fallback_enabled);
        assert_eq!(updated.display_timezone, DEFAULT_DISPLAY_TIMEZONE);
    }

    #[tokio::test]
    async fn test_blank_timezone_rejected() {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        let result = db
            .update_feature_settings(FeatureSettingsUpdate {
                ai_fallback_enabled: None,
                display_timezone: Some(" ".to_string()),
            })
            .await;
        assert!(matches!(result, Err(CallEngineError::InvalidInput(_))));
    }
}
