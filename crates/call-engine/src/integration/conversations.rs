//! AI voice-agent platform conversation API (ElevenLabs-compatible)
//!
//! Conversation details are returned as raw JSON. Field shapes vary between
//! platform versions, so parsing is left to
//! [`crate::correlation::candidate`], which never fails on an odd payload.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::config::AiAgentConfig;
use crate::error::{CallEngineError, Result};

const API_KEY_HEADER: &str = "xi-api-key";
const MAX_PAGE_SIZE: usize = 100;

/// A listed conversation before its detail is fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRef {
    pub conversation_id: String,
    pub start_time_unix: Option<i64>,
}

#[async_trait]
pub trait ConversationSource: Send + Sync {
    /// Most recent conversations, at most `limit`
    async fn list_conversations(&self, limit: usize) -> Result<Vec<ConversationRef>>;

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Value>;
}

pub struct ElevenLabsConversations {
    http: Client,
    config: AiAgentConfig,
}

impl ElevenLabsConversations {
    pub fn new(config: AiAgentConfig, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, config })
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| CallEngineError::not_configured("AI platform API key"))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }
}

fn parse_listing(page: &Value) -> Vec<ConversationRef> {
    page.get("conversations")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let id = item.get("conversation_id")?.as_str()?.to_string();
                    Some(ConversationRef {
                        conversation_id: id,
                        start_time_unix: item.get("start_time_unix_secs").and_then(Value::as_i64),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ConversationSource for ElevenLabsConversations {
    async fn list_conversations(&self, limit: usize) -> Result<Vec<ConversationRef>> {
        let key = self.api_key()?;
        let mut found = Vec::new();
        let mut cursor: Option<String> = None;

        while found.len() < limit {
            let page_size = (limit - found.len()).min(MAX_PAGE_SIZE).to_string();
            let mut query: Vec<(&str, &str)> = vec![("page_size", page_size.as_str())];
            if let Some(agent_id) = self.config.agent_id.as_deref() {
                query.push(("agent_id", agent_id));
            }
            if let Some(c) = cursor.as_deref() {
                query.push(("cursor", c));
            }

            let response = self
                .http
                .get(self.url("/convai/conversations"))
                .header(API_KEY_HEADER, key)
                .query(&query)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(CallEngineError::integration(format!(
                    "list conversations failed with {}",
                    response.status()
                )));
            }
            let page: Value = response.json().await?;
            let items = parse_listing(&page);
            if items.is_empty() {
                break;
            }
            found.extend(items);

            let has_more = page.get("has_more").and_then(Value::as_bool).unwrap_or(false);
            cursor = page.get("next_cursor").and_then(Value::as_str).map(str::to_string);
            if !has_more || cursor.is_none() {
                break;
            }
        }

        found.truncate(limit);
        debug!("Listed {} conversations from AI platform", found.len());
        Ok(found)
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Value> {
        let key = self.api_key()?;
        let response = self
            .http
            .get(self.url(&format!("/convai/conversations/{}", conversation_id)))
            .header(API_KEY_HEADER, key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CallEngineError::integration(format!(
                "fetch conversation {} failed with {}",
                conversation_id,
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}
