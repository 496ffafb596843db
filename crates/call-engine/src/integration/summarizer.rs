//! Call summaries from a chat-completions endpoint

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::SummarizerConfig;
use crate::error::{CallEngineError, Result};

/// Longest transcript excerpt sent for summarization
const MAX_TRANSCRIPT_CHARS: usize = 12_000;

const SYSTEM_PROMPT: &str = "You summarise phone calls for a disability-support provider. \
Reply with one or two plain sentences covering who called and what they needed. \
Do not include phone numbers.";

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// A one or two sentence summary of the transcript
    async fn summarize(&self, transcript: &str) -> Result<String>;
}

pub struct ChatCompletionsSummarizer {
    http: Client,
    config: SummarizerConfig,
}

impl ChatCompletionsSummarizer {
    pub fn new(config: SummarizerConfig, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, config })
    }
}

fn excerpt(transcript: &str) -> &str {
    match transcript.char_indices().nth(MAX_TRANSCRIPT_CHARS) {
        Some((idx, _)) => &transcript[..idx],
        None => transcript,
    }
}

fn completion_text(body: &Value) -> Option<String> {
    body.pointer("/choices/0/message/content")?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Summarizer for ChatCompletionsSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String> {
        let key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| CallEngineError::not_configured("summarizer API key"))?;

        let request = json!({
            "model": self.config.model,
            "temperature": 0.2,
            "max_tokens": 120,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": excerpt(transcript)},
            ],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.api_base_url.trim_end_matches('/')))
            .bearer_auth(key)
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CallEngineError::integration(format!(
                "summary request failed with {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        completion_text(&body).ok_or_else(|| CallEngineError::integration("summary response had no content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_text_extraction() {
        let body = json!({"choices": [{"message": {"content": "  Caller asked about shifts. "}}]});
        assert_eq!(completion_text(&body).as_deref(), Some("Caller asked about shifts."));
        assert_eq!(completion_text(&json!({"choices": []})), None);
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let long = "é".repeat(MAX_TRANSCRIPT_CHARS + 10);
        assert_eq!(excerpt(&long).chars().count(), MAX_TRANSCRIPT_CHARS);
        assert_eq!(excerpt("short"), "short");
    }
}
