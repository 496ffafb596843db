//! # Provider Integrations
//!
//! Outbound HTTP to the three external services the engine talks to:
//!
//! - [`telephony`]: places calls, sends SMS, downloads recordings
//! - [`conversations`]: lists and fetches AI voice-agent conversations
//! - [`summarizer`]: writes one or two sentence call summaries
//!
//! Each client sits behind a trait so tests can substitute in-process fakes.
//! Clients are always constructed; a missing credential surfaces as
//! [`crate::CallEngineError::NotConfigured`] when the feature is used, never
//! as a startup failure.

pub mod conversations;
pub mod summarizer;
pub mod telephony;

use std::sync::Arc;

pub use conversations::{ConversationRef, ConversationSource, ElevenLabsConversations};
pub use summarizer::{ChatCompletionsSummarizer, Summarizer};
pub use telephony::{OutboundCallRequest, ProviderResource, RecordingAudio, SmsRequest, TelephonyClient, TwilioClient};

use crate::config::CallEngineConfig;
use crate::error::Result;

/// The set of provider clients the engine runs with
#[derive(Clone)]
pub struct Integrations {
    pub telephony: Arc<dyn TelephonyClient>,
    pub conversations: Arc<dyn ConversationSource>,
    pub summarizer: Arc<dyn Summarizer>,
}

impl Integrations {
    /// HTTP clients for every provider, built from configuration
    pub fn from_config(config: &CallEngineConfig) -> Result<Self> {
        let timeout = config.general.http_timeout();
        Ok(Self {
            telephony: Arc::new(TwilioClient::new(config.telephony.clone(), timeout)?),
            conversations: Arc::new(ElevenLabsConversations::new(config.ai_agent.clone(), timeout)?),
            summarizer: Arc::new(ChatCompletionsSummarizer::new(config.summarizer.clone(), timeout)?),
        })
    }
}
