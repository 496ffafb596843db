use std::sync::Arc;

use tracing::{info, warn};

use super::ai_webhook::AiPostCallHandler;
use super::outbound::OutboundBridger;
use super::sms::SmsSender;
use super::webhooks::WebhookIngestor;
use crate::agent::{AgentDirectory, HeuristicAvailabilityOracle};
use crate::audio::{AudioToken, AudioTokenIssuer};
use crate::config::CallEngineConfig;
use crate::correlation::{CorrelationEngine, SummaryWriter};
use crate::database::DatabaseManager;
use crate::error::{CallEngineError, Result};
use crate::integration::{Integrations, RecordingAudio};
use crate::notify::NotificationSink;
use crate::routing::HuntGroupRouter;

/// Call engine: every component wired over one database
///
/// Components share the store and the notification sink; none of them keeps
/// call state in memory beyond the correlation engine's pending set.
pub struct CallEngine {
    db: DatabaseManager,
    config: Arc<CallEngineConfig>,
    integrations: Integrations,
    notifier: Arc<dyn NotificationSink>,
    router: HuntGroupRouter,
    bridger: OutboundBridger,
    sms: SmsSender,
    webhooks: WebhookIngestor,
    ai_webhook: AiPostCallHandler,
    correlation: Arc<CorrelationEngine>,
    audio: AudioTokenIssuer,
}

impl CallEngine {
    pub fn new(
        db: DatabaseManager,
        config: Arc<CallEngineConfig>,
        integrations: Integrations,
        directory: Arc<dyn AgentDirectory>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        info!("🚀 Creating call engine");

        let oracle = Arc::new(HeuristicAvailabilityOracle::new(
            db.clone(),
            config.availability.busy_window_secs,
        ));
        let router = HuntGroupRouter::new(db.clone(), directory, oracle, notifier.clone(), config.clone());
        let bridger = OutboundBridger::new(
            db.clone(),
            integrations.telephony.clone(),
            notifier.clone(),
            config.clone(),
        );
        let sms = SmsSender::new(
            db.clone(),
            integrations.telephony.clone(),
            notifier.clone(),
            config.clone(),
        );

        let summaries = SummaryWriter::new(db.clone(), integrations.summarizer.clone(), notifier.clone());
        let correlation = Arc::new(CorrelationEngine::new(
            db.clone(),
            integrations.conversations.clone(),
            summaries.clone(),
            notifier.clone(),
            &config,
        ));
        let webhooks = WebhookIngestor::new(
            db.clone(),
            correlation.clone(),
            notifier.clone(),
            config.telephony.api_base_url.clone(),
        );
        let ai_webhook = AiPostCallHandler::new(db.clone(), summaries, notifier.clone(), &config);
        let audio = AudioTokenIssuer::new(&config.audio);

        if !config.telephony.is_configured() {
            warn!("⚠️ Telephony provider not configured: inbound calls go to voicemail, outbound is disabled");
        }

        Self {
            db,
            config,
            integrations,
            notifier,
            router,
            bridger,
            sms,
            webhooks,
            ai_webhook,
            correlation,
            audio,
        }
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.db
    }

    pub fn config(&self) -> &CallEngineConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Arc<dyn NotificationSink> {
        &self.notifier
    }

    pub fn router(&self) -> &HuntGroupRouter {
        &self.router
    }

    pub fn bridger(&self) -> &OutboundBridger {
        &self.bridger
    }

    pub fn sms(&self) -> &SmsSender {
        &self.sms
    }

    pub fn webhooks(&self) -> &WebhookIngestor {
        &self.webhooks
    }

    pub fn ai_webhook(&self) -> &AiPostCallHandler {
        &self.ai_webhook
    }

    pub fn correlation(&self) -> &Arc<CorrelationEngine> {
        &self.correlation
    }

    /// Token for a call that has a recording
    pub async fn issue_audio_token(&self, session_id: &str) -> Result<AudioToken> {
        let call = self
            .db
            .get_call(session_id)
            .await?
            .ok_or_else(|| CallEngineError::not_found(format!("call {}", session_id)))?;
        if call.recording_sid.is_none() {
            return Err(CallEngineError::not_found(format!("recording for call {}", session_id)));
        }
        self.audio.issue(session_id)
    }

    /// Recording bytes for the holder of a valid token
    pub async fn fetch_audio(&self, token: &str) -> Result<RecordingAudio> {
        let claims = self.audio.verify(token)?;
        let call = self
            .db
            .get_call(&claims.call_session_id)
            .await?
            .ok_or_else(|| CallEngineError::not_found(format!("call {}", claims.call_session_id)))?;
        let recording_sid = call
            .recording_sid
            .ok_or_else(|| CallEngineError::not_found(format!("recording for call {}", call.session_id)))?;
        self.integrations.telephony.fetch_recording(&recording_sid).await
    }
}
