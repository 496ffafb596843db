//! Sequential hunt-group router
//!
//! A state machine driven one step per webhook. The provider owns the wait
//! while a phone rings; the router only ever answers "what next" and returns
//! immediately.
//!
//! ```text
//!   inbound ──► filter members ──► none eligible ──────────────► FALLBACK
//!                     │
//!                     ▼
//!               RINGING(step=i) ──answered──► CONNECTED
//!                     │
//!                  no answer / busy / failed
//!                     │
//!                     ▼
//!        next routable, eligible member ──► RINGING(step=j>i)
//!        or j == members.len()          ──► FALLBACK (AI or voicemail)
//! ```

use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, error, info, warn};

use super::document::{CallControlDocument, Dial, DialTarget};
use crate::agent::{AgentDirectory, AgentEndpoint, AvailabilityOracle};
use crate::config::CallEngineConfig;
use crate::database::{
    CallDirection, CallStatus, DatabaseManager, HuntGroup, NewCallRecord, RoutedMember, RoutingSession,
    RoutingState,
};
use crate::error::{CallEngineError, Result};
use crate::notify::{EngineEvent, NotificationSink};

pub const HUNT_STEP_PATH: &str = "/webhooks/voice/hunt-step";
pub const RECORDING_CALLBACK_PATH: &str = "/webhooks/voice/recording";

/// First webhook of an inbound call
#[derive(Debug, Clone)]
pub struct InboundCall {
    pub call_sid: String,
    pub from: String,
    pub to: String,
    pub status: Option<CallStatus>,
}

/// Result of the most recent ring attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialOutcome {
    Answered,
    NoAnswer,
    Busy,
    Failed,
    Canceled,
}

impl DialOutcome {
    /// Unknown or missing values count as no answer
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "completed" | "answered" => DialOutcome::Answered,
            "busy" => DialOutcome::Busy,
            "failed" => DialOutcome::Failed,
            "canceled" => DialOutcome::Canceled,
            _ => DialOutcome::NoAnswer,
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, DialOutcome::Answered)
    }
}

/// The router's own action callback
#[derive(Debug, Clone)]
pub struct HuntStep {
    pub call_sid: String,
    pub step: usize,
    /// Caller number hint carried in the callback URL
    pub from: Option<String>,
    pub outcome: DialOutcome,
}

pub struct HuntGroupRouter {
    db: DatabaseManager,
    directory: Arc<dyn AgentDirectory>,
    oracle: Arc<dyn AvailabilityOracle>,
    notifier: Arc<dyn NotificationSink>,
    config: Arc<CallEngineConfig>,
}

impl HuntGroupRouter {
    pub fn new(
        db: DatabaseManager,
        directory: Arc<dyn AgentDirectory>,
        oracle: Arc<dyn AvailabilityOracle>,
        notifier: Arc<dyn NotificationSink>,
        config: Arc<CallEngineConfig>,
    ) -> Self {
        Self {
            db,
            directory,
            oracle,
            notifier,
            config,
        }
    }

    /// Handle the inbound webhook. Internal faults produce the voicemail
    /// document; the caller always gets something.
    pub async fn handle_inbound(&self, call: &InboundCall) -> CallControlDocument {
        match self.route_inbound(call).await {
            Ok(doc) => doc,
            Err(e) => {
                error!("❌ Inbound routing failed for {}: {}", call.call_sid, e);
                self.voicemail_document()
            }
        }
    }

    /// Handle a dial-outcome webhook
    pub async fn handle_dial_outcome(&self, step: &HuntStep) -> CallControlDocument {
        match self.route_dial_outcome(step).await {
            Ok(doc) => doc,
            Err(e) => {
                error!("❌ Hunt step {} failed for {}: {}", step.step, step.call_sid, e);
                self.voicemail_document()
            }
        }
    }

    async fn route_inbound(&self, call: &InboundCall) -> Result<CallControlDocument> {
        let status = call.status.unwrap_or(CallStatus::Ringing);
        let record = NewCallRecord::new(&call.call_sid, CallDirection::Inbound, status).with_numbers(&call.from, &call.to);
        if self.db.insert_call_if_absent(&record).await? {
            info!("📞 Inbound call {} from {}", call.call_sid, call.from);
            self.notifier.publish(EngineEvent::CallUpdated {
                session_id: call.call_sid.clone(),
                status,
            });
        }

        if let Some(session) = self.db.get_routing_session(&call.call_sid).await? {
            debug!("Inbound webhook redelivered for {}", call.call_sid);
            return self.render_session(&session);
        }

        if !self.config.telephony.is_configured() {
            warn!("⚠️ Telephony provider not configured, sending {} to voicemail", call.call_sid);
            return Ok(self.voicemail_document());
        }

        let Some(group) = self.db.active_hunt_group().await? else {
            warn!("⚠️ No active hunt group, sending {} to voicemail", call.call_sid);
            return Ok(self.voicemail_document());
        };

        let members = self.eligible_members(&group).await;
        let mut session = RoutingSession::new(&call.call_sid, &group.id, members, &call.from);
        if session.members.is_empty() {
            session.state = self.fallback_state().await;
        }

        if !self.db.create_routing_session_if_absent(&session).await? {
            // a concurrent delivery created it first
            return self.rerender(&call.call_sid).await;
        }

        info!(
            "🎯 Hunt group '{}' for {}: {} of {} members eligible",
            group.name,
            call.call_sid,
            session.member_count(),
            group.members.len()
        );

        if session.state != RoutingState::Ringing {
            self.publish_routing(&session.call_session_id, session.state, 0);
            return Ok(self.fallback_document(session.state, &session.originating_number));
        }

        // members were filtered just now, only endpoints need checking
        self.advance(&session, 0, 0, None).await
    }

    async fn route_dial_outcome(&self, step: &HuntStep) -> Result<CallControlDocument> {
        let Some(session) = self.db.get_routing_session(&step.call_sid).await? else {
            warn!("⚠️ Dial outcome for unknown routing session {}, falling back", step.call_sid);
            let state = self.fallback_state().await;
            return Ok(self.fallback_document(state, step.from.as_deref().unwrap_or_default()));
        };

        if session.state != RoutingState::Ringing || step.step != session.step_index {
            debug!(
                "Dial outcome for {} step {} does not match session (state {}, step {}), re-rendering",
                step.call_sid,
                step.step,
                session.state.as_str(),
                session.step_index
            );
            return self.render_session(&session);
        }

        if step.outcome.is_answered() {
            if !self
                .db
                .transition_routing_session(&step.call_sid, step.step, step.step, RoutingState::Connected)
                .await?
            {
                return self.rerender(&step.call_sid).await;
            }
            if let Some(member) = session.current_member() {
                info!("✅ Call {} answered by agent {}", step.call_sid, member.agent_id);
            }
            self.publish_routing(&step.call_sid, RoutingState::Connected, step.step);
            return Ok(CallControlDocument::new().hangup());
        }

        debug!("Step {} of {} ended with {:?}", step.step, step.call_sid, step.outcome);
        let check_busy = self.check_busy_for(&session).await?;
        self.advance(&session, step.step, step.step + 1, Some(check_busy)).await
    }

    /// Move from `from_step` to the first member at or after `start` that has
    /// an endpoint and, when `recheck_busy` is set, is still eligible. Past
    /// the last member the session falls back.
    async fn advance(
        &self,
        session: &RoutingSession,
        from_step: usize,
        start: usize,
        recheck_busy: Option<bool>,
    ) -> Result<CallControlDocument> {
        let mut next = start;
        while let Some(member) = session.members.get(next) {
            if !member.has_endpoint() {
                debug!("Agent {} has no routable endpoint, skipping", member.agent_id);
                next += 1;
                continue;
            }
            if let Some(check_busy) = recheck_busy {
                if !self.member_eligible(member, check_busy).await {
                    next += 1;
                    continue;
                }
            }
            break;
        }

        let next = next.min(session.member_count());
        let to_state = if next == session.member_count() {
            self.fallback_state().await
        } else {
            RoutingState::Ringing
        };

        let unchanged = next == from_step && to_state == RoutingState::Ringing;
        if !unchanged
            && !self
                .db
                .transition_routing_session(&session.call_session_id, from_step, next, to_state)
                .await?
        {
            return self.rerender(&session.call_session_id).await;
        }
        self.publish_routing(&session.call_session_id, to_state, next);

        match to_state {
            RoutingState::Ringing => self.ring_document(session, next),
            fallback => {
                info!(
                    "↪️ Hunt group exhausted for {}, falling back ({})",
                    session.call_session_id,
                    fallback.as_str()
                );
                Ok(self.fallback_document(fallback, &session.originating_number))
            }
        }
    }

    async fn rerender(&self, call_sid: &str) -> Result<CallControlDocument> {
        let session = self
            .db
            .get_routing_session(call_sid)
            .await?
            .ok_or_else(|| CallEngineError::routing(format!("routing session {} disappeared", call_sid)))?;
        self.render_session(&session)
    }

    /// Document for the session's persisted state
    fn render_session(&self, session: &RoutingSession) -> Result<CallControlDocument> {
        match session.state {
            RoutingState::Ringing => match session.current_member() {
                Some(_) => self.ring_document(session, session.step_index),
                None => Ok(self.voicemail_document()),
            },
            RoutingState::Connected | RoutingState::Ended => Ok(CallControlDocument::new().hangup()),
            fallback => Ok(self.fallback_document(fallback, &session.originating_number)),
        }
    }

    fn ring_document(&self, session: &RoutingSession, step: usize) -> Result<CallControlDocument> {
        let member = session
            .members
            .get(step)
            .ok_or_else(|| CallEngineError::routing(format!("no member at step {}", step)))?;

        let browser = member.browser_identity.as_deref().filter(|b| !b.trim().is_empty());
        let phone = member.phone_number.as_deref().filter(|p| !p.trim().is_empty());
        let target = match (browser, phone) {
            (Some(identity), _) if self.config.general.prefer_browser_endpoints => DialTarget::Client(identity.to_string()),
            (_, Some(number)) => DialTarget::Number(number.to_string()),
            (Some(identity), None) => DialTarget::Client(identity.to_string()),
            (None, None) => {
                return Err(CallEngineError::routing(format!("agent {} has no endpoint", member.agent_id)));
            }
        };

        let action = self.hunt_step_url(&session.call_session_id, step, &session.originating_number)?;
        debug!("🔔 Ringing agent {} for {} (step {})", member.agent_id, session.call_session_id, step);

        Ok(CallControlDocument::new().dial(
            Dial::new(target)
                .timeout(member.ring_seconds)
                .action(action)
                .record(self.config.general.callback_url(RECORDING_CALLBACK_PATH)),
        ))
    }

    fn hunt_step_url(&self, call_sid: &str, step: usize, from: &str) -> Result<String> {
        let base = self.config.general.callback_url(HUNT_STEP_PATH);
        let step = step.to_string();
        let url = Url::parse_with_params(&base, &[("callSid", call_sid), ("step", step.as_str()), ("from", from)])
            .map_err(|e| CallEngineError::configuration(format!("Invalid public base URL: {}", e)))?;
        Ok(url.to_string())
    }

    /// Voicemail prompt followed by a bounded recording
    pub fn voicemail_document(&self) -> CallControlDocument {
        CallControlDocument::new()
            .say(&self.config.voicemail.prompt)
            .record(
                self.config.voicemail.max_length_secs,
                Some(self.config.general.callback_url(RECORDING_CALLBACK_PATH)),
            )
            .hangup()
    }

    fn fallback_document(&self, state: RoutingState, caller: &str) -> CallControlDocument {
        if state == RoutingState::FallbackAi {
            if let Some(doc) = self.ai_redirect_document(caller) {
                return doc;
            }
        }
        self.voicemail_document()
    }

    fn ai_redirect_document(&self, caller: &str) -> Option<CallControlDocument> {
        let base = self.config.ai_agent.redirect_url.as_deref()?;
        match Url::parse_with_params(base, &[("caller", caller)]) {
            Ok(url) => Some(CallControlDocument::new().redirect(url.to_string())),
            Err(e) => {
                warn!("⚠️ Invalid AI redirect URL '{}': {}", base, e);
                None
            }
        }
    }

    /// AI fallback needs the feature toggle and a redirect URL
    async fn fallback_state(&self) -> RoutingState {
        let enabled = match self.db.feature_settings().await {
            Ok(settings) => settings.ai_fallback_enabled,
            Err(e) => {
                warn!("⚠️ Could not read feature settings: {}", e);
                false
            }
        };
        if enabled && self.config.ai_agent.fallback_configured() {
            RoutingState::FallbackAi
        } else {
            RoutingState::FallbackVoicemail
        }
    }

    async fn eligible_members(&self, group: &HuntGroup) -> Vec<RoutedMember> {
        let mut eligible = Vec::with_capacity(group.members.len());
        for member in &group.members {
            let endpoint = match self.directory.lookup(&member.agent_id).await {
                Ok(found) => found.unwrap_or_else(|| AgentEndpoint::new(&member.agent_id)),
                Err(e) => {
                    warn!("⚠️ Directory lookup failed for {}: {}", member.agent_id, e);
                    AgentEndpoint::new(&member.agent_id)
                }
            };

            match self.oracle.is_eligible(&endpoint, group.skip_if_busy).await {
                Ok(true) => eligible.push(RoutedMember {
                    agent_id: member.agent_id.clone(),
                    phone_number: endpoint.phone().map(str::to_string),
                    browser_identity: endpoint.browser().map(str::to_string),
                    ring_seconds: group.ring_seconds_for(member),
                }),
                Ok(false) => debug!("Agent {} not eligible", member.agent_id),
                Err(e) => warn!("⚠️ Availability check failed for {}: {}", member.agent_id, e),
            }
        }
        eligible
    }

    async fn member_eligible(&self, member: &RoutedMember, check_busy: bool) -> bool {
        let endpoint = AgentEndpoint {
            agent_id: member.agent_id.clone(),
            phone_number: member.phone_number.clone(),
            browser_identity: member.browser_identity.clone(),
        };
        match self.oracle.is_eligible(&endpoint, check_busy).await {
            Ok(eligible) => eligible,
            Err(e) => {
                warn!("⚠️ Availability check failed for {}: {}", member.agent_id, e);
                false
            }
        }
    }

    async fn check_busy_for(&self, session: &RoutingSession) -> Result<bool> {
        Ok(self
            .db
            .get_hunt_group(&session.hunt_group_id)
            .await?
            .map(|group| group.skip_if_busy)
            .unwrap_or(true))
    }

    fn publish_routing(&self, call_sid: &str, state: RoutingState, step: usize) {
        self.notifier.publish(EngineEvent::RoutingChanged {
            call_session_id: call_sid.to_string(),
            state,
            step,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{HeuristicAvailabilityOracle, StaticAgentDirectory};
    use crate::database::{AvailabilityStatus, HuntGroupInput, HuntGroupMember};
    use crate::notify::MemoryNotifier;

    fn configured() -> CallEngineConfig {
        let mut config = CallEngineConfig::default();
        config.general.public_base_url = "https://calls.example.org".to_string();
        config.telephony.account_sid = Some("AC1".to_string());
        config.telephony.auth_token = Some("secret".to_string());
        config.telephony.from_number = Some("+61290000000".to_string());
        config
    }

    async fn router(config: CallEngineConfig, agents: &[&str]) -> (DatabaseManager, HuntGroupRouter) {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        let directory = StaticAgentDirectory::new();
        for (i, agent) in agents.iter().enumerate() {
            directory.insert(AgentEndpoint::new(*agent).with_phone(format!("+6141111111{}", i)));
        }
        db.create_hunt_group(HuntGroupInput {
            name: Some("Roster".to_string()),
            ring_seconds: Some(20),
            members: Some(agents.iter().map(|a| HuntGroupMember::new(*a)).collect()),
            active: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();

        let router = HuntGroupRouter::new(
            db.clone(),
            Arc::new(directory),
            Arc::new(HeuristicAvailabilityOracle::new(db.clone(), 7200)),
            Arc::new(MemoryNotifier::new()),
            Arc::new(config),
        );
        (db, router)
    }

    fn inbound(sid: &str) -> InboundCall {
        InboundCall {
            call_sid: sid.to_string(),
            from: "0412345678".to_string(),
            to: "+61290000000".to_string(),
            status: Some(CallStatus::Ringing),
        }
    }

    fn no_answer(sid: &str, step: usize) -> HuntStep {
        HuntStep {
            call_sid: sid.to_string(),
            step,
            from: Some("0412345678".to_string()),
            outcome: DialOutcome::NoAnswer,
        }
    }

    #[test]
    fn test_dial_outcome_parsing() {
        assert_eq!(DialOutcome::parse("completed"), DialOutcome::Answered);
        assert_eq!(DialOutcome::parse("no-answer"), DialOutcome::NoAnswer);
        assert_eq!(DialOutcome::parse(""), DialOutcome::NoAnswer);
        assert_eq!(DialOutcome::parse("failed"), DialOutcome::Failed);
    }

    #[tokio::test]
    async fn test_without_telephony_config_goes_to_voicemail() {
        let (db, router) = router(CallEngineConfig::default(), &["alice"]).await;
        let doc = router.handle_inbound(&inbound("CA1")).await;
        assert!(doc.is_voicemail());
        assert!(db.get_call("CA1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_first_member_rung_with_step_callback() {
        let (db, router) = router(configured(), &["alice", "bob"]).await;
        let doc = router.handle_inbound(&inbound("CA2")).await;
        let dial = doc.dial_verb().unwrap();
        assert_eq!(dial.target, DialTarget::Number("+61411111110".to_string()));
        assert_eq!(dial.timeout_secs, Some(20));
        let action = dial.action_url.as_deref().unwrap();
        assert!(action.starts_with("https://calls.example.org/webhooks/voice/hunt-step?"));
        assert!(action.contains("callSid=CA2"));
        assert!(action.contains("step=0"));

        let session = db.get_routing_session("CA2").await.unwrap().unwrap();
        assert_eq!(session.step_index, 0);
        assert_eq!(session.state, RoutingState::Ringing);
    }

    #[tokio::test]
    async fn test_answer_connects_and_hangs_up() {
        let (db, router) = router(configured(), &["alice", "bob"]).await;
        router.handle_inbound(&inbound("CA3")).await;
        let doc = router
            .handle_dial_outcome(&HuntStep {
                outcome: DialOutcome::Answered,
                ..no_answer("CA3", 0)
            })
            .await;
        assert_eq!(doc, CallControlDocument::new().hangup());
        assert_eq!(
            db.get_routing_session("CA3").await.unwrap().unwrap().state,
            RoutingState::Connected
        );
    }

    #[tokio::test]
    async fn test_redelivered_outcome_does_not_skip_a_member() {
        let (db, router) = router(configured(), &["alice", "bob", "carol"]).await;
        router.handle_inbound(&inbound("CA4")).await;
        let first = router.handle_dial_outcome(&no_answer("CA4", 0)).await;
        let again = router.handle_dial_outcome(&no_answer("CA4", 0)).await;
        assert_eq!(first, again);
        assert_eq!(db.get_routing_session("CA4").await.unwrap().unwrap().step_index, 1);
    }

    #[tokio::test]
    async fn test_offline_member_skipped_and_exhaustion_reaches_voicemail() {
        let (db, router) = router(configured(), &["a", "b", "c"]).await;
        db.record_availability("a", AvailabilityStatus::Offline).await.unwrap();

        let first = router.handle_inbound(&inbound("CA5")).await;
        assert_eq!(first.dial_verb().unwrap().target, DialTarget::Number("+61411111111".to_string()));

        let second = router.handle_dial_outcome(&no_answer("CA5", 0)).await;
        assert_eq!(second.dial_verb().unwrap().target, DialTarget::Number("+61411111112".to_string()));

        let third = router.handle_dial_outcome(&no_answer("CA5", 1)).await;
        assert!(third.is_voicemail());
        assert!(third.dial_verb().is_none());

        let session = db.get_routing_session("CA5").await.unwrap().unwrap();
        assert_eq!(session.step_index, session.member_count());
        assert_eq!(session.state, RoutingState::FallbackVoicemail);
    }

    #[tokio::test]
    async fn test_transport_failure_advances() {
        let (_db, router) = router(configured(), &["alice", "bob"]).await;
        router.handle_inbound(&inbound("CA6")).await;
        let doc = router
            .handle_dial_outcome(&HuntStep {
                outcome: DialOutcome::Failed,
                ..no_answer("CA6", 0)
            })
            .await;
        assert_eq!(doc.dial_verb().unwrap().target, DialTarget::Number("+61411111111".to_string()));
    }

    #[tokio::test]
    async fn test_ai_fallback_requires_toggle_and_url() {
        let mut config = configured();
        config.ai_agent.redirect_url = Some("https://ai.example.org/twilio/inbound".to_string());
        let (db, router) = router(config, &["alice"]).await;
        db.record_availability("alice", AvailabilityStatus::Offline).await.unwrap();

        let without_toggle = router.handle_inbound(&inbound("CA7")).await;
        assert!(without_toggle.is_voicemail());

        db.set_setting("ai_fallback_enabled", "true").await.unwrap();
        let with_toggle = router.handle_inbound(&inbound("CA8")).await;
        let url = with_toggle.redirect_url().unwrap();
        assert!(url.starts_with("https://ai.example.org/twilio/inbound?caller="));
        assert!(url.contains("0412345678"));
    }

    #[tokio::test]
    async fn test_unknown_session_falls_back() {
        let (_db, router) = router(configured(), &["alice"]).await;
        let doc = router.handle_dial_outcome(&no_answer("CA-unknown", 3)).await;
        assert!(doc.is_voicemail());
    }

    #[tokio::test]
    async fn test_member_without_endpoint_is_skipped() {
        let (db, router) = router(configured(), &["alice"]).await;
        let group = db.active_hunt_group().await.unwrap().unwrap();
        db.update_hunt_group(
            &group.id,
            HuntGroupInput {
                members: Some(vec![HuntGroupMember::new("ghost"), HuntGroupMember::new("alice")]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let doc = router.handle_inbound(&inbound("CA9")).await;
        assert_eq!(doc.dial_verb().unwrap().target, DialTarget::Number("+61411111110".to_string()));
        assert_eq!(db.get_routing_session("CA9").await.unwrap().unwrap().step_index, 1);
    }

    #[tokio::test]
    async fn test_browser_endpoint_preferred() {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        db.create_hunt_group(HuntGroupInput {
            name: Some("Web".to_string()),
            members: Some(vec![HuntGroupMember::new("alice")]),
            active: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
        let directory =
            StaticAgentDirectory::new().with(AgentEndpoint::new("alice").with_phone("0411111110").with_browser("alice"));
        let router = HuntGroupRouter::new(
            db.clone(),
            Arc::new(directory),
            Arc::new(HeuristicAvailabilityOracle::new(db.clone(), 7200)),
            Arc::new(MemoryNotifier::new()),
            Arc::new(configured()),
        );
        let doc = router.handle_inbound(&inbound("CA10")).await;
        assert_eq!(doc.dial_verb().unwrap().target, DialTarget::Client("alice".to_string()));
    }
}
