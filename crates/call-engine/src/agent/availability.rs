//! Availability oracle
//!
//! [`HeuristicAvailabilityOracle`] answers "may we ring this agent now" from
//! three reads and no lock:
//!
//! 1. the agent's most recent manual status must be `online` (no history
//!    counts as online)
//! 2. when the hunt group asks for it, no non-terminal call record inside the
//!    trailing busy window may reference the agent's phone number or browser
//!    identity
//! 3. under the same condition, no ringing or connected routing session in
//!    that window may have the agent as its current member. The agent's leg
//!    of a routed inbound call never gets a call record of its own, so only
//!    this read sees an agent talking on a hunt group call.
//!
//! Two routing decisions that run at nearly the same moment can both see the
//! agent as free and both ring them. That race is accepted; the test
//! `test_concurrent_checks_can_both_pass` pins the behaviour down.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::debug;

use super::AgentEndpoint;
use crate::database::{AvailabilityStatus, CallRecord, DatabaseManager, RoutedMember, RoutingSession};
use crate::error::Result;
use crate::phone;

#[async_trait]
pub trait AvailabilityOracle: Send + Sync {
    /// Whether the agent may be selected as a ring target
    ///
    /// `check_busy` enables the live-call scan on top of the manual status.
    async fn is_eligible(&self, endpoint: &AgentEndpoint, check_busy: bool) -> Result<bool>;
}

/// Manual status plus a live-call scan of the call store
#[derive(Clone)]
pub struct HeuristicAvailabilityOracle {
    db: DatabaseManager,
    busy_window: Duration,
}

impl HeuristicAvailabilityOracle {
    pub fn new(db: DatabaseManager, busy_window_secs: i64) -> Self {
        Self {
            db,
            busy_window: Duration::seconds(busy_window_secs),
        }
    }

    async fn has_live_call(&self, endpoint: &AgentEndpoint) -> Result<bool> {
        let since = Utc::now() - self.busy_window;
        let live = self.db.list_live_calls_since(since).await?;
        if live.iter().any(|call| call_references(call, endpoint)) {
            return Ok(true);
        }

        let sessions = self.db.list_live_routing_sessions_since(since).await?;
        Ok(sessions
            .iter()
            .filter_map(RoutingSession::current_member)
            .any(|member| member_is(member, endpoint)))
    }
}

fn member_is(member: &RoutedMember, endpoint: &AgentEndpoint) -> bool {
    if member.agent_id == endpoint.agent_id {
        return true;
    }
    let by_phone = match (member.phone_number.as_deref(), endpoint.phone()) {
        (Some(a), Some(b)) => phone::phones_match(a, b),
        _ => false,
    };
    let by_browser = member
        .browser_identity
        .as_deref()
        .is_some_and(|identity| endpoint.browser() == Some(identity));
    by_phone || by_browser
}

fn call_references(call: &CallRecord, endpoint: &AgentEndpoint) -> bool {
    [call.counterparty_number.as_str(), call.internal_number.as_str()]
        .into_iter()
        .filter(|number| !number.is_empty())
        .any(|number| {
            let by_phone = endpoint
                .phone()
                .is_some_and(|agent_phone| phone::phones_match(number, agent_phone));
            let by_browser = endpoint
                .browser()
                .is_some_and(|identity| number.trim_start_matches("client:") == identity);
            by_phone || by_browser
        })
}

#[async_trait]
impl AvailabilityOracle for HeuristicAvailabilityOracle {
    async fn is_eligible(&self, endpoint: &AgentEndpoint, check_busy: bool) -> Result<bool> {
        let status = self
            .db
            .current_availability(&endpoint.agent_id)
            .await?
            .unwrap_or(AvailabilityStatus::Online);
        if status != AvailabilityStatus::Online {
            debug!("Agent {} skipped: manual status {}", endpoint.agent_id, status.as_str());
            return Ok(false);
        }

        if check_busy && self.has_live_call(endpoint).await? {
            debug!("Agent {} skipped: live call in progress", endpoint.agent_id);
            return Ok(false);
        }

        Ok(true)
    }
}
