//! # Agents
//!
//! Agents are identified by an opaque id handed out by the directory service.
//! The router needs two things about an agent: where to ring them
//! ([`AgentDirectory`]) and whether it should ring them right now
//! ([`AvailabilityOracle`]).
//!
//! Both are traits so the router can be driven by tests with fixed data, and
//! so the best-effort busy heuristic can later be replaced by a real lease
//! without touching the routing state machine.

pub mod availability;
pub mod directory;

pub use availability::{AvailabilityOracle, HeuristicAvailabilityOracle};
pub use directory::{AgentDirectory, SqliteAgentDirectory, StaticAgentDirectory};

use serde::{Deserialize, Serialize};

/// Where an agent can be reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEndpoint {
    pub agent_id: String,
    /// PSTN number in any regional notation
    pub phone_number: Option<String>,
    /// Softphone identity, without the `client:` prefix
    pub browser_identity: Option<String>,
}

impl AgentEndpoint {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            phone_number: None,
            browser_identity: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone_number = Some(phone.into());
        self
    }

    pub fn with_browser(mut self, identity: impl Into<String>) -> Self {
        self.browser_identity = Some(identity.into());
        self
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone_number.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }

    pub fn browser(&self) -> Option<&str> {
        self.browser_identity
            .as_deref()
            .map(|b| b.trim().trim_start_matches("client:"))
            .filter(|b| !b.is_empty())
    }
}
