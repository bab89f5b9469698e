//! Tribe join policy and voluntary membership changes.
//!
//! Policies are consulted when an agent asks to join a tribe. Conquest
//! (see [`crate::conquest`]) moves members without consulting them.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::{Agent, JoustStore, StoreError, Tribe};

/// Eligibility rules a tribe applies to agents asking to join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinPolicy {
    /// Minimum agent infamy to be admitted.
    pub min_infamy: i64,
    /// Every one of these tags must be present.
    pub required_tags: Vec<String>,
    /// Tags that raise an applicant's fit score but are not required.
    pub preferred_tags: Vec<String>,
    /// Closed tribes admit nobody voluntarily.
    pub open_join: bool,
}

impl Default for JoinPolicy {
    fn default() -> Self {
        Self {
            min_infamy: i64::MIN,
            required_tags: Vec::new(),
            preferred_tags: Vec::new(),
            open_join: true,
        }
    }
}

/// Result of evaluating a [`JoinPolicy`] against an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Admitted, with the number of preferred tags the agent carries.
    Admitted { fit: usize },
    Rejected(String),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

impl JoinPolicy {
    pub fn evaluate(&self, agent: &Agent) -> Admission {
        if !self.open_join {
            return Admission::Rejected("tribe is closed to new members".to_string());
        }
        if agent.infamy < self.min_infamy {
            return Admission::Rejected(format!(
                "infamy {} below minimum {}",
                agent.infamy, self.min_infamy
            ));
        }
        let missing: Vec<&str> = self
            .required_tags
            .iter()
            .filter(|tag| !agent.tags.contains(*tag))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Admission::Rejected(format!("missing required tags: {}", missing.join(", ")));
        }
        let fit = self
            .preferred_tags
            .iter()
            .filter(|tag| agent.tags.contains(*tag))
            .count();
        Admission::Admitted { fit }
    }
}

/// Error type for voluntary membership changes
#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Tribe not found: {0}")]
    TribeNotFound(String),

    #[error("Agent {agent_id} rejected by tribe {tribe_id}: {reason}")]
    Rejected {
        agent_id: String,
        tribe_id: String,
        reason: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Voluntary membership operations over a store.
pub struct Roster<'a> {
    store: &'a dyn JoustStore,
}

impl<'a> Roster<'a> {
    pub fn new(store: &'a dyn JoustStore) -> Self {
        Self { store }
    }

    /// Form a tribe around its leader, who becomes the first member.
    pub fn found(&self, tribe: &Tribe) -> Result<(), RosterError> {
        if self.store.get_agent(&tribe.leader_id)?.is_none() {
            return Err(RosterError::AgentNotFound(tribe.leader_id.clone()));
        }
        self.store.put_tribe(tribe)?;
        self.store.add_member(&tribe.id, &tribe.leader_id)?;
        info!(tribe_id = %tribe.id, leader_id = %tribe.leader_id, "Tribe founded");
        Ok(())
    }

    /// Join a tribe after its policy admits the agent.
    pub fn join(&self, tribe_id: &str, agent_id: &str) -> Result<Admission, RosterError> {
        let tribe = self
            .store
            .get_tribe(tribe_id)?
            .ok_or_else(|| RosterError::TribeNotFound(tribe_id.to_string()))?;
        let agent = self
            .store
            .get_agent(agent_id)?
            .ok_or_else(|| RosterError::AgentNotFound(agent_id.to_string()))?;

        let admission = tribe.policy.evaluate(&agent);
        if let Admission::Rejected(reason) = &admission {
            return Err(RosterError::Rejected {
                agent_id: agent_id.to_string(),
                tribe_id: tribe_id.to_string(),
                reason: reason.clone(),
            });
        }

        self.store.add_member(tribe_id, agent_id)?;
        info!(tribe_id, agent_id, "Agent joined tribe");
        Ok(admission)
    }

    /// Leave the current tribe. Leaders cannot leave their own tribe.
    pub fn leave(&self, tribe_id: &str, agent_id: &str) -> Result<(), RosterError> {
        let tribe = self
            .store
            .get_tribe(tribe_id)?
            .ok_or_else(|| RosterError::TribeNotFound(tribe_id.to_string()))?;
        if tribe.leader_id == agent_id {
            return Err(RosterError::Rejected {
                agent_id: agent_id.to_string(),
                tribe_id: tribe_id.to_string(),
                reason: "leader cannot leave".to_string(),
            });
        }
        self.store.remove_member(tribe_id, agent_id)?;
        Ok(())
    }
}
