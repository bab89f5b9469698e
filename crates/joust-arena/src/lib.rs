//! Arena fixtures: a TOML description of agents, tribes and one contest.
//!
//! ```toml
//! [contest]
//! title = "Breakfast"
//! question = "Pancakes or waffles?"
//! option_a = "Pancakes"
//! option_b = "Waffles"
//! tribes = ["crows", "owls"]
//!
//! [[agents]]
//! id = "ada"
//! name = "Ada"
//! address = "local://ada"
//! tags = ["sly"]
//!
//! [[tribes]]
//! id = "crows"
//! name = "Crows"
//! color = "#1d1d1d"
//! leader = "ada"
//! members = ["ada"]
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;

use joust::config::JoustConfig;
use joust::roster::{JoinPolicy, Roster};
use joust::store::{Agent, Contest, Endpoint, JoustStore, Prompt, Tribe};

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub name: String,
    /// `local://...` for a synthetic agent, otherwise the callback URL.
    pub address: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub infamy: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TribeSpec {
    pub id: String,
    pub name: String,
    pub color: String,
    pub leader: String,
    /// Members besides the leader join through the tribe's policy.
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub infamy: i64,
    #[serde(default)]
    pub policy: JoinPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContestSpec {
    pub id: Option<String>,
    pub title: String,
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub tribes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    /// Engine settings; fields left out fall back to the environment.
    #[serde(default)]
    pub config: JoustConfig,
    pub contest: ContestSpec,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub tribes: Vec<TribeSpec>,
}

/// Counts of what [`Fixture::seed`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub agents: usize,
    pub tribes: usize,
    pub members: usize,
}

impl Fixture {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid arena fixture")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Register agents, found tribes and enrol members.
    pub fn seed(&self, store: &dyn JoustStore) -> Result<SeedSummary> {
        for spec in &self.agents {
            let agent = Agent::new(
                spec.id.as_str(),
                spec.name.as_str(),
                Endpoint::parse(&spec.address),
            )
            .with_secret(spec.secret.as_str())
            .with_tags(spec.tags.iter().cloned())
            .with_infamy(spec.infamy);
            store
                .put_agent(&agent)
                .with_context(|| format!("failed to store agent {}", spec.id))?;
        }

        let roster = Roster::new(store);
        let mut members = 0;
        for spec in &self.tribes {
            let tribe = Tribe::new(
                spec.id.as_str(),
                spec.name.as_str(),
                spec.color.as_str(),
                spec.leader.as_str(),
            )
            .with_infamy(spec.infamy)
            .with_policy(spec.policy.clone());
            roster
                .found(&tribe)
                .with_context(|| format!("failed to found tribe {}", spec.id))?;
            members += 1;

            for member in spec.members.iter().filter(|m| **m != spec.leader) {
                roster
                    .join(&spec.id, member)
                    .with_context(|| format!("{member} could not join {}", spec.id))?;
                members += 1;
            }
        }

        let summary = SeedSummary {
            agents: self.agents.len(),
            tribes: self.tribes.len(),
            members,
        };
        info!(
            agents = summary.agents,
            tribes = summary.tribes,
            members = summary.members,
            "Arena seeded"
        );
        Ok(summary)
    }

    /// The draft contest this fixture describes.
    pub fn contest(&self) -> Result<Contest> {
        let spec = &self.contest;
        if spec.tribes.is_empty() {
            bail!("contest lists no tribes");
        }
        let prompt = Prompt::new(
            spec.question.as_str(),
            spec.option_a.as_str(),
            spec.option_b.as_str(),
        );
        Ok(match &spec.id {
            Some(id) => Contest::with_id(id.as_str(), spec.title.as_str(), prompt, spec.tribes.clone()),
            None => Contest::new(spec.title.as_str(), prompt, spec.tribes.clone()),
        })
    }
}
