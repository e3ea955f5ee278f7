//! [`AgentRegistry`] — explicit read-only agent table.
//!
//! Constructed once at startup and passed by reference into the dispatcher
//! and loop. There is deliberately no module-level mutable singleton; every
//! consumer receives the registry by injection.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::RuntimeError;

/// Static description of one agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    /// Unique agent name.
    pub name: String,
    /// Domain of expertise.
    pub domain: String,
    /// What the agent does.
    pub description: String,
    /// Whether this agent coordinates the others.
    pub is_coordinator: bool,
}

/// Read-only map of agent profiles, keyed by name.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentProfile>>,
    coordinator: String,
}

impl AgentRegistry {
    /// Build a registry from profiles.
    ///
    /// Exactly one profile must be marked coordinator; the registry refuses
    /// to build without one (or with more than one).
    pub fn new(profiles: Vec<AgentProfile>) -> Result<Self, RuntimeError> {
        let mut coordinator = None;
        for profile in &profiles {
            if profile.is_coordinator {
                if coordinator.is_some() {
                    return Err(RuntimeError::Projection(
                        "more than one coordinator agent registered".into(),
                    ));
                }
                coordinator = Some(profile.name.clone());
            }
        }
        let coordinator = coordinator.ok_or(RuntimeError::NoCoordinator)?;
        let agents = profiles
            .into_iter()
            .map(|p| (p.name.clone(), Arc::new(p)))
            .collect();
        Ok(Self {
            agents,
            coordinator,
        })
    }

    /// Look up an agent by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<AgentProfile>> {
        self.agents.get(name).cloned()
    }

    /// The coordinator profile.
    #[must_use]
    pub fn coordinator(&self) -> Arc<AgentProfile> {
        Arc::clone(&self.agents[&self.coordinator])
    }

    /// Whether an agent exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the registry is empty (never true for a built registry).
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn profile(name: &str, coordinator: bool) -> AgentProfile {
        AgentProfile {
            name: name.into(),
            domain: "general".into(),
            description: format!("the {name} agent"),
            is_coordinator: coordinator,
        }
    }

    #[test]
    fn builds_with_one_coordinator() {
        let registry =
            AgentRegistry::new(vec![profile("coordinator", true), profile("researcher", false)])
                .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.coordinator().name, "coordinator");
        assert!(registry.contains("researcher"));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn rejects_zero_coordinators() {
        let err = AgentRegistry::new(vec![profile("researcher", false)]).unwrap_err();
        assert_matches!(err, RuntimeError::NoCoordinator);
    }

    #[test]
    fn rejects_two_coordinators() {
        let err = AgentRegistry::new(vec![profile("a", true), profile("b", true)]).unwrap_err();
        assert!(err.to_string().contains("more than one coordinator"));
    }
}
