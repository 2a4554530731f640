//! Orchestration plan domain model (§3.4).
//!
//! The set of scheduling strategies is fixed by the spec (§9: "Dynamic
//! dispatch -> tagged strategies"), so it is a closed enum rather than a
//! plugin trait.

use serde::{Deserialize, Serialize};

use super::agent::AgentSlot;

/// The six dispatch strategies plus `routed` (§4.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    RoundRobin,
    LeastLoaded,
    Specialized,
    Competitive,
    Swarm,
    Hierarchical,
    Routed,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::LeastLoaded => "least-loaded",
            Self::Specialized => "specialized",
            Self::Competitive => "competitive",
            Self::Swarm => "swarm",
            Self::Hierarchical => "hierarchical",
            Self::Routed => "routed",
        }
    }
}

/// Named policy for how a swarm parent's sub-task results are merged
/// (§9 open question: the merge rule is a named policy parameter, not
/// hard-coded `merged.success`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmMergePolicy {
    /// Parent succeeds if any sibling succeeded.
    AnySuccess,
    /// Parent succeeds only if every sibling succeeded.
    AllSuccess,
}

impl Default for SwarmMergePolicy {
    fn default() -> Self {
        Self::AnySuccess
    }
}

/// A predicate/slot pair for the `routed` strategy (§4.1.1). The predicate
/// is evaluated in registration order; first match wins.
#[derive(Clone)]
pub struct RoutingRule {
    pub name: String,
    pub predicate: std::sync::Arc<dyn Fn(&super::task::Task) -> bool + Send + Sync>,
    pub slot_id: String,
}

impl std::fmt::Debug for RoutingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingRule").field("name", &self.name).field("slot_id", &self.slot_id).finish()
    }
}

/// Coordination policy for a plan (§3.4, §4.1.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationPolicy {
    pub tolerate_failures: bool,
    pub max_failures: Option<u32>,
    pub swarm_merge_policy: SwarmMergePolicy,
}

impl Default for CoordinationPolicy {
    fn default() -> Self {
        Self { tolerate_failures: true, max_failures: None, swarm_merge_policy: SwarmMergePolicy::default() }
    }
}

/// Fallback policy for terminally failed tasks (§4.1.5). The custom
/// handler is represented out-of-band (the scheduler holds it directly)
/// since it is a closure over replacement-task construction, not data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackPolicy {
    pub has_custom_handler: bool,
    pub escalate_to_human: bool,
}

/// A named orchestration plan (§3.4).
#[derive(Debug, Clone)]
pub struct OrchestrationPlan {
    pub id: String,
    pub slots: Vec<AgentSlot>,
    pub strategy: Strategy,
    pub routing_rules: Vec<RoutingRule>,
    pub coordination: CoordinationPolicy,
    pub fallback: FallbackPolicy,
}

impl OrchestrationPlan {
    pub fn new(id: impl Into<String>, slots: Vec<AgentSlot>, strategy: Strategy) -> Self {
        Self {
            id: id.into(),
            slots,
            strategy,
            routing_rules: Vec::new(),
            coordination: CoordinationPolicy::default(),
            fallback: FallbackPolicy::default(),
        }
    }

    pub fn slot(&self, id: &str) -> Option<&AgentSlot> {
        self.slots.iter().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_string_form_matches_spec_table() {
        assert_eq!(Strategy::RoundRobin.as_str(), "round-robin");
        assert_eq!(Strategy::LeastLoaded.as_str(), "least-loaded");
        assert_eq!(Strategy::Hierarchical.as_str(), "hierarchical");
    }

    #[test]
    fn default_coordination_tolerates_failures_with_no_cap() {
        let policy = CoordinationPolicy::default();
        assert!(policy.tolerate_failures);
        assert!(policy.max_failures.is_none());
    }
}
