//! Pattern record domain models produced by the consolidation pipeline
//! (§3.5): raw observations (Samskara), crystallized tendencies (Vasana),
//! mined procedures (Vidhi), and the Pramana epistemic classification used
//! to weight compression.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Epistemological source classification (glossary). Preservation weights
/// are fixed by the spec (§3.5) and strictly ordered (§8.1 P11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pramana {
    Pratyaksha,
    Shabda,
    Anumana,
    Upamana,
    Arthapatti,
    Anupalabdhi,
}

impl Pramana {
    /// Fixed preservation weight (§3.5). Strictly decreasing in the order
    /// listed there, which P11 requires.
    pub const fn preservation_weight(self) -> f64 {
        match self {
            Self::Pratyaksha => 0.95,
            Self::Shabda => 0.80,
            Self::Anumana => 0.65,
            Self::Upamana => 0.50,
            Self::Arthapatti => 0.40,
            Self::Anupalabdhi => 0.25,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pratyaksha => "pratyaksha",
            Self::Shabda => "shabda",
            Self::Anumana => "anumana",
            Self::Upamana => "upamana",
            Self::Arthapatti => "arthapatti",
            Self::Anupalabdhi => "anupalabdhi",
        }
    }
}

/// Behavioral valence a crystallized tendency carries (§3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Valence {
    Positive,
    Negative,
    Neutral,
}

impl Valence {
    /// Derive valence from a samskara's pattern type (§4.4.3).
    pub fn from_pattern_type(pattern_type: &str) -> Self {
        match pattern_type {
            "correction" => Self::Negative,
            "preference" | "convention" => Self::Positive,
            _ => Self::Neutral,
        }
    }
}

/// A raw observed pattern (§3.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Samskara {
    pub id: Uuid,
    pub pattern_type: String,
    pub pattern_content: String,
    pub observation_count: u32,
    pub confidence: f64,
    pub originating_session: Uuid,
    /// `None` means the samskara is not scoped to a single project.
    pub project: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Samskara {
    pub fn qualifies_for_crystallization(&self, min_pattern_frequency: u32) -> bool {
        self.observation_count >= min_pattern_frequency && self.confidence > 0.5
    }
}

/// A crystallized behavioral tendency aggregated from multiple samskaras
/// across sessions (§3.5, §4.4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vasana {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub valence: Valence,
    pub strength: f64,
    pub stability: f64,
    pub source_samskara_ids: Vec<Uuid>,
    pub activation_count: u32,
    pub last_activated_at: DateTime<Utc>,
    pub project: Option<String>,
}

impl Vasana {
    /// Slugify and cap at 80 chars, per §4.4.3.
    pub fn slugify_name(content: &str) -> String {
        let slug: String = content
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let collapsed = slug
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        collapsed.chars().take(80).collect()
    }

    /// Reinforce an existing vasana when a new cluster maps to it (§4.4.3).
    pub fn reinforce(&mut self, extra_source_ids: &[Uuid]) {
        self.strength = (self.strength + 0.1).min(1.0);
        self.activation_count += 1;
        self.last_activated_at = Utc::now();
        for id in extra_source_ids {
            if !self.source_samskara_ids.contains(id) {
                self.source_samskara_ids.push(*id);
            }
        }
    }
}

/// One step of a mined procedure (§3.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VidhiStep {
    pub index: u32,
    pub tool_name: String,
    /// Argument template; constants kept, variable positions replaced with
    /// `${param_N}` placeholders per the anti-unification in §4.4.4.
    pub argument_template: serde_json::Value,
    pub critical: bool,
}

/// Inferred type of a mined procedure parameter (§4.4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Number,
    Boolean,
    String,
    Array,
    Object,
}

impl ParamType {
    pub fn infer(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(_) => Self::Number,
            serde_json::Value::Bool(_) => Self::Boolean,
            serde_json::Value::Array(_) => Self::Array,
            serde_json::Value::Object(_) => Self::Object,
            _ => Self::String,
        }
    }
}

/// A parameter schema entry produced by anti-unification (§4.4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSchemaEntry {
    pub key: String,
    pub param_type: ParamType,
    pub required: bool,
    pub examples: Vec<serde_json::Value>,
}

/// A parameterized procedure mined from repeated session traces (§3.5,
/// §4.4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vidhi {
    pub id: Uuid,
    pub name: String,
    pub steps: Vec<VidhiStep>,
    pub parameter_schema: Vec<ParamSchemaEntry>,
    pub trigger_phrases: Vec<String>,
    pub success_rate: f64,
    pub success_count: u32,
    pub failure_count: u32,
    pub source_session_ids: Vec<Uuid>,
    pub confidence: f64,
}

impl Vidhi {
    /// Derive a stable id for deduplication: the joined tool-name sequence.
    pub fn derive_name(tool_sequence: &[String]) -> String {
        tool_sequence.join("-then-")
    }

    pub fn record_outcome(&mut self, succeeded: bool) {
        if succeeded {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        let total = self.success_count + self.failure_count;
        if total > 0 {
            self.success_rate = f64::from(self.success_count) / f64::from(total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pramana_weights_strictly_decreasing_in_spec_order() {
        let ordered = [
            Pramana::Pratyaksha,
            Pramana::Shabda,
            Pramana::Anumana,
            Pramana::Upamana,
            Pramana::Arthapatti,
            Pramana::Anupalabdhi,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].preservation_weight() > pair[1].preservation_weight());
        }
    }

    #[test]
    fn pramana_weights_match_spec_constants() {
        assert_eq!(Pramana::Pratyaksha.preservation_weight(), 0.95);
        assert_eq!(Pramana::Anupalabdhi.preservation_weight(), 0.25);
    }

    #[test]
    fn valence_derivation_rules() {
        assert_eq!(Valence::from_pattern_type("correction"), Valence::Negative);
        assert_eq!(Valence::from_pattern_type("preference"), Valence::Positive);
        assert_eq!(Valence::from_pattern_type("convention"), Valence::Positive);
        assert_eq!(Valence::from_pattern_type("anything-else"), Valence::Neutral);
    }

    #[test]
    fn vasana_name_slugify_caps_at_80_chars() {
        let long = "a ".repeat(100);
        let slug = Vasana::slugify_name(&long);
        assert!(slug.len() <= 80);
    }

    #[test]
    fn vasana_reinforcement_caps_strength_at_one() {
        let mut v = Vasana {
            id: Uuid::new_v4(),
            name: "test".into(),
            description: String::new(),
            valence: Valence::Neutral,
            strength: 0.95,
            stability: 0.5,
            source_samskara_ids: vec![],
            activation_count: 1,
            last_activated_at: Utc::now(),
            project: None,
        };
        v.reinforce(&[Uuid::new_v4()]);
        assert!(v.strength <= 1.0);
        assert_eq!(v.activation_count, 2);
    }

    #[test]
    fn samskara_qualification_threshold() {
        let s = Samskara {
            id: Uuid::new_v4(),
            pattern_type: "preference".into(),
            pattern_content: "uses 4-space indent".into(),
            observation_count: 3,
            confidence: 0.6,
            originating_session: Uuid::new_v4(),
            project: None,
            created_at: Utc::now(),
        };
        assert!(s.qualifies_for_crystallization(3));
        assert!(!s.qualifies_for_crystallization(4));
    }

    #[test]
    fn vidhi_success_rate_updates_incrementally() {
        let mut v = Vidhi {
            id: Uuid::new_v4(),
            name: "read-then-edit".into(),
            steps: vec![],
            parameter_schema: vec![],
            trigger_phrases: vec![],
            success_rate: 0.0,
            success_count: 0,
            failure_count: 0,
            source_session_ids: vec![],
            confidence: 0.0,
        };
        v.record_outcome(true);
        v.record_outcome(true);
        v.record_outcome(false);
        assert!((v.success_rate - (2.0 / 3.0)).abs() < 1e-9);
    }
}
