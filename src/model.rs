//! Core data model shared by every component: knowledge items, learnings,
//! actions, plans, parameterized tasks, and verified skills.
//!
//! See spec.md §3 for the authoritative field list and invariants. Types
//! here are plain records — all schema validation happens at the LLM/JSON
//! boundary in [`crate::planner`], not in these constructors.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Floor below which [`KnowledgeItem::trust_score`] never decays further.
pub const MIN_TRUST_SCORE: f64 = 0.5;
/// Multiplier applied to `trust_score` each time a new learning is attached.
pub const TRUST_DECAY_FACTOR: f64 = 0.95;

/// A single documented capability in the knowledge catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub knowledge_id: String,
    pub description: String,
    pub ui_location: String,
    pub action_sequence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,
    #[serde(default)]
    pub prerequisites: BTreeSet<String>,
    pub output_state: String,
    pub doc_citation: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub kb_learnings: Vec<FailureLearning>,
    #[serde(default = "default_trust_score")]
    pub trust_score: f64,
}

fn default_trust_score() -> f64 {
    1.0
}

impl KnowledgeItem {
    /// Text fed to the embedding provider: description plus the joined
    /// action sequence (spec.md §4.2).
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}", self.description, self.action_sequence.join("\n"))
    }

    /// Append a failure learning and decay trust, clamped at
    /// [`MIN_TRUST_SCORE`] (spec.md §3 invariants, §8 property 2).
    pub fn attach_learning(&mut self, learning: FailureLearning) {
        self.kb_learnings.push(learning);
        self.trust_score = decay_trust(self.trust_score);
    }
}

/// Pure function: one failure's effect on trust. Deterministic, no
/// wall-clock input, so tests can assert exact values (spec.md §9).
pub fn decay_trust(prior: f64) -> f64 {
    (prior * TRUST_DECAY_FACTOR).max(MIN_TRUST_SCORE)
}

/// A structured record of one execution failure, attached to exactly one
/// [`KnowledgeItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureLearning {
    pub task: String,
    pub step_num: usize,
    pub original_action: Action,
    pub original_error: String,
    #[serde(default)]
    pub recovery_approach: String,
    pub timestamp: DateTime<Utc>,
}

impl FailureLearning {
    pub fn is_recovery_pending(&self) -> bool {
        self.recovery_approach.is_empty()
    }
}

/// A single unit of a [`Plan`]: a tool call with arguments that may still
/// contain symbolic references or parameter placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool_name: String,
    #[serde(default)]
    pub tool_arguments: BTreeMap<String, serde_json::Value>,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kb_source: Option<String>,
}

impl Action {
    /// All string-typed argument values, for placeholder/symbol scanning.
    pub fn string_arg_values(&self) -> impl Iterator<Item = (&String, &str)> {
        self.tool_arguments
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k, s)))
    }
}

/// An ordered sequence of actions produced by the planner (or copied from a
/// matched [`VerifiedSkill`]), plus overall reasoning and a rough duration
/// estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<Action>,
    pub reasoning: String,
    pub estimated_duration: String,
}

/// An operation plus its concrete parameters, as given by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterizedTask {
    pub operation: String,
    pub parameters: BTreeMap<String, String>,
}

impl ParameterizedTask {
    /// Canonical form used for prompts and persistence:
    /// `"<operation> (Parameters: k1=v1, k2=v2, ...)"` (spec.md §6).
    pub fn canonical(&self) -> String {
        if self.parameters.is_empty() {
            return self.operation.clone();
        }
        let params = self
            .parameters
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} (Parameters: {})", self.operation, params)
    }

    /// Filesystem/identifier-safe slug derived from the operation alone.
    pub fn operation_slug(&self) -> String {
        slugify(&self.operation)
    }
}

/// Lowercase, `_`-separated slug: non-alphanumerics collapse to a single
/// underscore, leading/trailing underscores are trimmed.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_was_sep = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    slug.trim_matches('_').to_string()
}

/// A human-verified, reusable action plan for an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedSkill {
    pub skill_id: String,
    pub task_description: String,
    pub action_plan: Vec<Action>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub metadata: SkillMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub verified_at: DateTime<Utc>,
    pub session_id: String,
    #[serde(default)]
    pub human_feedbacks_count: u32,
    #[serde(default)]
    pub agent_recoveries_count: u32,
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    #[serde(default)]
    pub times_used: u64,
}

fn default_success_rate() -> f64 {
    1.0
}
