//! Configuration loading.
//!
//! Mirrors the teacher's TOML-plus-defaults `Config` (see `architehc-selfware`
//! `src/config.rs`): every field has a `serde(default)`, so a missing or
//! partial config file is never fatal. The LLM secret is intentionally not a
//! config field — it is read from an environment variable only (spec.md §6).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable holding the LLM provider secret.
pub const LLM_API_KEY_ENV: &str = "AGENT_LLM_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub observer: ObserverConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Task run by `agent run --default` (SPEC_FULL.md §6).
    #[serde(default)]
    pub default_task: Option<DefaultTaskConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultTaskConfig {
    pub operation: String,
    #[serde(default)]
    pub parameters: std::collections::BTreeMap<String, String>,
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            llm: LlmConfig::default(),
            executor: ExecutorConfig::default(),
            observer: ObserverConfig::default(),
            retrieval: RetrievalConfig::default(),
            default_task: None,
        }
    }
}

fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("SELFWARE_AGENT_HOME") {
        return PathBuf::from(home).join("config.toml");
    }
    PathBuf::from("agent.toml")
}

/// Root directory for all persisted state (spec.md §6 "Persisted state
/// layout").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self { root: default_root() }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

impl PathsConfig {
    pub fn catalog_file(&self) -> PathBuf {
        self.root
            .join("knowledge_base/parsed_knowledge/knowledge_catalog.json")
    }

    pub fn vector_store_dir(&self) -> PathBuf {
        self.root.join("knowledge_base/vector_store")
    }

    pub fn plans_dir(&self) -> PathBuf {
        self.root.join("planning/plans")
    }

    pub fn prompt_history_dir(&self) -> PathBuf {
        self.root.join("prompts/planning_history")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.root.join("learning/verified_skills")
    }

    pub fn cost_reports_dir(&self) -> PathBuf {
        self.root.join("cost_reports")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_planner_timeout")]
    pub planner_timeout_secs: u64,
    #[serde(default = "default_resolver_timeout")]
    pub resolver_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            planner_timeout_secs: default_planner_timeout(),
            resolver_timeout_secs: default_resolver_timeout(),
        }
    }
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_planner_timeout() -> u64 {
    600
}
fn default_resolver_timeout() -> u64 {
    30
}

impl LlmConfig {
    pub fn planner_timeout(&self) -> Duration {
        Duration::from_secs(self.planner_timeout_secs)
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_secs(self.resolver_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_tool_timeout")]
    pub tool_call_timeout_secs: u64,
    #[serde(default = "default_resolver_confidence_floor")]
    pub resolver_confidence_floor: f64,
    #[serde(default = "default_transport_retries")]
    pub transport_retry_threshold: u32,
    /// Base URL of the external GUI-automation server (spec.md §1, §4.5).
    #[serde(default = "default_automation_server_url")]
    pub automation_server_url: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            tool_call_timeout_secs: default_tool_timeout(),
            resolver_confidence_floor: default_resolver_confidence_floor(),
            transport_retry_threshold: default_transport_retries(),
            automation_server_url: default_automation_server_url(),
        }
    }
}

fn default_tool_timeout() -> u64 {
    60
}

fn default_automation_server_url() -> String {
    "http://127.0.0.1:8765".to_string()
}
fn default_resolver_confidence_floor() -> f64 {
    0.5
}
fn default_transport_retries() -> u32 {
    3
}

impl ExecutorConfig {
    pub fn tool_call_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_call_timeout_secs)
    }
}

/// Behavior when the human observer does not respond in time (spec.md §7,
/// `ObserverTimeoutError`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverTimeoutPolicy {
    /// Treat a timed-out approval as approved, a timed-out verification as
    /// successful. Safe default for an attended session.
    #[default]
    Approve,
    /// Treat a timed-out approval/verification as failure. Appropriate for
    /// headless runs (spec.md §9 "Open questions").
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,
    #[serde(default = "default_verification_timeout")]
    pub verification_timeout_secs: u64,
    #[serde(default)]
    pub timeout_policy: ObserverTimeoutPolicy,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            approval_timeout_secs: default_approval_timeout(),
            verification_timeout_secs: default_verification_timeout(),
            timeout_policy: ObserverTimeoutPolicy::default(),
        }
    }
}

fn default_approval_timeout() -> u64 {
    60
}
fn default_verification_timeout() -> u64 {
    120
}

impl ObserverConfig {
    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }
    pub fn verification_timeout(&self) -> Duration {
        Duration::from_secs(self.verification_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_related_docs_k")]
    pub related_docs_k: usize,
    #[serde(default = "default_skill_match_floor")]
    pub skill_similarity_floor: f64,
    #[serde(default = "default_skill_auto_use_floor")]
    pub skill_auto_use_floor: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            related_docs_k: default_related_docs_k(),
            skill_similarity_floor: default_skill_match_floor(),
            skill_auto_use_floor: default_skill_auto_use_floor(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_related_docs_k() -> usize {
    3
}
fn default_skill_match_floor() -> f64 {
    0.70
}
fn default_skill_auto_use_floor() -> f64 {
    0.75
}
