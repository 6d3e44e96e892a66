//! Planner (spec.md §4.4) — builds the system/user prompt pair, calls the
//! LLM, and validates the returned plan against the schema and the
//! retrieved knowledge/tool sets.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{AgentError, PlanSchemaError};
use crate::llm::{ChatMessage, LlmClient};
use crate::model::{Action, KnowledgeItem, ParameterizedTask, Plan};
use crate::retriever::KnowledgeRetriever;
use crate::tool_client::{ToolClient, ToolDescriptor};

pub struct PlannerConfig {
    pub plans_dir: PathBuf,
    pub prompt_history_dir: PathBuf,
    pub related_docs_k: usize,
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    tool_client: Arc<ToolClient>,
    retriever: Arc<KnowledgeRetriever>,
    config: PlannerConfig,
}

/// Raw wire shape returned by the LLM; separated from [`Action`]/[`Plan`] so
/// schema validation happens once, at this boundary (spec.md §9
/// "re-architecture": model every external JSON boundary with an explicit
/// schema; validate at the boundary; internal code deals in typed records
/// only).
#[derive(Debug, Deserialize, Serialize)]
struct RawPlan {
    plan: Vec<Action>,
    reasoning: String,
    estimated_duration: String,
}

impl Planner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tool_client: Arc<ToolClient>,
        retriever: Arc<KnowledgeRetriever>,
        config: PlannerConfig,
    ) -> Self {
        Self {
            llm,
            tool_client,
            retriever,
            config,
        }
    }

    /// Build the plan for `task`, rerun number `rerun_n` (0 for the first
    /// attempt), against `available_knowledge` (spec.md §4.4).
    pub async fn generate_plan(
        &self,
        task: &ParameterizedTask,
        available_knowledge: &[KnowledgeItem],
        context: Option<&str>,
        latest_state: Option<&str>,
        rerun_n: u32,
        timeout: std::time::Duration,
    ) -> Result<Plan, AgentError> {
        let tools = self
            .tool_client
            .list_tools()
            .await
            .map_err(AgentError::Tool)?;

        let system_prompt = self.build_system_prompt(&tools);
        let user_prompt = self
            .build_user_prompt(task, available_knowledge, context, latest_state)
            .await;

        let messages = vec![
            ChatMessage::system(system_prompt.clone()),
            ChatMessage::user(user_prompt.clone()),
        ];

        let raw_text = self
            .llm
            .complete_json(messages, timeout)
            .await
            .map_err(AgentError::Llm)?;

        let raw_plan: RawPlan = serde_json::from_str(&raw_text).map_err(|e| {
            warn!(
                error = %e,
                preview = %raw_text.chars().take(2000).collect::<String>(),
                "planner received malformed plan JSON"
            );
            AgentError::PlanSchema(PlanSchemaError::Malformed(e.to_string()))
        })?;

        let known_ids: BTreeSet<&str> = available_knowledge
            .iter()
            .map(|item| item.knowledge_id.as_str())
            .collect();
        let tool_names: BTreeSet<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        validate_plan(&raw_plan.plan, &tool_names, &known_ids)?;

        let plan = Plan {
            actions: raw_plan.plan,
            reasoning: raw_plan.reasoning,
            estimated_duration: raw_plan.estimated_duration,
        };

        self.persist(task, rerun_n, &system_prompt, &user_prompt, &plan)?;
        Ok(plan)
    }

    fn build_system_prompt(&self, tools: &[ToolDescriptor]) -> String {
        let tool_list = tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.schema))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You are a GUI-automation planner. Available tools:\n{tool_list}\n\n\
             Contract:\n\
             - Always call State-Tool before any UI interaction to observe live state.\n\
             - Reference live elements with `last_state:<kind>:<name>`, resolved at execute time.\n\
             - Reference task parameters with `{{name}}`, substituted at execute time.\n\
             - Learning-prioritization rule: if any learning in context contradicts a documented \
               action, the learning wins regardless of how many other items recommend the \
               documented action.\n\n\
             Respond with strict JSON: {{\"plan\": [...], \"reasoning\": \"...\", \
             \"estimated_duration\": \"...\"}}. Each plan entry is \
             {{\"tool_name\", \"tool_arguments\", \"reasoning\", \"kb_source\"}}. \
             Only use tool_name values from the list above. Only set kb_source to a \
             knowledge_id you were actually given — never invent one."
        )
    }

    async fn build_user_prompt(
        &self,
        task: &ParameterizedTask,
        available_knowledge: &[KnowledgeItem],
        context: Option<&str>,
        latest_state: Option<&str>,
    ) -> String {
        let mut sections = Vec::new();
        sections.push(format!("Task: {}", task.canonical()));

        if let Some(ctx) = context {
            sections.push(format!("Context:\n{ctx}"));
        }
        if let Some(state) = latest_state {
            sections.push(format!("Latest observed state:\n{state}"));
        }

        let mut kb_blocks = Vec::new();
        for item in available_knowledge {
            kb_blocks.push(self.format_knowledge_item(item).await);
        }
        sections.push(format!(
            "Knowledge items:\n{}",
            kb_blocks.join("\n---\n")
        ));

        sections.join("\n\n")
    }

    /// Format one knowledge item, including the CAUTION banner and
    /// dynamically enriched related docs for every learning (spec.md §4.4
    /// step 3). Related docs are recomputed on every call and never
    /// persisted onto the learning.
    async fn format_knowledge_item(&self, item: &KnowledgeItem) -> String {
        let mut block = format!(
            "[{}] {}\nUI location: {}\nActions: {}\n",
            item.knowledge_id,
            item.description,
            item.ui_location,
            item.action_sequence.join(" -> "),
        );
        if let Some(shortcut) = &item.shortcut {
            block.push_str(&format!("Shortcut: {shortcut}\n"));
        }

        if !item.kb_learnings.is_empty() {
            block.push_str(&format!(
                "CAUTION: trust_score={:.2} — this item has {} recorded failure(s).\n",
                item.trust_score,
                item.kb_learnings.len()
            ));

            for learning in &item.kb_learnings {
                let recovery = if learning.recovery_approach.is_empty() {
                    "not yet resolved".to_string()
                } else {
                    learning.recovery_approach.clone()
                };
                block.push_str(&format!(
                    "- Original action: {:?}\n  Original error: {}\n  Successful approach: {}\n",
                    learning.original_action, learning.original_error, recovery
                ));

                let related_query = format!(
                    "{} {} alternative solution workaround",
                    learning.original_action.reasoning, learning.original_error
                );
                let related = self.retriever.retrieve(&related_query, 4).await;
                let related = related
                    .into_iter()
                    .filter(|kb| kb.knowledge_id != item.knowledge_id)
                    .take(3)
                    .collect::<Vec<_>>();
                if !related.is_empty() {
                    block.push_str("  Related docs:\n");
                    for r in &related {
                        block.push_str(&format!(
                            "    [{}] {} (shortcut: {}) actions: {}\n",
                            r.knowledge_id,
                            r.description,
                            r.shortcut.clone().unwrap_or_else(|| "none".to_string()),
                            r.action_sequence.join(" -> ")
                        ));
                    }
                }
            }
        }

        block
    }

    fn persist(
        &self,
        task: &ParameterizedTask,
        rerun_n: u32,
        system_prompt: &str,
        user_prompt: &str,
        plan: &Plan,
    ) -> Result<(), AgentError> {
        let slug = task.operation_slug();

        std::fs::create_dir_all(&self.config.plans_dir).map_err(|e| {
            AgentError::Other(anyhow::anyhow!("failed to create plans dir: {e}"))
        })?;
        std::fs::create_dir_all(&self.config.prompt_history_dir).map_err(|e| {
            AgentError::Other(anyhow::anyhow!("failed to create prompt history dir: {e}"))
        })?;

        let plan_path = self
            .config
            .plans_dir
            .join(format!("{slug}_Plan_{rerun_n}.json"));
        let plan_json = serde_json::to_string_pretty(plan)
            .map_err(|e| AgentError::Other(anyhow::anyhow!(e)))?;
        std::fs::write(&plan_path, plan_json)
            .map_err(|e| AgentError::Other(anyhow::anyhow!("failed to write plan file: {e}")))?;

        let ts = Utc::now().format("%Y%m%dT%H%M%SZ");
        let prompt_path = self
            .config
            .prompt_history_dir
            .join(format!("{slug}_Plan_{rerun_n}_{ts}.md"));
        let markdown = format!(
            "# Plan {rerun_n} for `{}`\n\n## System prompt\n\n```\n{system_prompt}\n```\n\n## User prompt\n\n```\n{user_prompt}\n```\n",
            task.canonical()
        );
        std::fs::write(&prompt_path, markdown)
            .map_err(|e| AgentError::Other(anyhow::anyhow!("failed to write prompt audit: {e}")))?;

        Ok(())
    }
}

pub(crate) fn validate_plan(
    actions: &[Action],
    tool_names: &BTreeSet<&str>,
    known_kb_ids: &BTreeSet<&str>,
) -> Result<(), AgentError> {
    for (step, action) in actions.iter().enumerate() {
        if !tool_names.contains(action.tool_name.as_str()) {
            return Err(AgentError::PlanSchema(PlanSchemaError::UnknownTool(
                action.tool_name.clone(),
            )));
        }
        if let Some(kb_source) = &action.kb_source {
            if !known_kb_ids.contains(kb_source.as_str()) {
                return Err(AgentError::PlanSchema(PlanSchemaError::InventedKbSource(
                    kb_source.clone(),
                )));
            }
        }
        if action.tool_name.trim().is_empty() {
            return Err(AgentError::PlanSchema(PlanSchemaError::MalformedAction {
                step,
                reason: "empty tool_name".to_string(),
            }));
        }
    }
    Ok(())
}
