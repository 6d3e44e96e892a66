//! Adaptive Executor (spec.md §4.6) — runs a [`Plan`] strictly in order,
//! substituting parameters, resolving symbolic references against live UI
//! state, and attaching a [`FailureLearning`] on the first failure. Never
//! replans; a failure is returned to the orchestrator as-is.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::catalog::CatalogStore;
use crate::config::ExecutorConfig;
use crate::errors::{AgentError, ToolError};
use crate::llm::{ChatMessage, LlmClient};
use crate::model::{Action, FailureLearning, ParameterizedTask, Plan};
use crate::observer::{ApprovalRequest, ApprovalResponse, Observer};
use crate::retriever::KnowledgeRetriever;
use crate::tool_client::{classify_success, ToolClient};

/// `last_state:<kind>:<name>` — the only symbolic reference form the
/// planner may emit (spec.md §4.4 step 2).
static SYMBOLIC_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^last_state:([^:]+):(.+)$").unwrap());

#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub step_num: usize,
    pub tool_name: String,
    pub resolved_arguments: BTreeMap<String, Value>,
    pub success: bool,
    pub output: String,
    /// Map from a `last_state:<kind>:<name>` reference string in the
    /// *original* plan action to the literal value the resolver chose, so a
    /// skill saved from this run can keep that literal without retaining
    /// the symbolic reference (spec.md §8 property 5).
    pub resolved_symbols: BTreeMap<String, String>,
}

pub enum StepOutcome {
    Success(ExecutionResult),
    Failure(ExecutionResult),
}

/// Outcome of [`AdaptiveExecutor::resolve_symbols`]: a resolution failure is
/// data, not an error, so it can flow through [`AdaptiveExecutor::handle_failure`]
/// just like a tool-call failure.
enum SymbolResolution {
    Resolved {
        action: Action,
        resolved_symbols: BTreeMap<String, String>,
    },
    Failed(String),
}

pub struct AdaptiveExecutor {
    tool_client: Arc<ToolClient>,
    resolver_llm: Arc<dyn LlmClient>,
    retriever: Arc<KnowledgeRetriever>,
    catalog: Arc<parking_lot::RwLock<CatalogStore>>,
    observer: Arc<dyn Observer>,
    config: ExecutorConfig,
}

/// Per-step state-cache handle: the latest `State-Tool` response, invalidated
/// whenever a non-`State-Tool` action executes (spec.md §4.6 "State caching").
#[derive(Default)]
pub struct StateCache {
    pub latest_state: Option<String>,
}

impl AdaptiveExecutor {
    pub fn new(
        tool_client: Arc<ToolClient>,
        resolver_llm: Arc<dyn LlmClient>,
        retriever: Arc<KnowledgeRetriever>,
        catalog: Arc<parking_lot::RwLock<CatalogStore>>,
        observer: Arc<dyn Observer>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            tool_client,
            resolver_llm,
            retriever,
            catalog,
            observer,
            config,
        }
    }

    /// Run one step of `plan` against `task`'s parameters, mutating `cache`
    /// in place. On failure, a learning is attached to the catalog before
    /// returning (spec.md §4.6 step 6).
    pub async fn execute_step(
        &self,
        task: &ParameterizedTask,
        plan: &Plan,
        step_num: usize,
        cache: &mut StateCache,
    ) -> Result<StepOutcome, AgentError> {
        let action = &plan.actions[step_num];

        let substituted = self.substitute_parameters(action, task, step_num)?;
        let (resolved, resolved_symbols) = match self
            .resolve_symbols(&substituted, step_num, cache)
            .await?
        {
            SymbolResolution::Resolved { action, resolved_symbols } => (action, resolved_symbols),
            SymbolResolution::Failed(reason) => {
                return self
                    .handle_failure(task, step_num, &substituted, reason)
                    .await
                    .map(StepOutcome::Failure);
            }
        };

        info!(step_num, tool_name = %resolved.tool_name, "executing step");

        let call_result = self
            .tool_client
            .call(&resolved.tool_name, Value::Object(resolved.tool_arguments.clone().into_iter().collect()))
            .await;

        let call_result = match call_result {
            Ok(r) => r,
            Err(e) => {
                return self
                    .handle_failure(task, step_num, &resolved, e.to_string())
                    .await
                    .map(StepOutcome::Failure);
            }
        };

        match classify_success(&call_result) {
            Ok(()) => {
                if resolved.tool_name != "State-Tool" {
                    cache.latest_state = None;
                } else {
                    cache.latest_state = Some(call_result.content.clone());
                }
                Ok(StepOutcome::Success(ExecutionResult {
                    step_num,
                    tool_name: resolved.tool_name.clone(),
                    resolved_arguments: resolved.tool_arguments.clone(),
                    success: true,
                    output: call_result.content,
                    resolved_symbols,
                }))
            }
            Err(reason) => self
                .handle_failure(task, step_num, &resolved, reason)
                .await
                .map(StepOutcome::Failure),
        }
    }

    /// Replace every `{name}` occurrence in string argument values with the
    /// matching task parameter (spec.md §4.6 step 1).
    fn substitute_parameters(
        &self,
        action: &Action,
        task: &ParameterizedTask,
        step_num: usize,
    ) -> Result<Action, AgentError> {
        let mut out = action.clone();
        for (_, value) in out.tool_arguments.iter_mut() {
            if let Value::String(s) = value {
                *s = substitute_one(s, task, step_num)?;
            }
        }
        Ok(out)
    }

    /// Resolve every `last_state:<kind>:<name>` argument against live state,
    /// via a resolver-mode LLM call, with low-confidence human approval
    /// (spec.md §4.6 step 2). A resolution failure is reported as
    /// [`SymbolResolution::Failed`] rather than a bare error so the caller
    /// can attach a [`FailureLearning`] the same way it does for a
    /// [`ToolError`] (spec.md §7: `SymbolResolutionError` is a step failure,
    /// not an infrastructure error).
    async fn resolve_symbols(
        &self,
        action: &Action,
        step_num: usize,
        cache: &mut StateCache,
    ) -> Result<SymbolResolution, AgentError> {
        let needs_state = action
            .tool_arguments
            .values()
            .any(|v| matches!(v, Value::String(s) if SYMBOLIC_REF.is_match(s)));

        if needs_state && cache.latest_state.is_none() {
            match self
                .tool_client
                .call("State-Tool", Value::Object(Default::default()))
                .await
            {
                Ok(state_result) => cache.latest_state = Some(state_result.content),
                Err(e) => {
                    return Ok(SymbolResolution::Failed(
                        AgentError::SymbolResolution {
                            step_num,
                            reference: "last_state:*".to_string(),
                            reason: format!("failed to fetch live state: {e}"),
                        }
                        .to_string(),
                    ))
                }
            }
        }

        let mut resolved = action.clone();
        let mut resolved_symbols = BTreeMap::new();
        for (key, value) in resolved.tool_arguments.clone().into_iter() {
            let Value::String(s) = &value else { continue };
            let Some(caps) = SYMBOLIC_REF.captures(s) else {
                continue;
            };
            let kind = caps[1].to_string();
            let name = caps[2].to_string();
            let state = cache.latest_state.clone().unwrap_or_default();

            let (resolved_value, confidence) = match self.resolve_one(&kind, &name, &state).await {
                Ok(v) => v,
                Err(reason) => {
                    return Ok(SymbolResolution::Failed(
                        AgentError::SymbolResolution {
                            step_num,
                            reference: s.clone(),
                            reason,
                        }
                        .to_string(),
                    ))
                }
            };

            let final_value = if confidence < self.config.resolver_confidence_floor {
                match self
                    .observer
                    .request_approval(ApprovalRequest {
                        action: action.clone(),
                        confidence,
                        step_num,
                        alternatives: vec![resolved_value.clone()],
                    })
                    .await
                {
                    ApprovalResponse::Approve => resolved_value,
                    ApprovalResponse::Correct(corrected) => {
                        resolved.tool_arguments = corrected.tool_arguments;
                        return Ok(SymbolResolution::Resolved {
                            action: resolved,
                            resolved_symbols,
                        });
                    }
                    ApprovalResponse::Skip => {
                        return Ok(SymbolResolution::Failed(
                            AgentError::SymbolResolution {
                                step_num,
                                reference: s.clone(),
                                reason: "human skipped low-confidence resolution".to_string(),
                            }
                            .to_string(),
                        ))
                    }
                }
            } else {
                resolved_value
            };

            resolved_symbols.insert(s.clone(), final_value.clone());
            resolved
                .tool_arguments
                .insert(key, Value::String(final_value));
        }

        Ok(SymbolResolution::Resolved { action: resolved, resolved_symbols })
    }

    /// One resolver-mode LLM call: map `(kind, name)` to a concrete value
    /// given `state`, returning `(value, confidence)`.
    async fn resolve_one(&self, kind: &str, name: &str, state: &str) -> Result<(String, f64), String> {
        let prompt = format!(
            "You are resolving a symbolic UI reference against observed state.\n\
             Kind: {kind}\nName: {name}\nObserved state:\n{state}\n\n\
             Respond with strict JSON: {{\"target\": \"<coordinate, element handle, or literal>\", \
             \"confidence\": <0.0-1.0>}}."
        );
        let messages = vec![
            ChatMessage::system("You resolve symbolic UI references to concrete values.".to_string()),
            ChatMessage::user(prompt),
        ];
        let raw = self
            .resolver_llm
            .complete_json(messages, std::time::Duration::from_secs(30))
            .await
            .map_err(|e| format!("resolver LLM call failed: {e}"))?;

        #[derive(serde::Deserialize)]
        struct Resolution {
            target: String,
            confidence: f64,
        }
        let parsed: Resolution = serde_json::from_str(&raw)
            .map_err(|e| format!("resolver returned malformed JSON: {e}"))?;
        Ok((parsed.target, parsed.confidence))
    }

    /// Build and attach a [`FailureLearning`], decay trust, and sync the
    /// vector index (spec.md §4.6 step 6).
    async fn handle_failure(
        &self,
        task: &ParameterizedTask,
        step_num: usize,
        action: &Action,
        error: String,
    ) -> Result<ExecutionResult, AgentError> {
        warn!(step_num, error = %error, tool_name = %action.tool_name, "step failed");

        if let Some(kb_source) = &action.kb_source {
            let learning = FailureLearning {
                task: task.canonical(),
                step_num,
                original_action: action.clone(),
                original_error: error.clone(),
                recovery_approach: String::new(),
                timestamp: Utc::now(),
            };
            let mut item = self.catalog.read().get(kb_source)?;
            item.attach_learning(learning);
            self.catalog.write().update(item)?;
            self.retriever.update_vector_metadata(kb_source).await?;
        } else {
            warn!(step_num, "failure with no kb_source, no learning attached");
        }

        Ok(ExecutionResult {
            step_num,
            tool_name: action.tool_name.clone(),
            resolved_arguments: action.tool_arguments.clone(),
            success: false,
            output: error,
            resolved_symbols: BTreeMap::new(),
        })
    }
}

fn substitute_one(value: &str, task: &ParameterizedTask, step_num: usize) -> Result<String, AgentError> {
    let mut out = value.to_string();
    let mut search_start = 0;
    while let Some(rel) = out[search_start..].find('{') {
        let start = search_start + rel;
        let Some(rel_end) = out[start..].find('}') else {
            break;
        };
        let end = start + rel_end;
        let name = &out[start + 1..end];
        let Some(replacement) = task.parameters.get(name) else {
            return Err(AgentError::UnresolvedParameter {
                step_num,
                name: name.to_string(),
            });
        };
        out.replace_range(start..=end, replacement);
        search_start = start + replacement.len();
    }
    Ok(out)
}
