//! Orchestrator (spec.md §4.10) — the top-level state machine: retrieve →
//! plan → validate → execute → verify → finalize, with a terminal `error`
//! state that never replans. Every transition is logged (SPEC_FULL.md §4.10
//! ambient addition) so a failed run leaves an audit trail.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::catalog::{atomic_write, CatalogStore};
use crate::config::RetrievalConfig;
use crate::errors::AgentError;
use crate::executor::{AdaptiveExecutor, StateCache, StepOutcome};
use crate::model::{Action, KnowledgeItem, ParameterizedTask, Plan, SkillMetadata, VerifiedSkill};
use crate::observer::{
    ApprovalRequest, ApprovalResponse, Observer, VerificationOutcome, VerificationRequest,
    VerificationResponse,
};
use crate::planner::{validate_plan, Planner};
use crate::retriever::KnowledgeRetriever;
use crate::skill_library::SkillLibrary;
use crate::tool_client::ToolClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Retrieve,
    Plan,
    Validate,
    Execute,
    Verify,
    Finalize,
    Error,
    Success,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

enum PlanSource {
    Planner,
    Skill(String),
}

pub struct RunRequest {
    pub task: ParameterizedTask,
    pub rerun_n: u32,
    pub interactive: bool,
    /// Whether to invoke the Recovery Synthesizer on a successful
    /// verification (spec.md §4.8: "only if the user opts in").
    pub synthesize_recovery: bool,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Success { cost_report: CostReport },
    Failure { reason: String, learning_attached: bool },
}

/// `{run_id, task, llm_calls, tool_calls, started_at, finished_at, outcome}`
/// persisted to `cost_reports/<run_id>.json` (SPEC_FULL.md §3). Bookkeeping
/// only, no pricing logic (out of scope per spec.md §1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostReport {
    pub run_id: String,
    pub task: String,
    pub llm_calls: u32,
    pub tool_calls: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: String,
}

pub struct Orchestrator {
    retriever: Arc<KnowledgeRetriever>,
    skill_library: Arc<parking_lot::Mutex<SkillLibrary>>,
    planner: Arc<Planner>,
    tool_client: Arc<ToolClient>,
    executor: Arc<AdaptiveExecutor>,
    observer: Arc<dyn Observer>,
    recovery: Arc<crate::recovery::RecoverySynthesizer>,
    catalog: Arc<parking_lot::RwLock<CatalogStore>>,
    retrieval: RetrievalConfig,
    planner_timeout: Duration,
    cost_reports_dir: PathBuf,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        retriever: Arc<KnowledgeRetriever>,
        skill_library: Arc<parking_lot::Mutex<SkillLibrary>>,
        planner: Arc<Planner>,
        tool_client: Arc<ToolClient>,
        executor: Arc<AdaptiveExecutor>,
        observer: Arc<dyn Observer>,
        recovery: Arc<crate::recovery::RecoverySynthesizer>,
        catalog: Arc<parking_lot::RwLock<CatalogStore>>,
        retrieval: RetrievalConfig,
        planner_timeout: Duration,
        cost_reports_dir: PathBuf,
    ) -> Self {
        Self {
            retriever,
            skill_library,
            planner,
            tool_client,
            executor,
            observer,
            recovery,
            catalog,
            retrieval,
            planner_timeout,
            cost_reports_dir,
        }
    }

    fn transition(&self, task: &str, from: State, to: State) {
        info!(task, from_state = %from, to_state = %to, "orchestrator state transition");
    }

    pub async fn run(&self, request: RunRequest) -> RunOutcome {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();
        let task_canonical = request.task.canonical();
        let mut llm_calls = 0u32;
        let mut tool_calls = 0u32;

        self.transition(&task_canonical, State::Retrieve, State::Retrieve);
        let knowledge = self
            .retriever
            .retrieve(&request.task.operation, self.retrieval.top_k)
            .await;

        self.transition(&task_canonical, State::Retrieve, State::Plan);
        let (plan, plan_source) = match self.plan(&request, &knowledge).await {
            Ok((plan, source, used_llm)) => {
                if used_llm {
                    llm_calls += 1;
                }
                (plan, source)
            }
            Err(e) => {
                self.transition(&task_canonical, State::Plan, State::Error);
                return self.finish_failure(
                    &run_id, &task_canonical, started_at, llm_calls, tool_calls, e.to_string(), false,
                );
            }
        };

        self.transition(&task_canonical, State::Plan, State::Validate);
        if let Err(e) = self.validate(&plan).await {
            self.transition(&task_canonical, State::Validate, State::Error);
            return self.finish_failure(
                &run_id, &task_canonical, started_at, llm_calls, tool_calls, e.to_string(), false,
            );
        }

        self.transition(&task_canonical, State::Validate, State::Execute);
        let mut plan = plan;
        let mut cache = StateCache::default();
        let mut resolved_symbols_by_step: Vec<std::collections::BTreeMap<String, String>> = Vec::new();

        for step_num in 0..plan.actions.len() {
            if step_num > 0 && self.observer.feedback_requested() {
                self.observer.clear_feedback_request();
                let response = self
                    .observer
                    .request_approval(ApprovalRequest {
                        action: plan.actions[step_num].clone(),
                        confidence: 1.0,
                        step_num,
                        alternatives: vec![],
                    })
                    .await;
                match response {
                    ApprovalResponse::Approve => {}
                    ApprovalResponse::Correct(corrected) => plan.actions[step_num] = corrected,
                    ApprovalResponse::Skip => {
                        self.transition(&task_canonical, State::Execute, State::Error);
                        return self.finish_failure(
                            &run_id,
                            &task_canonical,
                            started_at,
                            llm_calls,
                            tool_calls,
                            "human requested stop at a feedback checkpoint".to_string(),
                            false,
                        );
                    }
                }
            }

            tool_calls += 1;
            match self.executor.execute_step(&request.task, &plan, step_num, &mut cache).await {
                Ok(StepOutcome::Success(result)) => {
                    llm_calls += result.resolved_symbols.len() as u32;
                    resolved_symbols_by_step.push(result.resolved_symbols);
                }
                Ok(StepOutcome::Failure(result)) => {
                    let learning_attached = plan.actions[step_num].kb_source.is_some();
                    self.transition(&task_canonical, State::Execute, State::Error);
                    let reason = if learning_attached {
                        "Learning attached to KB. Please rerun the task to apply learnings.".to_string()
                    } else {
                        result.output
                    };
                    return self.finish_failure(
                        &run_id,
                        &task_canonical,
                        started_at,
                        llm_calls,
                        tool_calls,
                        reason,
                        learning_attached,
                    );
                }
                Err(e) => {
                    self.transition(&task_canonical, State::Execute, State::Error);
                    return self.finish_failure(
                        &run_id, &task_canonical, started_at, llm_calls, tool_calls, e.to_string(), false,
                    );
                }
            }
        }

        self.transition(&task_canonical, State::Execute, State::Verify);
        let verification = if request.interactive {
            self.observer
                .request_verification(VerificationRequest {
                    task: task_canonical.clone(),
                    execution_summary: format!("{} step(s) completed", plan.actions.len()),
                })
                .await
        } else {
            VerificationResponse {
                outcome: VerificationOutcome::Success,
                reason: None,
                save_as_skill: false,
                tags: Vec::new(),
            }
        };

        if verification.outcome != VerificationOutcome::Success {
            self.transition(&task_canonical, State::Verify, State::Error);
            return self.finish_failure(
                &run_id,
                &task_canonical,
                started_at,
                llm_calls,
                tool_calls,
                verification
                    .reason
                    .unwrap_or_else(|| "verification did not succeed".to_string()),
                false,
            );
        }

        self.transition(&task_canonical, State::Verify, State::Finalize);
        if let Err(e) = self
            .finalize(
                &request,
                &plan,
                &plan_source,
                &verification,
                &resolved_symbols_by_step,
            )
            .await
        {
            self.transition(&task_canonical, State::Finalize, State::Error);
            return self.finish_failure(
                &run_id, &task_canonical, started_at, llm_calls, tool_calls, e.to_string(), false,
            );
        }

        self.transition(&task_canonical, State::Finalize, State::Success);
        let cost_report = self.write_cost_report(
            &run_id,
            &task_canonical,
            started_at,
            llm_calls,
            tool_calls,
            "success",
        );
        RunOutcome::Success { cost_report }
    }

    async fn plan(
        &self,
        request: &RunRequest,
        knowledge: &[KnowledgeItem],
    ) -> Result<(Plan, PlanSource, bool), AgentError> {
        let best_skill = {
            let library = self.skill_library.lock();
            library
                .find_similar(&request.task.operation)
                .into_iter()
                .next()
        };

        if let Some((skill, score)) = best_skill {
            if score >= self.retrieval.skill_auto_use_floor {
                info!(skill_id = %skill.skill_id, score, "reusing verified skill, skipping planner");
                // times_used counts every match, not just a successfully completed
                // run (spec.md §3 Lifecycles), so increment here rather than in
                // finalize(), which a mid-run failure would never reach.
                self.skill_library.lock().increment_usage(&skill.skill_id)?;
                return Ok((
                    Plan {
                        actions: skill.action_plan.clone(),
                        reasoning: "matched verified skill".to_string(),
                        estimated_duration: "n/a".to_string(),
                    },
                    PlanSource::Skill(skill.skill_id.clone()),
                    false,
                ));
            }
        }

        let plan = self
            .planner
            .generate_plan(
                &request.task,
                knowledge,
                None,
                None,
                request.rerun_n,
                self.planner_timeout,
            )
            .await?;
        Ok((plan, PlanSource::Planner, true))
    }

    /// Schema-validate against the *whole* catalog's known ids, a broader
    /// check than the planner's own validation against only the retrieved
    /// subset (spec.md §4.10 `validate` state).
    async fn validate(&self, plan: &Plan) -> Result<(), AgentError> {
        let tools = self.tool_client.list_tools().await.map_err(AgentError::Tool)?;
        let tool_names: BTreeSet<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        let catalog_ids = self.catalog.read().load_all();
        let known_ids: BTreeSet<&str> = catalog_ids.iter().map(|i| i.knowledge_id.as_str()).collect();
        validate_plan(&plan.actions, &tool_names, &known_ids)
    }

    async fn finalize(
        &self,
        request: &RunRequest,
        plan: &Plan,
        plan_source: &PlanSource,
        verification: &VerificationResponse,
        resolved_symbols_by_step: &[std::collections::BTreeMap<String, String>],
    ) -> Result<(), AgentError> {
        match plan_source {
            // times_used was already incremented in plan() at match time.
            PlanSource::Skill(_) => {}
            PlanSource::Planner => {
                if verification.save_as_skill {
                    let action_plan = skill_action_plan(plan, resolved_symbols_by_step);
                    let skill_id = self
                        .skill_library
                        .lock()
                        .next_skill_id(&Utc::now().format("%Y%m%dT%H%M%SZ").to_string());
                    let skill = VerifiedSkill {
                        skill_id,
                        task_description: request.task.operation.clone(),
                        action_plan,
                        tags: verification.tags.clone(),
                        metadata: SkillMetadata {
                            verified_at: Utc::now(),
                            session_id: Uuid::new_v4().to_string(),
                            human_feedbacks_count: if request.interactive { 1 } else { 0 },
                            agent_recoveries_count: 0,
                            success_rate: 1.0,
                            times_used: 0,
                        },
                    };
                    self.skill_library.lock().add(skill)?;
                }
            }
        }

        if request.synthesize_recovery {
            let action_plan = skill_action_plan(plan, resolved_symbols_by_step);
            self.recovery.synthesize(&action_plan).await?;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_failure(
        &self,
        run_id: &str,
        task: &str,
        started_at: DateTime<Utc>,
        llm_calls: u32,
        tool_calls: u32,
        reason: String,
        learning_attached: bool,
    ) -> RunOutcome {
        self.write_cost_report(run_id, task, started_at, llm_calls, tool_calls, "failure");
        RunOutcome::Failure {
            reason,
            learning_attached,
        }
    }

    fn write_cost_report(
        &self,
        run_id: &str,
        task: &str,
        started_at: DateTime<Utc>,
        llm_calls: u32,
        tool_calls: u32,
        outcome: &str,
    ) -> CostReport {
        let report = CostReport {
            run_id: run_id.to_string(),
            task: task.to_string(),
            llm_calls,
            tool_calls,
            started_at,
            finished_at: Utc::now(),
            outcome: outcome.to_string(),
        };

        if let Ok(json) = serde_json::to_string_pretty(&report) {
            let _ = std::fs::create_dir_all(&self.cost_reports_dir);
            let path = self.cost_reports_dir.join(format!("{run_id}.json"));
            let _ = atomic_write(&path, json.as_bytes());
        }
        report
    }
}

/// Build a schema-valid, reusable action plan from the actions actually
/// executed: every `last_state:*` reference is replaced by the literal
/// value the resolver chose this run; `{name}` placeholders are left intact
/// so the skill generalizes across parameterizations (spec.md §8 property 5,
/// §4.7 "placeholder preservation").
fn skill_action_plan(
    plan: &Plan,
    resolved_symbols_by_step: &[std::collections::BTreeMap<String, String>],
) -> Vec<Action> {
    plan.actions
        .iter()
        .enumerate()
        .map(|(step_num, action)| {
            let mut action = action.clone();
            if let Some(resolved) = resolved_symbols_by_step.get(step_num) {
                for value in action.tool_arguments.values_mut() {
                    if let serde_json::Value::String(s) = value {
                        if let Some(literal) = resolved.get(s) {
                            *s = literal.clone();
                        }
                    }
                }
            }
            action
        })
        .collect()
}
