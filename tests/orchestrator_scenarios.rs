//! End-to-end orchestrator scenarios (spec.md §8 "seeds" S1, S2, S3, S5, S6).
//! Every collaborator is a deterministic in-memory fake: no network, no
//! terminal. Mirrors the teacher's `tests/integration` layout, adapted to
//! assert this crate's own state-machine behavior instead of chat/tool-call
//! transcripts.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use gui_agent::catalog::CatalogStore;
use gui_agent::config::{ExecutorConfig, RetrievalConfig};
use gui_agent::executor::AdaptiveExecutor;
use gui_agent::llm::mock::MockLlmClient;
use gui_agent::llm::LlmClient;
use gui_agent::model::{KnowledgeItem, ParameterizedTask};
use gui_agent::observer::{
    ApprovalRequest, ApprovalResponse, Observer, VerificationOutcome, VerificationRequest,
    VerificationResponse,
};
use gui_agent::orchestrator::{Orchestrator, RunOutcome, RunRequest};
use gui_agent::planner::{Planner, PlannerConfig};
use gui_agent::recovery::RecoverySynthesizer;
use gui_agent::retriever::KnowledgeRetriever;
use gui_agent::skill_library::SkillLibrary;
use gui_agent::tool_client::{ToolCallResult, ToolClient, ToolDescriptor, ToolTransport};
use gui_agent::vector_index::{TfIdfEmbeddingProvider, VectorIndex};

/// Scripted automation server: returns a canned result for each tool name in
/// order, and always reports the two tools this test suite's plans use.
struct ScriptedTransport {
    responses: std::sync::Mutex<BTreeMap<String, Vec<ToolCallResult>>>,
}

impl ScriptedTransport {
    fn new(responses: BTreeMap<String, Vec<ToolCallResult>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
        }
    }
}

#[async_trait]
impl ToolTransport for ScriptedTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, gui_agent::errors::ToolError> {
        Ok(vec![
            ToolDescriptor {
                name: "Click-Tool".into(),
                schema: json!({}),
            },
            ToolDescriptor {
                name: "Shortcut-Tool".into(),
                schema: json!({}),
            },
            ToolDescriptor {
                name: "State-Tool".into(),
                schema: json!({}),
            },
        ])
    }

    async fn call(
        &self,
        tool_name: &str,
        _arguments: Value,
    ) -> Result<ToolCallResult, gui_agent::errors::ToolError> {
        let mut responses = self.responses.lock().unwrap();
        let queue = responses.entry(tool_name.to_string()).or_default();
        if queue.is_empty() {
            return Ok(ToolCallResult {
                success: true,
                content: "ok".into(),
                error: None,
            });
        }
        Ok(queue.remove(0))
    }
}

/// Deterministic observer used only by these integration tests: returns
/// queued responses in order, defaulting to approve/success once exhausted.
struct ScriptedObserver {
    approvals: std::sync::Mutex<Vec<ApprovalResponse>>,
    verifications: std::sync::Mutex<Vec<VerificationResponse>>,
    feedback_flag: std::sync::atomic::AtomicBool,
}

impl ScriptedObserver {
    fn new(approvals: Vec<ApprovalResponse>, verifications: Vec<VerificationResponse>) -> Self {
        Self {
            approvals: std::sync::Mutex::new(approvals),
            verifications: std::sync::Mutex::new(verifications),
            feedback_flag: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn request_feedback(&self) {
        self.feedback_flag.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl Observer for ScriptedObserver {
    async fn request_approval(&self, _request: ApprovalRequest) -> ApprovalResponse {
        let mut queue = self.approvals.lock().unwrap();
        if queue.is_empty() {
            ApprovalResponse::Approve
        } else {
            queue.remove(0)
        }
    }

    async fn request_verification(&self, _request: VerificationRequest) -> VerificationResponse {
        let mut queue = self.verifications.lock().unwrap();
        if queue.is_empty() {
            VerificationResponse {
                outcome: VerificationOutcome::Success,
                reason: None,
                save_as_skill: false,
                tags: Vec::new(),
            }
        } else {
            queue.remove(0)
        }
    }

    fn feedback_requested(&self) -> bool {
        self.feedback_flag.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn clear_feedback_request(&self) {
        self.feedback_flag
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }
}

fn open_files_item() -> KnowledgeItem {
    KnowledgeItem {
        knowledge_id: "open_files".into(),
        description: "Open the file-selection dialog".into(),
        ui_location: "File menu".into(),
        action_sequence: vec!["Click File".into(), "Click Open".into()],
        shortcut: None,
        prerequisites: Default::default(),
        output_state: "dialog open".into(),
        doc_citation: "doc#1".into(),
        parameters: BTreeMap::new(),
        kb_learnings: Vec::new(),
        trust_score: 1.0,
    }
}

fn keyboard_shortcuts_item() -> KnowledgeItem {
    KnowledgeItem {
        knowledge_id: "keyboard_shortcuts".into(),
        description: "Keyboard shortcuts for common file operations".into(),
        ui_location: "n/a".into(),
        action_sequence: vec!["Press Ctrl+O".into()],
        shortcut: Some("Ctrl+O".into()),
        prerequisites: Default::default(),
        output_state: "dialog open".into(),
        doc_citation: "doc#2".into(),
        parameters: BTreeMap::new(),
        kb_learnings: Vec::new(),
        trust_score: 1.0,
    }
}

fn task() -> ParameterizedTask {
    ParameterizedTask {
        operation: "Concatenate all .MF4 files and save with specified name".into(),
        parameters: BTreeMap::from([
            ("input_folder".to_string(), "C:\\a".to_string()),
            ("output_folder".to_string(), "C:\\b".to_string()),
            ("output_filename".to_string(), "x.mf4".to_string()),
        ]),
    }
}

struct Harness {
    orchestrator: Orchestrator,
    catalog: Arc<parking_lot::RwLock<CatalogStore>>,
    skill_library: Arc<parking_lot::Mutex<SkillLibrary>>,
    observer: Arc<ScriptedObserver>,
    _dir: tempfile::TempDir,
}

async fn build_harness(
    transport: ScriptedTransport,
    planner_responses: Vec<String>,
    resolver_responses: Vec<String>,
    approvals: Vec<ApprovalResponse>,
    verifications: Vec<VerificationResponse>,
    seed: Vec<KnowledgeItem>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(parking_lot::RwLock::new(
        CatalogStore::load(dir.path().join("catalog.json")).unwrap(),
    ));
    for item in seed {
        catalog.write().update(item).unwrap();
    }

    let index = Arc::new(VectorIndex::new(Box::new(TfIdfEmbeddingProvider::new())));
    let retriever = Arc::new(KnowledgeRetriever::new(catalog.clone(), index));
    retriever.reindex_all().await;

    let skill_library = Arc::new(parking_lot::Mutex::new(
        SkillLibrary::load(dir.path().join("skills")).unwrap(),
    ));

    let planner_llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::with_responses(planner_responses));
    let resolver_llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::with_responses(resolver_responses));

    let tool_client = Arc::new(ToolClient::new(Box::new(transport), Duration::from_secs(5)));
    let observer = Arc::new(ScriptedObserver::new(approvals, verifications));
    let observer_trait: Arc<dyn Observer> = observer.clone();

    let executor = Arc::new(AdaptiveExecutor::new(
        tool_client.clone(),
        resolver_llm.clone(),
        retriever.clone(),
        catalog.clone(),
        observer_trait.clone(),
        ExecutorConfig {
            resolver_confidence_floor: 0.5,
            ..default_executor_config()
        },
    ));

    let planner = Arc::new(Planner::new(
        planner_llm.clone(),
        tool_client.clone(),
        retriever.clone(),
        PlannerConfig {
            plans_dir: dir.path().join("plans"),
            prompt_history_dir: dir.path().join("prompts"),
            related_docs_k: 3,
        },
    ));

    let recovery = Arc::new(RecoverySynthesizer::new(
        resolver_llm,
        catalog.clone(),
        retriever.clone(),
    ));

    let orchestrator = Orchestrator::new(
        retriever,
        skill_library.clone(),
        planner,
        tool_client,
        executor,
        observer_trait,
        recovery,
        catalog.clone(),
        RetrievalConfig {
            top_k: 5,
            related_docs_k: 3,
            skill_similarity_floor: 0.70,
            skill_auto_use_floor: 0.75,
        },
        Duration::from_secs(10),
        dir.path().join("cost_reports"),
    );

    Harness {
        orchestrator,
        catalog,
        skill_library,
        observer,
        _dir: dir,
    }
}

fn default_executor_config() -> ExecutorConfig {
    ExecutorConfig {
        tool_call_timeout_secs: 5,
        resolver_confidence_floor: 0.5,
        transport_retry_threshold: 3,
        automation_server_url: "http://unused.invalid".into(),
    }
}

fn plan_response(actions: Value, reasoning: &str) -> String {
    serde_json::to_string(&json!({
        "plan": actions,
        "reasoning": reasoning,
        "estimated_duration": "1m",
    }))
    .unwrap()
}

/// S1 — first-run failure: the tool server rejects the click, a learning is
/// attached to `open_files`, trust decays to 0.95.
#[tokio::test]
async fn s1_first_run_attaches_learning_and_decays_trust() {
    let plan = plan_response(
        json!([{
            "tool_name": "Click-Tool",
            "tool_arguments": {"button": "Add Files"},
            "reasoning": "open the file picker",
            "kb_source": "open_files",
        }]),
        "click add files",
    );

    let mut responses = BTreeMap::new();
    responses.insert(
        "Click-Tool".to_string(),
        vec![ToolCallResult {
            success: false,
            content: String::new(),
            error: Some("Button 'Add Files' not found".into()),
        }],
    );
    let transport = ScriptedTransport::new(responses);

    let harness = build_harness(transport, vec![plan], vec![], vec![], vec![], vec![open_files_item()]).await;

    let outcome = harness
        .orchestrator
        .run(RunRequest {
            task: task(),
            rerun_n: 0,
            interactive: true,
            synthesize_recovery: false,
        })
        .await;

    assert!(matches!(outcome, RunOutcome::Failure { .. }));

    let item = harness.catalog.read().get("open_files").unwrap();
    assert_eq!(item.trust_score, 0.95);
    assert_eq!(item.kb_learnings.len(), 1);
    assert_eq!(item.kb_learnings[0].original_error, "Button 'Add Files' not found");
    assert!(item.kb_learnings[0].recovery_approach.is_empty());
}

/// S2 — successful rerun: the plan switches to `Shortcut-Tool`, every step
/// succeeds, the human verifies and opts to save a skill.
#[tokio::test]
async fn s2_successful_rerun_saves_verified_skill() {
    let plan = plan_response(
        json!([{
            "tool_name": "Shortcut-Tool",
            "tool_arguments": {"keys": "Ctrl+O"},
            "reasoning": "use the documented shortcut",
            "kb_source": "keyboard_shortcuts",
        }]),
        "use shortcut",
    );

    let transport = ScriptedTransport::new(BTreeMap::new());
    let verifications = vec![VerificationResponse {
        outcome: VerificationOutcome::Success,
        reason: None,
        save_as_skill: true,
        tags: vec!["mf4".into(), "concatenate".into()],
    }];

    let harness = build_harness(
        transport,
        vec![plan],
        vec![],
        vec![],
        verifications,
        vec![open_files_item(), keyboard_shortcuts_item()],
    )
    .await;

    let outcome = harness
        .orchestrator
        .run(RunRequest {
            task: task(),
            rerun_n: 1,
            interactive: true,
            synthesize_recovery: false,
        })
        .await;

    assert!(matches!(outcome, RunOutcome::Success { .. }));

    let matches = harness
        .skill_library
        .lock()
        .find_similar(&task().operation);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].0.tags, vec!["mf4", "concatenate"]);
}

/// S3 — skill reuse: a verified skill already matches the operation above
/// the auto-use floor, so the planner is skipped and `times_used` increments.
#[tokio::test]
async fn s3_matched_skill_skips_planner_and_increments_usage() {
    let transport = ScriptedTransport::new(BTreeMap::new());
    let harness = build_harness(transport, vec![], vec![], vec![], vec![], vec![]).await;

    {
        let mut lib = harness.skill_library.lock();
        let skill_id = lib.next_skill_id("20260101T000000Z");
        lib.add(gui_agent::model::VerifiedSkill {
            skill_id,
            task_description: task().operation.clone(),
            action_plan: vec![gui_agent::model::Action {
                tool_name: "Shortcut-Tool".into(),
                tool_arguments: BTreeMap::from([(
                    "keys".to_string(),
                    json!("Ctrl+O"),
                )]),
                reasoning: "use the documented shortcut".into(),
                kb_source: Some("keyboard_shortcuts".into()),
            }],
            tags: vec!["mf4".into()],
            metadata: gui_agent::model::SkillMetadata {
                verified_at: chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                    .unwrap()
                    .with_timezone(&chrono::Utc),
                session_id: "s1".into(),
                human_feedbacks_count: 0,
                agent_recoveries_count: 0,
                success_rate: 1.0,
                times_used: 0,
            },
        })
        .unwrap();
    }

    let new_task = ParameterizedTask {
        operation: task().operation,
        parameters: BTreeMap::from([
            ("input_folder".to_string(), "C:\\d".to_string()),
            ("output_folder".to_string(), "C:\\e".to_string()),
            ("output_filename".to_string(), "y.mf4".to_string()),
        ]),
    };

    let outcome = harness
        .orchestrator
        .run(RunRequest {
            task: new_task,
            rerun_n: 0,
            interactive: true,
            synthesize_recovery: false,
        })
        .await;

    assert!(matches!(outcome, RunOutcome::Success { .. }));
    let matches = harness.skill_library.lock().find_similar(&task().operation);
    assert_eq!(matches[0].0.metadata.times_used, 1);
}

/// S5 — low-confidence resolution: the resolver returns confidence 0.42 for
/// a `last_state:*` reference; the human corrects it instead of approving.
#[tokio::test]
async fn s5_low_confidence_resolution_uses_human_correction() {
    let plan = plan_response(
        json!([{
            "tool_name": "Click-Tool",
            "tool_arguments": {"target": "last_state:button:Add Files"},
            "reasoning": "click the resolved button",
            "kb_source": "open_files",
        }]),
        "click resolved target",
    );

    let resolver_response = serde_json::to_string(&json!({
        "target": "(120, 240)",
        "confidence": 0.42,
    }))
    .unwrap();

    let mut responses = BTreeMap::new();
    responses.insert(
        "State-Tool".to_string(),
        vec![ToolCallResult {
            success: true,
            content: "window state dump".into(),
            error: None,
        }],
    );
    responses.insert(
        "Click-Tool".to_string(),
        vec![ToolCallResult {
            success: true,
            content: "clicked".into(),
            error: None,
        }],
    );
    let transport = ScriptedTransport::new(responses);

    let corrected = ApprovalResponse::Correct(gui_agent::model::Action {
        tool_name: "Click-Tool".into(),
        tool_arguments: BTreeMap::from([("target".to_string(), json!("(300, 80)"))]),
        reasoning: "human-corrected coordinate".into(),
        kb_source: Some("open_files".into()),
    });

    let harness = build_harness(
        transport,
        vec![plan],
        vec![resolver_response],
        vec![corrected],
        vec![],
        vec![open_files_item()],
    )
    .await;

    let outcome = harness
        .orchestrator
        .run(RunRequest {
            task: task(),
            rerun_n: 0,
            interactive: true,
            synthesize_recovery: false,
        })
        .await;

    assert!(matches!(outcome, RunOutcome::Success { .. }));
}

/// S4 — recovery synthesis: a catalog item already carries a learning with
/// no `recovery_approach`; a successful run with `synthesize_recovery: true`
/// has the orchestrator's `finalize` invoke the synthesizer, which fills it
/// in from the resolver LLM's (shared) response queue.
#[tokio::test]
async fn s4_recovery_synthesis_fills_pending_learning() {
    let plan = plan_response(
        json!([{
            "tool_name": "Shortcut-Tool",
            "tool_arguments": {"keys": "Ctrl+O"},
            "reasoning": "use the documented shortcut",
            "kb_source": "keyboard_shortcuts",
        }]),
        "use shortcut",
    );

    let recovery_response = serde_json::to_string(&json!({
        "recovery_approach": "Use the keyboard shortcut Ctrl+O instead of clicking.",
    }))
    .unwrap();

    let transport = ScriptedTransport::new(BTreeMap::new());

    let mut item_with_pending_learning = open_files_item();
    item_with_pending_learning.trust_score = 0.95;
    item_with_pending_learning.kb_learnings.push(gui_agent::model::FailureLearning {
        task: task().operation.clone(),
        step_num: 0,
        original_action: gui_agent::model::Action {
            tool_name: "Click-Tool".into(),
            tool_arguments: BTreeMap::new(),
            reasoning: "click open".into(),
            kb_source: Some("open_files".into()),
        },
        original_error: "Button 'Add Files' not found".into(),
        recovery_approach: String::new(),
        timestamp: chrono::Utc::now(),
    });

    let harness = build_harness(
        transport,
        vec![plan],
        vec![recovery_response],
        vec![],
        vec![],
        vec![item_with_pending_learning, keyboard_shortcuts_item()],
    )
    .await;

    let outcome = harness
        .orchestrator
        .run(RunRequest {
            task: task(),
            rerun_n: 0,
            interactive: true,
            synthesize_recovery: true,
        })
        .await;

    assert!(matches!(outcome, RunOutcome::Success { .. }));

    let item = harness.catalog.read().get("open_files").unwrap();
    assert_eq!(
        item.kb_learnings[0].recovery_approach,
        "Use the keyboard shortcut Ctrl+O instead of clicking."
    );
}

/// S6 — hotkey interrupt mid-run: a feedback request raised before step 2
/// routes that step through a human approval checkpoint instead of running
/// unattended, and the flag is cleared once consumed.
#[tokio::test]
async fn s6_hotkey_interrupt_routes_next_step_through_approval() {
    let plan = plan_response(
        json!([
            {
                "tool_name": "Shortcut-Tool",
                "tool_arguments": {"keys": "Ctrl+O"},
                "reasoning": "open via shortcut",
                "kb_source": "keyboard_shortcuts",
            },
            {
                "tool_name": "Click-Tool",
                "tool_arguments": {"button": "Save"},
                "reasoning": "save the result",
                "kb_source": null,
            },
        ]),
        "two-step plan",
    );

    let transport = ScriptedTransport::new(BTreeMap::new());
    let harness = build_harness(
        transport,
        vec![plan],
        vec![],
        vec![ApprovalResponse::Approve],
        vec![],
        vec![keyboard_shortcuts_item()],
    )
    .await;

    harness.observer.request_feedback();

    let outcome = harness
        .orchestrator
        .run(RunRequest {
            task: task(),
            rerun_n: 0,
            interactive: false,
            synthesize_recovery: false,
        })
        .await;

    assert!(matches!(outcome, RunOutcome::Success { .. }));
    assert!(!harness.observer.feedback_requested());
}
