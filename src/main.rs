//! Entry point: wires every collaborator together and dispatches the CLI
//! surface onto the [`Orchestrator`] state machine (spec.md §6).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use gui_agent::catalog::CatalogStore;
use gui_agent::cli::{Cli, Commands, KbAction, SkillsAction};
use gui_agent::config::{Config, LLM_API_KEY_ENV};
use gui_agent::executor::AdaptiveExecutor;
use gui_agent::llm::http_client::HttpLlmClient;
use gui_agent::llm::LlmClient;
use gui_agent::mcp_transport::HttpToolTransport;
use gui_agent::model::ParameterizedTask;
use gui_agent::observer::{Observer, TerminalObserver};
use gui_agent::orchestrator::{Orchestrator, RunOutcome, RunRequest};
use gui_agent::planner::{Planner, PlannerConfig};
use gui_agent::recovery::RecoverySynthesizer;
use gui_agent::retriever::KnowledgeRetriever;
use gui_agent::skill_library::SkillLibrary;
use gui_agent::tool_client::ToolClient;
use gui_agent::vector_index::{TfIdfEmbeddingProvider, VectorIndex};
use gui_agent::{output, telemetry};

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("error: {err:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

/// Returns the process exit code: 0 success, 1 failure, 2 user abort
/// (spec.md line 215).
async fn run(cli: Cli) -> Result<i32> {
    let config = Config::load(cli.config.as_deref().map(Path::new))
        .context("failed to load configuration")?;

    let api_key = std::env::var(LLM_API_KEY_ENV).with_context(|| {
        format!("environment variable {LLM_API_KEY_ENV} must hold the LLM provider secret")
    })?;

    let catalog = Arc::new(parking_lot::RwLock::new(
        CatalogStore::load(config.paths.catalog_file())
            .context("failed to load knowledge catalog")?,
    ));

    let index = Arc::new(
        VectorIndex::new(Box::new(TfIdfEmbeddingProvider::new()))
            .with_storage(config.paths.vector_store_dir()),
    );
    let retriever = Arc::new(KnowledgeRetriever::new(catalog.clone(), index));
    retriever.reindex_all().await;

    let skill_library = Arc::new(parking_lot::Mutex::new(
        SkillLibrary::load(config.paths.skills_dir()).context("failed to load skill library")?,
    ));

    let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(&config.llm, api_key));

    let transport = Box::new(HttpToolTransport::new(
        config.executor.automation_server_url.clone(),
    ));
    let tool_client = Arc::new(ToolClient::new(
        transport,
        config.executor.tool_call_timeout(),
    ));

    let observer: Arc<dyn Observer> = Arc::new(TerminalObserver::new(config.observer.clone()));

    let executor = Arc::new(AdaptiveExecutor::new(
        tool_client.clone(),
        llm.clone(),
        retriever.clone(),
        catalog.clone(),
        observer.clone(),
        config.executor.clone(),
    ));

    let planner = Arc::new(Planner::new(
        llm.clone(),
        tool_client.clone(),
        retriever.clone(),
        PlannerConfig {
            plans_dir: config.paths.plans_dir(),
            prompt_history_dir: config.paths.prompt_history_dir(),
            related_docs_k: config.retrieval.related_docs_k,
        },
    ));

    let recovery = Arc::new(RecoverySynthesizer::new(
        llm.clone(),
        catalog.clone(),
        retriever.clone(),
    ));

    let orchestrator = Orchestrator::new(
        retriever,
        skill_library.clone(),
        planner,
        tool_client,
        executor,
        observer,
        recovery,
        catalog.clone(),
        config.retrieval.clone(),
        config.llm.planner_timeout(),
        config.paths.cost_reports_dir(),
    );

    match cli.command {
        Commands::Run {
            operation,
            parameters,
            interactive,
            default,
            synthesize_recovery,
        } => {
            let task = if default {
                let default_task = config
                    .default_task
                    .ok_or_else(|| anyhow!("agent run --default requires [default_task] in the config file"))?;
                ParameterizedTask {
                    operation: default_task.operation,
                    parameters: default_task.parameters,
                }
            } else {
                let operation = operation
                    .ok_or_else(|| anyhow!("--operation is required unless --default is set"))?;
                ParameterizedTask {
                    operation,
                    parameters: parse_parameters(&parameters)?,
                }
            };

            run_task(&orchestrator, task, 0, interactive, synthesize_recovery).await
        }
        Commands::Rerun {
            operation,
            parameters,
            interactive,
            rerun_n,
        } => {
            let task = ParameterizedTask {
                operation,
                parameters: parse_parameters(&parameters)?,
            };
            run_task(&orchestrator, task, rerun_n, interactive, false).await
        }
        Commands::Skills { action } => {
            match action {
                SkillsAction::List { operation } => {
                    let skills = skill_library.lock().list(operation.as_deref());
                    if skills.is_empty() {
                        println!("no verified skills match");
                    }
                    for skill in skills {
                        println!(
                            "{}  {}  times_used={}  tags={:?}",
                            skill.skill_id, skill.task_description, skill.metadata.times_used, skill.tags
                        );
                    }
                }
            }
            Ok(0)
        }
        Commands::Kb { action } => {
            match action {
                KbAction::Show { knowledge_id } => {
                    let item = catalog
                        .read()
                        .get(&knowledge_id)
                        .with_context(|| format!("unknown knowledge id '{knowledge_id}'"))?;
                    println!("{}", serde_json::to_string_pretty(&item)?);
                }
            }
            Ok(0)
        }
    }
}

async fn run_task(
    orchestrator: &Orchestrator,
    task: ParameterizedTask,
    rerun_n: u32,
    interactive: bool,
    synthesize_recovery: bool,
) -> Result<i32> {
    output::print_run_start(&task.canonical());
    let outcome = orchestrator
        .run(RunRequest {
            task,
            rerun_n,
            interactive,
            synthesize_recovery,
        })
        .await;
    output::print_outcome(&outcome);
    Ok(match outcome {
        RunOutcome::Success { .. } => 0,
        RunOutcome::Failure { .. } => 1,
    })
}

/// `--parameters` is a JSON object; values are taken as-is if already
/// strings, otherwise re-serialized so every [`ParameterizedTask`] parameter
/// is a plain string (spec.md §3).
fn parse_parameters(raw: &str) -> Result<BTreeMap<String, String>> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("--parameters must be a JSON object")?;
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("--parameters must be a JSON object"))?;

    let mut parameters = BTreeMap::new();
    for (key, value) in object {
        let as_string = match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        };
        parameters.insert(key.clone(), as_string);
    }
    Ok(parameters)
}
