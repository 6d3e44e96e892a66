//! Crate-wide error taxonomy.
//!
//! Each component gets its own `thiserror` enum; `AgentError` composes them
//! so the orchestrator can match on error *kind* (spec.md §7) while callers
//! further up the stack can keep using `anyhow::Result` for propagation.

use thiserror::Error;

/// The central error type for the agent.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error(transparent)]
    PlanSchema(#[from] PlanSchemaError),

    #[error("unresolved parameter '{name}' in step {step_num}")]
    UnresolvedParameter { step_num: usize, name: String },

    #[error("could not resolve symbolic reference '{reference}' in step {step_num}: {reason}")]
    SymbolResolution {
        step_num: usize,
        reference: String,
        reason: String,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("knowledge id '{0}' not found in catalog")]
    UnknownKnowledgeId(String),

    #[error("tool '{0}' is not in the discovered tool list")]
    UnknownTool(String),

    #[error("observer timed out waiting for a human response")]
    ObserverTimeout,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("LLM returned an empty completion")]
    EmptyCompletion,

    #[error("LLM call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("failed to parse LLM response as JSON: {0}")]
    InvalidJson(String),
}

#[derive(Error, Debug)]
pub enum PlanSchemaError {
    #[error("plan referenced unknown tool '{0}'")]
    UnknownTool(String),

    #[error("action kb_source '{0}' does not match any retrieved knowledge item")]
    InventedKbSource(String),

    #[error("malformed action at step {step}: {reason}")]
    MalformedAction { step: usize, reason: String },

    #[error("plan JSON did not match the expected schema: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("tool '{name}' reported failure: {message}")]
    Execution { name: String, message: String },

    #[error("tool '{name}' is unknown to the automation server")]
    NotFound { name: String },

    #[error("tool call to '{name}' timed out after {seconds}s")]
    Timeout { name: String, seconds: u64 },

    #[error("transport error talking to automation server: {0}")]
    Transport(String),
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write catalog at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog file is not valid JSON: {0}")]
    Corrupt(String),

    #[error("unknown knowledge id '{0}'")]
    UnknownId(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
