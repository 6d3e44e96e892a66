//! CLI surface (spec.md §6, SPEC_FULL.md §6): `clap` derive subcommands,
//! grounded on the teacher's `src/cli.rs` `Parser`/`Subcommand` shape.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agent")]
#[command(about = "Autonomous GUI-automation agent")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path. Defaults to $SELFWARE_AGENT_HOME/config.toml or ./agent.toml.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single operation against the knowledge base and automation server.
    Run {
        /// Operation name, matched against the knowledge catalog.
        #[arg(long)]
        operation: Option<String>,

        /// Task parameters as a JSON object, e.g. '{"folder": "C:\\data"}'.
        #[arg(long, default_value = "{}")]
        parameters: String,

        /// Enable the human observer (approval/verification prompts).
        #[arg(long, default_value_t = true)]
        interactive: bool,

        /// Read the default task from the config file instead of --operation.
        #[arg(long)]
        default: bool,

        /// Ask the Recovery Synthesizer to fill in pending recovery approaches
        /// after a successful verification.
        #[arg(long)]
        synthesize_recovery: bool,
    },

    /// Re-run a previously attempted operation as a fresh plan (no replanning
    /// within a run; a rerun is a brand-new orchestrator invocation).
    Rerun {
        #[arg(long)]
        operation: String,

        #[arg(long, default_value = "{}")]
        parameters: String,

        #[arg(long, default_value_t = true)]
        interactive: bool,

        #[arg(long, default_value_t = 1)]
        rerun_n: u32,
    },

    /// Inspect the verified Skill Library.
    Skills {
        #[command(subcommand)]
        action: SkillsAction,
    },

    /// Inspect the knowledge catalog.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },
}

#[derive(Subcommand)]
pub enum SkillsAction {
    /// List verified skills, optionally filtered by operation.
    List {
        #[arg(long)]
        operation: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum KbAction {
    /// Show one knowledge item by id.
    Show { knowledge_id: String },
}
