//! Console rendering for run outcomes, grounded on the teacher's
//! `output.rs` mode-flag pattern, retargeted at this agent's own summaries
//! instead of chat/token accounting.

use colored::Colorize;

use crate::orchestrator::{CostReport, RunOutcome};

/// Print a one-line header before a run starts.
pub fn print_run_start(task: &str) {
    println!("{} {}", "Running:".bold(), task);
}

/// Print the final outcome, in the teacher's compact style: a colored
/// status line plus a cost summary.
pub fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Success { cost_report } => {
            println!("{} {}", "✓".green().bold(), "task verified".green());
            print_cost_report(cost_report);
        }
        RunOutcome::Failure {
            reason,
            learning_attached,
        } => {
            println!("{} {}", "✗".red().bold(), reason.red());
            if *learning_attached {
                println!(
                    "{}",
                    "a failure learning was attached to the knowledge base".yellow()
                );
            }
        }
    }
}

fn print_cost_report(report: &CostReport) {
    let elapsed = report.finished_at - report.started_at;
    println!(
        "{} {} llm_calls={} tool_calls={} elapsed={}s run_id={}",
        "summary:".dimmed(),
        report.task,
        report.llm_calls,
        report.tool_calls,
        elapsed.num_seconds(),
        report.run_id,
    );
}
