//! Human Observer (spec.md §4.9) — the single-threaded cooperative channel
//! between the executor and an attended human. Isolated behind the
//! [`Observer`] trait (grounded on the teacher's pattern of trait-isolating
//! I/O at the edges, e.g. `architehc-selfware` `src/tui/mod.rs`) so tests
//! inject a [`FakeObserver`] instead of driving a real terminal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{ObserverConfig, ObserverTimeoutPolicy};
use crate::model::Action;

#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub action: Action,
    pub confidence: f64,
    pub step_num: usize,
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalResponse {
    Approve,
    Correct(Action),
    Skip,
}

#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub task: String,
    pub execution_summary: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone)]
pub struct VerificationResponse {
    pub outcome: VerificationOutcome,
    pub reason: Option<String>,
    pub save_as_skill: bool,
    pub tags: Vec<String>,
}

/// The executor's view of the human: two rendezvous calls plus a
/// best-effort "feedback requested" flag set by a hotkey listener (spec.md
/// §4.9, §5: at most one outstanding request, observer never mutates
/// executor state directly).
#[async_trait]
pub trait Observer: Send + Sync {
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalResponse;
    async fn request_verification(&self, request: VerificationRequest) -> VerificationResponse;

    /// True if the hotkey listener has recorded a feedback request since the
    /// last checkpoint. Checked by the executor between steps only.
    fn feedback_requested(&self) -> bool;
    fn clear_feedback_request(&self);
}

/// Real observer: prompts on stdin/stdout, with a background thread polling
/// `crossterm` raw-mode key events for the Escape hotkey. Disabled entirely
/// when `config.enabled` is false, in which case every rendezvous resolves
/// immediately according to `timeout_policy` without touching the terminal.
pub struct TerminalObserver {
    config: ObserverConfig,
    feedback_flag: Arc<AtomicBool>,
    _hotkey_thread: Option<std::thread::JoinHandle<()>>,
}

impl TerminalObserver {
    pub fn new(config: ObserverConfig) -> Self {
        let feedback_flag = Arc::new(AtomicBool::new(false));
        let hotkey_thread = if config.enabled {
            Some(spawn_hotkey_listener(feedback_flag.clone()))
        } else {
            None
        };
        Self {
            config,
            feedback_flag,
            _hotkey_thread: hotkey_thread,
        }
    }

    fn timed_out_approval(&self) -> ApprovalResponse {
        match self.config.timeout_policy {
            ObserverTimeoutPolicy::Approve => ApprovalResponse::Approve,
            ObserverTimeoutPolicy::Fail => ApprovalResponse::Skip,
        }
    }

    fn timed_out_verification(&self) -> VerificationResponse {
        let outcome = match self.config.timeout_policy {
            ObserverTimeoutPolicy::Approve => VerificationOutcome::Success,
            ObserverTimeoutPolicy::Fail => VerificationOutcome::Failed,
        };
        VerificationResponse {
            outcome,
            reason: Some("observer timed out".to_string()),
            save_as_skill: false,
            tags: Vec::new(),
        }
    }
}

fn spawn_hotkey_listener(flag: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || loop {
        match crossterm::event::poll(Duration::from_millis(200)) {
            Ok(true) => {
                if let Ok(crossterm::event::Event::Key(key)) = crossterm::event::read() {
                    if key.code == crossterm::event::KeyCode::Esc {
                        flag.store(true, Ordering::SeqCst);
                    }
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "hotkey listener poll failed, stopping");
                return;
            }
        }
    })
}

#[async_trait]
impl Observer for TerminalObserver {
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalResponse {
        if !self.config.enabled {
            return self.timed_out_approval();
        }
        info!(
            step_num = request.step_num,
            confidence = request.confidence,
            tool_name = %request.action.tool_name,
            "requesting human approval"
        );
        println!(
            "Low-confidence action at step {}: {:?} (confidence {:.2}). Approve? [y/N/skip]",
            request.step_num, request.action, request.confidence
        );

        let timeout = self.config.approval_timeout();
        match tokio::time::timeout(timeout, read_line()).await {
            Ok(Ok(line)) => match line.trim().to_lowercase().as_str() {
                "y" | "yes" => ApprovalResponse::Approve,
                "skip" => ApprovalResponse::Skip,
                _ => self.timed_out_approval(),
            },
            _ => {
                warn!("approval rendezvous timed out");
                self.timed_out_approval()
            }
        }
    }

    async fn request_verification(&self, request: VerificationRequest) -> VerificationResponse {
        if !self.config.enabled {
            return self.timed_out_verification();
        }
        println!(
            "Task complete: {}\n{}\nVerify as success/partial/failed?",
            request.task, request.execution_summary
        );

        let timeout = self.config.verification_timeout();
        let response = match tokio::time::timeout(timeout, read_line()).await {
            Ok(Ok(line)) => match line.trim().to_lowercase().as_str() {
                "success" => VerificationResponse {
                    outcome: VerificationOutcome::Success,
                    reason: None,
                    save_as_skill: true,
                    tags: Vec::new(),
                },
                "partial" => VerificationResponse {
                    outcome: VerificationOutcome::Partial,
                    reason: None,
                    save_as_skill: false,
                    tags: Vec::new(),
                },
                _ => VerificationResponse {
                    outcome: VerificationOutcome::Failed,
                    reason: None,
                    save_as_skill: false,
                    tags: Vec::new(),
                },
            },
            _ => {
                warn!("verification rendezvous timed out");
                self.timed_out_verification()
            }
        };

        restore_focus();
        response
    }

    fn feedback_requested(&self) -> bool {
        self.feedback_flag.load(Ordering::SeqCst)
    }

    fn clear_feedback_request(&self) {
        self.feedback_flag.store(false, Ordering::SeqCst);
    }
}

async fn read_line() -> std::io::Result<String> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line)
    })
    .await
    .unwrap_or_else(|e| Err(std::io::Error::other(e)))
}

/// Restore foreground focus to the target application after a prompt.
/// Best-effort: platform focus APIs are outside this crate's scope, so this
/// is a no-op hook other than the log line (spec.md §4.9: "not a contract").
fn restore_focus() {
    info!("restoring application focus after observer prompt");
}

/// Deterministic observer for tests: returns queued responses in order and
/// tracks the feedback flag without touching a terminal.
#[cfg(test)]
pub struct FakeObserver {
    approvals: std::sync::Mutex<Vec<ApprovalResponse>>,
    verifications: std::sync::Mutex<Vec<VerificationResponse>>,
    feedback_flag: AtomicBool,
}

#[cfg(test)]
impl FakeObserver {
    pub fn new(approvals: Vec<ApprovalResponse>, verifications: Vec<VerificationResponse>) -> Self {
        Self {
            approvals: std::sync::Mutex::new(approvals),
            verifications: std::sync::Mutex::new(verifications),
            feedback_flag: AtomicBool::new(false),
        }
    }

    pub fn request_feedback(&self) {
        self.feedback_flag.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[async_trait]
impl Observer for FakeObserver {
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
        self.feedback_flag.load(Ordering::SeqCst)
    }

    fn clear_feedback_request(&self) {
        self.feedback_flag.store(false, Ordering::SeqCst);
    }
}
