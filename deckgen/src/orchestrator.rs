//! Request orchestration: one supervised generate/execute/repair loop per call.
//!
//! [`Orchestrator::handle_request`] derives a [`Request`] from the user input,
//! gives it a fresh workspace, lets the supervisor drive a [`LoopMachine`]
//! until it finishes, and then appends the exchange to the session transcript.
//! Model and sandbox calls within a request run one after another on the
//! calling thread; separate requests may run concurrently.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::agents::repairer::{RepairInput, Repairer};
use crate::agents::supervisor::Supervisor;
use crate::agents::synthesizer::{CodeSynthesizer, SynthesisInput};
use crate::core::budget::remaining_budget;
use crate::core::machine::{LoopLimits, LoopMachine};
use crate::core::schema::SchemaCheck;
use crate::core::types::{
    Action, DraftSource, ExecutionResult, Outcome, PRESENTATION_MEDIA_TYPE, Request, SessionId,
    Turn,
};
use crate::io::attempt_log::{AttemptMeta, AttemptWriteRequest, write_attempt, write_outcome};
use crate::io::config::DeckgenConfig;
use crate::io::sandbox::Sandbox;
use crate::io::session::SessionStore;
use crate::io::workspace::{RequestWorkspace, WorkspaceLayout};

/// File name offered to callers that download the deck.
pub const DOWNLOAD_NAME: &str = "output.pptx";

/// Settings for an [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub layout: WorkspaceLayout,
    pub limits: LoopLimits,
    /// Wall-clock budget per request, checked between steps.
    pub request_timeout: Duration,
}

impl OrchestratorConfig {
    pub fn from_config(cfg: &DeckgenConfig) -> Self {
        Self {
            layout: WorkspaceLayout::new(&cfg.work_dir, &cfg.sandbox),
            limits: cfg.limits,
            request_timeout: cfg.request_timeout(),
        }
    }
}

/// Handle to a generated deck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub media_type: &'static str,
    pub download_name: &'static str,
}

/// What a caller gets back from one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub outcome: Outcome,
    /// Present exactly when `outcome.completed` is true.
    pub artifact: Option<Artifact>,
    /// Holds the candidate slot, attempt logs and `outcome.json`.
    pub request_dir: PathBuf,
}

pub struct Orchestrator<S, R, X, V> {
    synthesizer: S,
    repairer: R,
    sandbox: X,
    supervisor: V,
    config: OrchestratorConfig,
    outcome_schema: SchemaCheck,
    sessions: SessionStore,
    next_seq: AtomicU64,
}

impl<S, R, X, V> Orchestrator<S, R, X, V>
where
    S: CodeSynthesizer,
    R: Repairer,
    X: Sandbox,
    V: Supervisor,
{
    pub fn new(
        synthesizer: S,
        repairer: R,
        sandbox: X,
        supervisor: V,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        Ok(Self {
            synthesizer,
            repairer,
            sandbox,
            supervisor,
            config,
            outcome_schema: SchemaCheck::outcome()?,
            sessions: SessionStore::new(),
            next_seq: AtomicU64::new(0),
        })
    }

    /// Run one request for `session_id` from free-form user input.
    ///
    /// Every terminal outcome, successful or not, appends the (input, content)
    /// pair to the session. Errors leave the transcript untouched.
    pub fn handle_request(
        &self,
        session_id: impl Into<SessionId>,
        user_input: &str,
    ) -> Result<Reply> {
        let request = Request::from_input(session_id, user_input);
        self.handle(&request, user_input)
    }

    /// Run an already-built request; `user_input` is what gets recorded.
    #[instrument(skip_all, fields(session = %request.session_id, seq))]
    pub fn handle(&self, request: &Request, user_input: &str) -> Result<Reply> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let workspace = self.config.layout.create(&request.session_id, seq)?;
        tracing::Span::current().record("seq", workspace.seq);
        let history = self.sessions.history(&request.session_id);
        info!(
            topic = %request.topic,
            target_count = ?request.target_count,
            history_turns = history.len(),
            "request accepted"
        );

        let outcome = self.drive(request, &history, &workspace)?;
        let value = serde_json::to_value(&outcome).context("serialize outcome")?;
        self.outcome_schema.check(&value)?;
        write_outcome(&workspace, &outcome)?;

        self.sessions
            .append_exchange(&request.session_id, user_input, &outcome.content);

        let artifact = outcome.completed.then(|| Artifact {
            path: workspace.output_path.clone(),
            media_type: PRESENTATION_MEDIA_TYPE,
            download_name: DOWNLOAD_NAME,
        });
        info!(completed = outcome.completed, "request finished");
        Ok(Reply {
            outcome,
            artifact,
            request_dir: workspace.dir,
        })
    }

    /// Ordered transcript of a session; unknown ids yield an empty one.
    pub fn get_history(&self, session_id: &SessionId) -> Vec<Turn> {
        self.sessions.history(session_id)
    }

    fn drive(
        &self,
        request: &Request,
        history: &[Turn],
        workspace: &RequestWorkspace,
    ) -> Result<Outcome> {
        let deadline = Instant::now() + self.config.request_timeout;
        let mut machine = LoopMachine::new(self.config.limits);
        let mut attempt = 0u32;
        let mut candidate_source = DraftSource::Synthesis;

        loop {
            if let Some(outcome) = machine.exhausted() {
                warn!(
                    steps = machine.steps(),
                    executions = machine.executions(),
                    "step limit reached"
                );
                return Ok(machine.finish(outcome));
            }
            if remaining_budget(deadline).is_none() {
                warn!(
                    timeout_secs = self.config.request_timeout.as_secs(),
                    "request timed out"
                );
                let reason = machine
                    .view(request, history)
                    .last_failure()
                    .unwrap_or_else(|| "none".to_string());
                return Ok(machine.finish(Outcome::failed(format!(
                    "Request timed out after {}s without a presentation. Last error: {reason}",
                    self.config.request_timeout.as_secs()
                ))));
            }

            let action = self
                .supervisor
                .decide_next_action(&machine.view(request, history))?;
            debug!(
                step = machine.steps() + 1,
                phase = machine.phase().as_str(),
                action = action.kind(),
                "supervisor decided"
            );
            if let Err(rejection) = machine.admit(&action) {
                warn!(
                    action = rejection.action,
                    reason = %rejection.reason,
                    "action rejected"
                );
                continue;
            }

            match action {
                Action::Synthesize {
                    topic,
                    constraints,
                    slide_count,
                } => {
                    let input = SynthesisInput {
                        topic,
                        constraints,
                        slide_count,
                        output_path: workspace.output_path.clone(),
                    };
                    let draft = self.synthesizer.synthesize(&input)?;
                    candidate_source = DraftSource::Synthesis;
                    machine.record_draft(DraftSource::Synthesis, draft);
                }
                Action::Execute => {
                    let program = machine
                        .pending_candidate()
                        .cloned()
                        .context("execute admitted without a candidate")?;
                    attempt += 1;
                    let started = Instant::now();
                    let mut result = self.sandbox.execute(&program, workspace)?;
                    require_artifact(&mut result, workspace);
                    write_attempt(&AttemptWriteRequest {
                        workspace,
                        meta: &AttemptMeta {
                            attempt,
                            source: candidate_source,
                            succeeded: result.succeeded,
                            exit_code: result.exit_code,
                            timed_out: result.timed_out,
                            duration_ms: started.elapsed().as_millis() as u64,
                        },
                        program: &program,
                        result: &result,
                    })?;
                    info!(
                        attempt,
                        succeeded = result.succeeded,
                        timed_out = result.timed_out,
                        "attempt finished"
                    );
                    machine.record_execution(&result);
                }
                Action::Repair { error_message } => {
                    let input = RepairInput {
                        program: workspace.load_candidate()?,
                        error_message,
                        topic: request.topic.clone(),
                        output_path: workspace.output_path.clone(),
                    };
                    let draft = self.repairer.repair(&input)?;
                    candidate_source = DraftSource::Repair;
                    machine.record_draft(DraftSource::Repair, draft);
                }
                Action::AskUser { question } => {
                    info!("asking the user for clarification");
                    return Ok(machine.finish(Outcome::failed(question)));
                }
                Action::Finish { completed, content } => {
                    return Ok(machine.finish(Outcome { completed, content }));
                }
            }
        }
    }
}

/// A run only counts when the deck actually landed at the output path.
fn require_artifact(result: &mut ExecutionResult, workspace: &RequestWorkspace) {
    if !result.succeeded || workspace.artifact_ready() {
        return;
    }
    warn!(output = %workspace.output_path.display(), "program exited cleanly without a deck");
    result.succeeded = false;
    if !result.stderr.is_empty() && !result.stderr.ends_with('\n') {
        result.stderr.push('\n');
    }
    result.stderr.push_str(&format!(
        "program exited successfully but wrote no presentation to {}",
        workspace.output_path.display()
    ));
}
