//! Test-only doubles and fixtures for driving the orchestrator without a model.
//!
//! Sandboxed programs are shell scripts run by `sh`, so no Python is needed.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::agents::repairer::ModelRepairer;
use crate::agents::supervisor::{PolicySupervisor, Supervisor};
use crate::agents::synthesizer::ModelSynthesizer;
use crate::core::machine::{LoopLimits, LoopView};
use crate::core::schema::SchemaViolation;
use crate::core::types::Action;
use crate::io::completion::{Completer, CompletionRequest};
use crate::io::config::SandboxConfig;
use crate::io::prompt::PromptBuilder;
use crate::io::sandbox::InterpreterSandbox;
use crate::io::workspace::WorkspaceLayout;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};

/// Orchestrator wired to model-backed capabilities over completer `C`.
pub type TestOrchestrator<C, V> =
    Orchestrator<ModelSynthesizer<C>, ModelRepairer<C>, InterpreterSandbox, V>;

/// Wrap `code` in a fenced python block, the way a model would answer.
pub fn fenced(code: &str) -> String {
    format!("```python\n{code}\n```")
}

/// Shell program that saves a non-empty deck and prints the success line.
pub fn deck_program() -> String {
    "printf 'PK-deck' > \"$DECKGEN_OUTPUT\"\necho \"Presentation created successfully.\"".to_string()
}

/// Shell program that reports `error` on stderr and exits 1.
pub fn failing_program(error: &str) -> String {
    format!("echo '{error}' >&2\nexit 1")
}

/// Completer that replays canned responses in order and records every request.
#[derive(Debug, Default)]
pub struct ScriptedCompleter {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompleter {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Completer for ScriptedCompleter {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .ok_or_else(|| anyhow!("scripted completer has no response left"))
    }
}

/// Completer that computes each response from the request.
pub struct RoutingCompleter<F> {
    route: F,
}

impl<F> RoutingCompleter<F>
where
    F: Fn(&CompletionRequest) -> Result<String>,
{
    pub fn new(route: F) -> Self {
        Self { route }
    }
}

impl<F> Completer for RoutingCompleter<F>
where
    F: Fn(&CompletionRequest) -> Result<String>,
{
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        (self.route)(request)
    }
}

enum SupervisorScript {
    Queue(Mutex<VecDeque<Action>>),
    Repeat(Action),
    Fail(SchemaViolation),
}

/// Supervisor that proposes predetermined actions regardless of state.
pub struct ScriptedSupervisor {
    script: SupervisorScript,
}

impl ScriptedSupervisor {
    /// Propose `actions` in order, then fail.
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            script: SupervisorScript::Queue(Mutex::new(actions.into())),
        }
    }

    /// Propose `action` forever.
    pub fn repeat(action: Action) -> Self {
        Self {
            script: SupervisorScript::Repeat(action),
        }
    }

    /// Fail every decision with `violation`.
    pub fn failing(violation: SchemaViolation) -> Self {
        Self {
            script: SupervisorScript::Fail(violation),
        }
    }
}

impl Supervisor for ScriptedSupervisor {
    fn decide_next_action(&self, _view: &LoopView<'_>) -> Result<Action> {
        match &self.script {
            SupervisorScript::Queue(actions) => actions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .pop_front()
                .ok_or_else(|| anyhow!("scripted supervisor has no action left")),
            SupervisorScript::Repeat(action) => Ok(action.clone()),
            SupervisorScript::Fail(violation) => Err(violation.clone().into()),
        }
    }
}

/// Temporary work directory with `sh`-based sandbox settings.
pub struct TestWorkspace {
    temp: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            interpreter: vec!["sh".to_string()],
            timeout_secs: 10,
            program_file: "program.sh".to_string(),
            output_file: "deck.pptx".to_string(),
            ..SandboxConfig::default()
        }
    }

    pub fn config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            layout: WorkspaceLayout::new(self.path().join("work"), &self.sandbox_config()),
            limits: LoopLimits::default(),
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn sandbox(&self) -> InterpreterSandbox {
        InterpreterSandbox::from_config(&self.sandbox_config())
    }

    pub fn orchestrator<C, V>(&self, completer: C, supervisor: V) -> Result<TestOrchestrator<C, V>>
    where
        C: Completer + Clone,
        V: Supervisor,
    {
        self.orchestrator_with(completer, supervisor, self.config())
    }

    pub fn orchestrator_with<C, V>(
        &self,
        completer: C,
        supervisor: V,
        config: OrchestratorConfig,
    ) -> Result<TestOrchestrator<C, V>>
    where
        C: Completer + Clone,
        V: Supervisor,
    {
        let prompts = PromptBuilder::new(100_000);
        Orchestrator::new(
            ModelSynthesizer::new(completer.clone(), prompts.clone()),
            ModelRepairer::new(completer, prompts),
            self.sandbox(),
            supervisor,
            config,
        )
    }
}

/// Orchestrator driven by [`PolicySupervisor`].
pub fn policy_orchestrator<C>(
    workspace: &TestWorkspace,
    completer: C,
) -> Result<TestOrchestrator<C, PolicySupervisor>>
where
    C: Completer + Clone,
{
    workspace.orchestrator(completer, PolicySupervisor)
}
