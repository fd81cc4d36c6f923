//! Supervisors choose the next loop action from a [`LoopView`].
//!
//! [`PolicySupervisor`] encodes the fixed synthesize, execute, repair cycle.
//! [`ModelSupervisor`] asks the language model and validates its JSON answer
//! against the action schema, and a `finish` answer also against the outcome
//! schema. Whatever a supervisor proposes, [`crate::core::machine::LoopMachine`]
//! still decides whether it is legal.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::core::extract::extract_json_object;
use crate::core::machine::LoopView;
use crate::core::schema::{SchemaCheck, SchemaViolation};
use crate::core::types::Action;
use crate::io::completion::Completer;
use crate::io::prompt::PromptBuilder;

/// Asked when the request has no usable topic.
pub const TOPIC_QUESTION: &str =
    "What topic should the presentation cover? You can also say how many slides you want.";

/// Content of a successful outcome.
pub const DONE_CONTENT: &str = "Done";

pub trait Supervisor {
    fn decide_next_action(&self, view: &LoopView<'_>) -> Result<Action>;
}

impl<T: Supervisor + ?Sized> Supervisor for &T {
    fn decide_next_action(&self, view: &LoopView<'_>) -> Result<Action> {
        (**self).decide_next_action(view)
    }
}

impl<T: Supervisor + ?Sized> Supervisor for Box<T> {
    fn decide_next_action(&self, view: &LoopView<'_>) -> Result<Action> {
        (**self).decide_next_action(view)
    }
}

/// Deterministic policy: synthesize, execute, repair until a cap, then stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicySupervisor;

impl Supervisor for PolicySupervisor {
    fn decide_next_action(&self, view: &LoopView<'_>) -> Result<Action> {
        let request = view.request;
        if request.topic.trim().is_empty() {
            return Ok(Action::AskUser {
                question: TOPIC_QUESTION.to_string(),
            });
        }
        if view.last_execution_succeeded {
            return Ok(Action::Finish {
                completed: true,
                content: DONE_CONTENT.to_string(),
            });
        }
        if view.has_pending_candidate {
            return Ok(Action::Execute);
        }
        if let Some(error) = view.last_error {
            if view.repair_attempts < view.limits.max_repair_attempts {
                return Ok(Action::Repair {
                    error_message: error.to_string(),
                });
            }
            return Ok(Action::Finish {
                completed: false,
                content: error.to_string(),
            });
        }
        if view.synthesis_attempts < view.limits.max_synthesis_attempts {
            return Ok(Action::Synthesize {
                topic: request.topic.clone(),
                constraints: request.constraints.clone(),
                slide_count: request.target_count,
            });
        }
        Ok(Action::Finish {
            completed: false,
            content: view
                .last_failure()
                .unwrap_or_else(|| "No presentation could be generated.".to_string()),
        })
    }
}

/// Supervisor that lets the language model pick each action.
///
/// Answers that are not a single schema-valid JSON object fail the request
/// with a [`SchemaViolation`]; they are never retried.
#[derive(Debug)]
pub struct ModelSupervisor<C> {
    completer: C,
    prompts: PromptBuilder,
    action_schema: SchemaCheck,
    outcome_schema: SchemaCheck,
}

impl<C> ModelSupervisor<C> {
    pub fn new(completer: C, prompts: PromptBuilder) -> Result<Self> {
        Ok(Self {
            completer,
            prompts,
            action_schema: SchemaCheck::action()?,
            outcome_schema: SchemaCheck::outcome()?,
        })
    }

    fn parse_action(&self, response: &str) -> Result<Action> {
        let subject = self.action_schema.subject();
        let Some(raw) = extract_json_object(response) else {
            return Err(SchemaViolation::new(
                subject,
                vec!["response contains no JSON object".to_string()],
            )
            .into());
        };
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| SchemaViolation::new(subject, vec![format!("invalid JSON: {err}")]))?;
        self.action_schema.check(&value)?;

        if value.get("action").and_then(Value::as_str) == Some("finish") {
            let outcome = json!({
                "completed": value.get("completed"),
                "content": value.get("content"),
            });
            self.outcome_schema.check(&outcome)?;
        }

        serde_json::from_value(value).context("decode supervisor action")
    }
}

impl<C: Completer> Supervisor for ModelSupervisor<C> {
    #[instrument(skip_all, fields(step = view.steps, phase = view.phase.as_str()))]
    fn decide_next_action(&self, view: &LoopView<'_>) -> Result<Action> {
        let request = self.prompts.build_supervisor(view)?;
        let response = self
            .completer
            .complete(&request)
            .context("supervisor completion")?;
        match self.parse_action(&response) {
            Ok(action) => {
                debug!(action = action.kind(), "supervisor chose action");
                Ok(action)
            }
            Err(err) => {
                warn!(err = %err, "supervisor answer rejected");
                Err(err)
            }
        }
    }
}
