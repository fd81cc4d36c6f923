//! Bounded finite-state object behind the generate/execute/repair loop.
//!
//! The machine owns every counter that bounds a request. Supervisors only
//! propose actions; [`LoopMachine::admit`] decides whether an action is legal
//! in the current state and charges it against the step budget, so a loop
//! driven by any supervisor terminates after at most `max_steps` decisions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::types::{Action, Draft, DraftSource, ExecutionResult, Outcome, Phase, Program};
use crate::core::types::{Request, Turn};

/// Ceilings enforced on a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopLimits {
    /// Supervisor decisions allowed per request, rejected ones included.
    pub max_steps: u32,
    /// Synthesis calls allowed per request.
    pub max_synthesis_attempts: u32,
    /// Repair calls allowed per request.
    pub max_repair_attempts: u32,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_steps: 12,
            max_synthesis_attempts: 3,
            max_repair_attempts: 3,
        }
    }
}

/// Something the supervisor should know about before its next decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Drafted { source: DraftSource, lines: usize },
    Unextractable { source: DraftSource, reason: String },
    Executed { stdout: String },
    ExecutionFailed { error: String },
    Rejected { action: &'static str, reason: String },
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observation::Drafted { source, lines } => {
                write!(f, "{} produced a candidate program ({lines} lines)", source.as_str())
            }
            Observation::Unextractable { source, reason } => {
                write!(f, "{} produced no program: {reason}", source.as_str())
            }
            Observation::Executed { stdout } => {
                write!(f, "execution succeeded: {}", stdout.trim())
            }
            Observation::ExecutionFailed { error } => write!(f, "execution failed: {error}"),
            Observation::Rejected { action, reason } => {
                write!(f, "action `{action}` rejected: {reason}")
            }
        }
    }
}

/// Why an action was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub action: &'static str,
    pub reason: String,
}

/// Read-only snapshot handed to supervisors.
#[derive(Debug, Clone, Copy)]
pub struct LoopView<'a> {
    pub request: &'a Request,
    pub history: &'a [Turn],
    pub phase: Phase,
    pub limits: LoopLimits,
    pub steps: u32,
    pub synthesis_attempts: u32,
    pub repair_attempts: u32,
    pub has_pending_candidate: bool,
    pub last_execution_succeeded: bool,
    /// Failure reason of the most recent execution, if it failed.
    pub last_error: Option<&'a str>,
    pub observations: &'a [Observation],
}

impl LoopView<'_> {
    /// Most recent reason the loop has not produced a deck yet.
    pub fn last_failure(&self) -> Option<String> {
        latest_failure(self.observations, false)
    }
}

/// Newest failure among `observations`; rejected actions count when asked.
fn latest_failure(observations: &[Observation], include_rejections: bool) -> Option<String> {
    observations.iter().rev().find_map(|obs| match obs {
        Observation::Unextractable { reason, .. } => Some(reason.clone()),
        Observation::ExecutionFailed { error } => Some(error.clone()),
        Observation::Rejected { reason, .. } if include_rejections => Some(reason.clone()),
        _ => None,
    })
}

/// Tagged loop state with enforced transition ceilings.
#[derive(Debug, Clone)]
pub struct LoopMachine {
    limits: LoopLimits,
    phase: Phase,
    steps: u32,
    synthesis_attempts: u32,
    repair_attempts: u32,
    executions: u32,
    pending: Option<Program>,
    last_error: Option<String>,
    last_success: bool,
    observations: Vec<Observation>,
}

impl LoopMachine {
    pub fn new(limits: LoopLimits) -> Self {
        Self {
            limits,
            phase: Phase::Synthesizing,
            steps: 0,
            synthesis_attempts: 0,
            repair_attempts: 0,
            executions: 0,
            pending: None,
            last_error: None,
            last_success: false,
            observations: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn executions(&self) -> u32 {
        self.executions
    }

    /// Candidate drafted but not yet executed.
    pub fn pending_candidate(&self) -> Option<&Program> {
        self.pending.as_ref()
    }

    pub fn view<'a>(&'a self, request: &'a Request, history: &'a [Turn]) -> LoopView<'a> {
        LoopView {
            request,
            history,
            phase: self.phase,
            limits: self.limits,
            steps: self.steps,
            synthesis_attempts: self.synthesis_attempts,
            repair_attempts: self.repair_attempts,
            has_pending_candidate: self.pending.is_some(),
            last_execution_succeeded: self.last_success,
            last_error: self.last_error.as_deref(),
            observations: &self.observations,
        }
    }

    /// Forced failure once the step budget is spent.
    pub fn exhausted(&self) -> Option<Outcome> {
        if self.phase == Phase::Done || self.steps < self.limits.max_steps {
            return None;
        }
        let reason = latest_failure(&self.observations, true)
            .unwrap_or_else(|| "no presentation was produced".to_string());
        Some(Outcome::failed(format!(
            "Stopped after {} steps without a presentation. Last error: {reason}",
            self.steps
        )))
    }

    /// Charge `action` against the budget and check it is legal now.
    ///
    /// Rejected actions still consume a step and are recorded as observations.
    pub fn admit(&mut self, action: &Action) -> Result<(), Rejection> {
        let kind = action.kind();
        if self.phase == Phase::Done {
            return Err(Rejection {
                action: kind,
                reason: "loop already finished".to_string(),
            });
        }
        self.steps += 1;
        match self.check(action) {
            Ok(()) => {
                self.enter(action);
                Ok(())
            }
            Err(reason) => {
                self.observations.push(Observation::Rejected {
                    action: kind,
                    reason: reason.clone(),
                });
                Err(Rejection {
                    action: kind,
                    reason,
                })
            }
        }
    }

    fn check(&self, action: &Action) -> Result<(), String> {
        match action {
            Action::Synthesize { topic, .. } => {
                if topic.trim().is_empty() {
                    return Err("topic must not be empty".to_string());
                }
                if self.synthesis_attempts >= self.limits.max_synthesis_attempts {
                    return Err(format!(
                        "synthesis limit of {} attempts reached",
                        self.limits.max_synthesis_attempts
                    ));
                }
                Ok(())
            }
            Action::Execute => {
                if self.pending.is_none() {
                    return Err("no candidate program to execute".to_string());
                }
                Ok(())
            }
            Action::Repair { .. } => {
                if self.last_success || self.last_error.is_none() {
                    return Err("no failed execution to repair".to_string());
                }
                if self.repair_attempts >= self.limits.max_repair_attempts {
                    return Err(format!(
                        "repair limit of {} attempts reached",
                        self.limits.max_repair_attempts
                    ));
                }
                Ok(())
            }
            Action::AskUser { question } => {
                if question.trim().is_empty() {
                    return Err("question must not be empty".to_string());
                }
                Ok(())
            }
            Action::Finish { completed, content } => {
                if *completed && !self.last_success {
                    return Err("completion claimed without a successful execution".to_string());
                }
                if content.trim().is_empty() {
                    return Err("content must not be empty".to_string());
                }
                Ok(())
            }
        }
    }

    fn enter(&mut self, action: &Action) {
        match action {
            Action::Synthesize { .. } => {
                self.synthesis_attempts += 1;
                self.phase = Phase::Synthesizing;
            }
            Action::Execute => self.phase = Phase::Executing,
            Action::Repair { .. } => {
                self.repair_attempts += 1;
                self.phase = Phase::Repairing;
            }
            Action::AskUser { .. } | Action::Finish { .. } => self.phase = Phase::Done,
        }
    }

    pub fn record_draft(&mut self, source: DraftSource, draft: Draft) {
        match draft {
            Draft::Program(program) => {
                self.observations.push(Observation::Drafted {
                    source,
                    lines: program.line_count(),
                });
                self.pending = Some(program);
                self.last_success = false;
                self.phase = Phase::Executing;
            }
            Draft::Unextractable(reason) => {
                self.observations
                    .push(Observation::Unextractable { source, reason });
            }
        }
    }

    pub fn record_execution(&mut self, result: &ExecutionResult) {
        self.executions += 1;
        self.pending = None;
        if result.succeeded {
            self.last_success = true;
            self.last_error = None;
            self.observations.push(Observation::Executed {
                stdout: result.stdout.clone(),
            });
        } else {
            let error = result.failure_reason();
            self.last_success = false;
            self.last_error = Some(error.clone());
            self.phase = Phase::Repairing;
            self.observations.push(Observation::ExecutionFailed { error });
        }
    }

    /// Close the loop with `outcome`.
    pub fn finish(&mut self, outcome: Outcome) -> Outcome {
        self.phase = Phase::Done;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::NO_CODE_SENTINEL;

    fn synthesize() -> Action {
        Action::Synthesize {
            topic: "owls".to_string(),
            constraints: None,
            slide_count: None,
        }
    }

    fn failed_run(stderr: &str) -> ExecutionResult {
        ExecutionResult {
            succeeded: false,
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: Some(1),
            timed_out: false,
        }
    }

    fn ok_run() -> ExecutionResult {
        ExecutionResult {
            succeeded: true,
            stdout: "created".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            timed_out: false,
        }
    }

    #[test]
    fn execute_requires_a_pending_candidate() {
        let mut machine = LoopMachine::new(LoopLimits::default());
        let rejection = machine.admit(&Action::Execute).unwrap_err();
        assert_eq!(rejection.action, "execute");
        assert_eq!(machine.steps(), 1);

        machine.admit(&synthesize()).expect("synthesize");
        machine.record_draft(DraftSource::Synthesis, Draft::Program(Program::new("x")));
        assert_eq!(machine.phase(), Phase::Executing);
        machine.admit(&Action::Execute).expect("execute");
    }

    #[test]
    fn unextractable_draft_leaves_nothing_to_execute() {
        let mut machine = LoopMachine::new(LoopLimits::default());
        machine.admit(&synthesize()).expect("synthesize");
        machine.record_draft(DraftSource::Synthesis, Draft::unextractable());
        assert!(machine.pending_candidate().is_none());
        assert!(machine.admit(&Action::Execute).is_err());
        let request = Request::from_input("1", "owls");
        let view = machine.view(&request, &[]);
        assert_eq!(view.last_failure().as_deref(), Some(NO_CODE_SENTINEL));
    }

    #[test]
    fn completion_requires_successful_execution() {
        let mut machine = LoopMachine::new(LoopLimits::default());
        machine.admit(&synthesize()).expect("synthesize");
        machine.record_draft(DraftSource::Synthesis, Draft::Program(Program::new("x")));
        machine.admit(&Action::Execute).expect("execute");
        machine.record_execution(&failed_run("boom"));

        let finish = Action::Finish {
            completed: true,
            content: "Done".to_string(),
        };
        assert!(machine.admit(&finish).is_err());

        machine
            .admit(&Action::Repair {
                error_message: "boom".to_string(),
            })
            .expect("repair");
        machine.record_draft(DraftSource::Repair, Draft::Program(Program::new("y")));
        machine.admit(&Action::Execute).expect("execute");
        machine.record_execution(&ok_run());
        machine.admit(&finish).expect("finish");
        assert_eq!(machine.phase(), Phase::Done);
        assert_eq!(machine.executions(), 2);
    }

    #[test]
    fn repair_cap_is_enforced() {
        let limits = LoopLimits {
            max_repair_attempts: 1,
            ..LoopLimits::default()
        };
        let mut machine = LoopMachine::new(limits);
        machine.admit(&synthesize()).expect("synthesize");
        machine.record_draft(DraftSource::Synthesis, Draft::Program(Program::new("x")));
        machine.admit(&Action::Execute).expect("execute");
        machine.record_execution(&failed_run("first"));
        let repair = Action::Repair {
            error_message: "first".to_string(),
        };
        machine.admit(&repair).expect("first repair");
        machine.record_draft(DraftSource::Repair, Draft::unextractable());
        let rejection = machine.admit(&repair).unwrap_err();
        assert!(rejection.reason.contains("repair limit"));
    }

    #[test]
    fn repair_sees_latest_error() {
        let mut machine = LoopMachine::new(LoopLimits::default());
        machine.admit(&synthesize()).expect("synthesize");
        machine.record_draft(DraftSource::Synthesis, Draft::Program(Program::new("x")));
        machine.admit(&Action::Execute).expect("execute");
        machine.record_execution(&failed_run("first"));
        machine
            .admit(&Action::Repair {
                error_message: "first".to_string(),
            })
            .expect("repair");
        machine.record_draft(DraftSource::Repair, Draft::Program(Program::new("y")));
        machine.admit(&Action::Execute).expect("execute");
        machine.record_execution(&failed_run("second"));

        let request = Request::from_input("1", "owls");
        let view = machine.view(&request, &[]);
        assert_eq!(view.last_error, Some("Error executing code: second"));
        assert_eq!(view.phase, Phase::Repairing);
    }

    #[test]
    fn step_budget_forces_failure() {
        let limits = LoopLimits {
            max_steps: 2,
            ..LoopLimits::default()
        };
        let mut machine = LoopMachine::new(limits);
        assert!(machine.exhausted().is_none());
        let _ = machine.admit(&Action::Execute);
        let _ = machine.admit(&Action::Execute);
        let outcome = machine.exhausted().expect("exhausted");
        assert!(!outcome.completed);
        assert!(outcome.content.contains("no candidate program"));

        // Supervisors only see real failures, not their own rejected actions.
        let request = Request::from_input("1", "owls");
        assert_eq!(machine.view(&request, &[]).last_failure(), None);
    }

    #[test]
    fn finished_machine_rejects_everything() {
        let mut machine = LoopMachine::new(LoopLimits::default());
        machine
            .admit(&Action::AskUser {
                question: "Which topic?".to_string(),
            })
            .expect("ask");
        assert!(machine.admit(&synthesize()).is_err());
        assert!(machine.exhausted().is_none());
    }
}
