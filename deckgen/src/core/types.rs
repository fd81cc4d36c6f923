//! Shared deterministic types for the generate/execute/repair loop.
//!
//! These types define the contracts between the orchestrator and its
//! capabilities. They carry no I/O and serialize to stable JSON.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Slide count applied when the request does not name one.
pub const DEFAULT_SLIDE_COUNT: u32 = 10;

/// Returned in place of a program when a model response has no code block.
pub const NO_CODE_SENTINEL: &str = "Could not extract code block from the response.";

/// Media type of the generated artifact.
pub const PRESENTATION_MEDIA_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// Caller-scoped conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// An accepted deck request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub session_id: SessionId,
    pub topic: String,
    pub constraints: Option<String>,
    pub target_count: Option<u32>,
}

impl Request {
    /// Derive a request from free-form user input.
    ///
    /// The trimmed input becomes the topic. A phrase such as "5 slides" or
    /// "12-slide" sets `target_count`; anything else leaves it unset.
    pub fn from_input(session_id: impl Into<SessionId>, input: &str) -> Self {
        Self {
            session_id: session_id.into(),
            topic: input.trim().to_string(),
            constraints: None,
            target_count: parse_slide_count(input),
        }
    }
}

fn parse_slide_count(input: &str) -> Option<u32> {
    static SLIDES_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,3})[\s-]*slides?\b").unwrap());
    SLIDES_RE
        .captures(input)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|count| *count > 0)
}

/// Program text believed to build the deck when executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program(String);

impl Program {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn line_count(&self) -> usize {
        self.0.lines().count()
    }
}

/// Which capability produced a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftSource {
    Synthesis,
    Repair,
}

impl DraftSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DraftSource::Synthesis => "synthesis",
            DraftSource::Repair => "repair",
        }
    }
}

/// Result of a synthesis or repair call.
///
/// Extraction failure is a value, not an error, so the loop can decide what
/// to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Draft {
    Program(Program),
    Unextractable(String),
}

impl Draft {
    pub fn unextractable() -> Self {
        Draft::Unextractable(NO_CODE_SENTINEL.to_string())
    }
}

impl fmt::Display for Draft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Draft::Program(program) => f.write_str(program.as_str()),
            Draft::Unextractable(reason) => f.write_str(reason),
        }
    }
}

/// Captured result of running a candidate program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ExecutionResult {
    /// Text handed to the repairer when the run failed.
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            return format!(
                "Error executing code: program exited with status {:?} and no error output",
                self.exit_code
            );
        }
        format!("Error executing code: {stderr}")
    }
}

/// Terminal result of one request. Exactly two fields on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub completed: bool,
    pub content: String,
}

impl Outcome {
    pub fn completed(content: impl Into<String>) -> Self {
        Self {
            completed: true,
            content: content.into(),
        }
    }

    pub fn failed(content: impl Into<String>) -> Self {
        Self {
            completed: false,
            content: content.into(),
        }
    }
}

/// Speaker of a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Agent,
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Human => "human",
            Role::Agent => "agent",
            Role::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            content: content.into(),
        }
    }
}

/// Next step chosen by a supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Synthesize {
        topic: String,
        #[serde(default)]
        constraints: Option<String>,
        #[serde(default)]
        slide_count: Option<u32>,
    },
    Execute,
    Repair {
        error_message: String,
    },
    AskUser {
        question: String,
    },
    Finish {
        completed: bool,
        content: String,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Synthesize { .. } => "synthesize",
            Action::Execute => "execute",
            Action::Repair { .. } => "repair",
            Action::AskUser { .. } => "ask_user",
            Action::Finish { .. } => "finish",
        }
    }
}

/// Coarse position of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Synthesizing,
    Executing,
    Repairing,
    Done,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Synthesizing => "synthesizing",
            Phase::Executing => "executing",
            Phase::Repairing => "repairing",
            Phase::Done => "done",
        }
    }
}
