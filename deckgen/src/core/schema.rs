//! JSON Schema checks for supervisor answers.

use std::error::Error;
use std::fmt;

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde_json::Value;

pub const OUTCOME_SCHEMA: &str = include_str!("../../schemas/outcome.schema.json");
pub const ACTION_SCHEMA: &str = include_str!("../../schemas/action.schema.json");

/// A supervisor answer that does not match its required shape.
///
/// Fatal for the request; callers recover it with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub subject: &'static str,
    pub errors: Vec<String>,
}

impl SchemaViolation {
    pub fn new(subject: &'static str, errors: Vec<String>) -> Self {
        Self { subject, errors }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} does not match its schema:\n- {}",
            self.subject,
            self.errors.join("\n- ")
        )
    }
}

impl Error for SchemaViolation {}

/// Compiled schema (Draft 2020-12) bound to a subject name for error reports.
pub struct SchemaCheck {
    subject: &'static str,
    validator: Validator,
}

impl fmt::Debug for SchemaCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaCheck")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl SchemaCheck {
    pub fn outcome() -> Result<Self> {
        Self::compile("outcome", OUTCOME_SCHEMA)
    }

    pub fn action() -> Result<Self> {
        Self::compile("supervisor action", ACTION_SCHEMA)
    }

    fn compile(subject: &'static str, raw: &str) -> Result<Self> {
        let schema: Value =
            serde_json::from_str(raw).with_context(|| format!("parse {subject} schema"))?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .with_context(|| format!("compile {subject} schema"))?;
        Ok(Self { subject, validator })
    }

    pub fn subject(&self) -> &'static str {
        self.subject
    }

    pub fn check(&self, instance: &Value) -> Result<(), SchemaViolation> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect();
        if errors.is_empty() {
            return Ok(());
        }
        Err(SchemaViolation::new(self.subject, errors))
    }
}
