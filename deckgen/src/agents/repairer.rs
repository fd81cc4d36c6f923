//! Program repair: failing program and its error in, replacement out.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::extract::draft_from_response;
use crate::core::types::{Draft, Program};
use crate::io::completion::Completer;
use crate::io::prompt::PromptBuilder;

/// The last failing program/error pair plus what the deck is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairInput {
    /// The program that actually ran, read back from the request's slot.
    pub program: Program,
    pub error_message: String,
    pub topic: String,
    pub output_path: PathBuf,
}

pub trait Repairer {
    /// Produce a full replacement program, with the same extraction contract
    /// as synthesis.
    fn repair(&self, input: &RepairInput) -> Result<Draft>;
}

#[derive(Debug, Clone)]
pub struct ModelRepairer<C> {
    completer: C,
    prompts: PromptBuilder,
}

impl<C> ModelRepairer<C> {
    pub fn new(completer: C, prompts: PromptBuilder) -> Self {
        Self { completer, prompts }
    }
}

impl<C: Completer> Repairer for ModelRepairer<C> {
    #[instrument(skip_all, fields(failing_lines = input.program.line_count()))]
    fn repair(&self, input: &RepairInput) -> Result<Draft> {
        let request = self.prompts.build_repair(input)?;
        let response = self
            .completer
            .complete(&request)
            .context("repair completion")?;
        let draft = draft_from_response(&response);
        match &draft {
            Draft::Program(program) => info!(lines = program.line_count(), "repaired program"),
            Draft::Unextractable(_) => warn!("repair response had no code block"),
        }
        Ok(draft)
    }
}
