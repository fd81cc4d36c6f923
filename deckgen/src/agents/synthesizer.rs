//! Code synthesis: topic and constraints in, candidate program out.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::extract::draft_from_response;
use crate::core::types::{DEFAULT_SLIDE_COUNT, Draft};
use crate::io::completion::Completer;
use crate::io::prompt::PromptBuilder;

/// Everything a synthesis call needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisInput {
    pub topic: String,
    pub constraints: Option<String>,
    pub slide_count: Option<u32>,
    /// Path the generated program must save the deck to.
    pub output_path: PathBuf,
}

impl SynthesisInput {
    pub fn resolved_slide_count(&self) -> u32 {
        self.slide_count
            .filter(|count| *count > 0)
            .unwrap_or(DEFAULT_SLIDE_COUNT)
    }
}

pub trait CodeSynthesizer {
    /// Draft a program. A response without a code block is
    /// [`Draft::Unextractable`]; only model-call failures are errors.
    fn synthesize(&self, input: &SynthesisInput) -> Result<Draft>;
}

/// Synthesizer that prompts a [`Completer`] and extracts the fenced block.
#[derive(Debug, Clone)]
pub struct ModelSynthesizer<C> {
    completer: C,
    prompts: PromptBuilder,
}

impl<C> ModelSynthesizer<C> {
    pub fn new(completer: C, prompts: PromptBuilder) -> Self {
        Self { completer, prompts }
    }
}

impl<C: Completer> CodeSynthesizer for ModelSynthesizer<C> {
    #[instrument(skip_all, fields(slide_count = input.resolved_slide_count()))]
    fn synthesize(&self, input: &SynthesisInput) -> Result<Draft> {
        let request = self.prompts.build_synthesis(input)?;
        let response = self
            .completer
            .complete(&request)
            .context("synthesis completion")?;
        let draft = draft_from_response(&response);
        match &draft {
            Draft::Program(program) => info!(lines = program.line_count(), "synthesized program"),
            Draft::Unextractable(_) => warn!(
                response_bytes = response.len(),
                "synthesis response had no code block"
            ),
        }
        Ok(draft)
    }
}
