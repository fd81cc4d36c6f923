//! Prompt builder for synthesis, repair and supervisor calls.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! After rendering, droppable sections are removed until the system prompt fits
//! the byte budget.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::agents::repairer::RepairInput;
use crate::agents::synthesizer::SynthesisInput;
use crate::core::machine::LoopView;
use crate::io::completion::CompletionRequest;

const SYNTHESIZE_TEMPLATE: &str = include_str!("prompts/synthesize.md");
const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");
const SUPERVISOR_TEMPLATE: &str = include_str!("prompts/supervisor.md");

/// Built-in python-pptx reference handed to the synthesizer and repairer.
pub const DEFAULT_STYLE_CONTEXT: &str = include_str!("prompts/style_context.md");

/// Rendered when the request carries no extra details.
const NO_DETAILS: &str = "Nothing.";

/// Sections dropped first when a prompt exceeds its budget.
const DROP_ORDER: [&str; 3] = ["context", "history", "observations"];

const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Load the style/context document, falling back to the built-in one.
pub fn load_style_context(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("read context document {}", path.display())),
        None => Ok(DEFAULT_STYLE_CONTEXT.to_string()),
    }
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("synthesize", SYNTHESIZE_TEMPLATE)
            .expect("synthesize template should be valid");
        env.add_template("repair", REPAIR_TEMPLATE)
            .expect("repair template should be valid");
        env.add_template("supervisor", SUPERVISOR_TEMPLATE)
            .expect("supervisor template should be valid");
        Self { env }
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        template
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    /// Section content without its marker.
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
    });

    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(rendered.len());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Drop droppable sections in [`DROP_ORDER`], then truncate the last section.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            let dropped = sections.remove(idx);
            debug!(
                section = key,
                bytes_dropped = dropped.content.len(),
                "dropped section for budget"
            );
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let Some((last, rest)) = sections.split_last_mut() else {
        return;
    };
    let allowed = budget.saturating_sub(total_len(rest));
    let before_len = last.content.len();
    if allowed > TRUNCATION_MARKER.len() {
        truncate_on_char_boundary(&mut last.content, allowed - TRUNCATION_MARKER.len());
        last.content.push_str(TRUNCATION_MARKER);
    } else {
        truncate_on_char_boundary(&mut last.content, allowed);
    }
    debug!(
        section = last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn truncate_on_char_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut idx = max_len;
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    text.truncate(idx);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|s| !s.is_empty())
}

/// Builds model prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
    context: String,
}

impl PromptBuilder {
    /// Create a builder with the given byte budget and no reference document.
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            budget_bytes,
            context: String::new(),
        }
    }

    /// Attach the style/context document rendered into code prompts.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }

    pub fn build_synthesis(&self, input: &SynthesisInput) -> Result<CompletionRequest> {
        let topic = input.topic.trim();
        let output_path = input.output_path.display().to_string();
        let rendered = PromptEngine::new().render(
            "synthesize",
            context! {
                topic => topic,
                slide_count => input.resolved_slide_count(),
                output_path => output_path,
                context => non_blank(Some(self.context.as_str())),
            },
        )?;
        let details = non_blank(input.constraints.as_deref()).unwrap_or(NO_DETAILS);
        Ok(CompletionRequest {
            system: self.fit(&rendered),
            user: format!(
                "Please generate a presentation on the topic `{topic}`. Details: {details}"
            ),
        })
    }

    pub fn build_repair(&self, input: &RepairInput) -> Result<CompletionRequest> {
        let output_path = input.output_path.display().to_string();
        let rendered = PromptEngine::new().render(
            "repair",
            context! {
                program => input.program.as_str().trim_end(),
                error => input.error_message.trim(),
                output_path => output_path,
                context => non_blank(Some(self.context.as_str())),
            },
        )?;
        Ok(CompletionRequest {
            system: self.fit(&rendered),
            user: format!(
                "Please fix the program above so it runs without errors and builds the intended presentation about `{}`.",
                input.topic.trim()
            ),
        })
    }

    pub fn build_supervisor(&self, view: &LoopView<'_>) -> Result<CompletionRequest> {
        let observations: Vec<String> = view.observations.iter().map(ToString::to_string).collect();
        let rendered = PromptEngine::new().render(
            "supervisor",
            context! {
                topic => view.request.topic.trim(),
                target_count => view.request.target_count,
                constraints => non_blank(view.request.constraints.as_deref()),
                phase => view.phase.as_str(),
                steps => view.steps,
                max_steps => view.limits.max_steps,
                synthesis_attempts => view.synthesis_attempts,
                max_synthesis => view.limits.max_synthesis_attempts,
                repair_attempts => view.repair_attempts,
                max_repair => view.limits.max_repair_attempts,
                has_pending => view.has_pending_candidate,
                last_succeeded => view.last_execution_succeeded,
                last_error => non_blank(view.last_error),
                observations => observations,
                history => view.history,
            },
        )?;
        Ok(CompletionRequest {
            system: self.fit(&rendered),
            user: format!(
                "Choose the next action for the request `{}`. Reply with one JSON object.",
                view.request.topic.trim()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::machine::{LoopLimits, LoopMachine};
    use crate::core::types::{Action, Draft, DraftSource, ExecutionResult, Program, Request, Turn};
    use std::path::PathBuf;

    fn synthesis_input() -> SynthesisInput {
        SynthesisInput {
            topic: "Solar energy".to_string(),
            constraints: None,
            slide_count: None,
            output_path: PathBuf::from("/work/s/0001/deck.pptx"),
        }
    }

    #[test]
    fn synthesis_sections_are_ordered() {
        let request = PromptBuilder::new(100_000)
            .with_context("Use CategoryChartData for charts.")
            .build_synthesis(&synthesis_input())
            .expect("build");

        let contract = request.system.find("### Program Contract").expect("contract");
        let requirements = request.system.find("### Requirements").expect("requirements");
        let reference = request.system.find("### Reference").expect("reference");
        assert!(contract < requirements);
        assert!(requirements < reference);
        assert!(request.system.contains("Use CategoryChartData"));
        assert!(!request.system.contains("<!-- section"));
    }

    #[test]
    fn synthesis_defaults_slide_count_and_details() {
        let request = PromptBuilder::new(100_000)
            .build_synthesis(&synthesis_input())
            .expect("build");

        assert!(request.system.contains("must contain 10 slides"));
        assert!(request.system.contains("`/work/s/0001/deck.pptx`"));
        assert!(request.user.contains("`Solar energy`"));
        assert!(request.user.ends_with("Details: Nothing."));
        assert!(!request.system.contains("### Reference"));
    }

    #[test]
    fn synthesis_uses_requested_slide_count_and_constraints() {
        let input = SynthesisInput {
            slide_count: Some(5),
            constraints: Some("dark theme".to_string()),
            ..synthesis_input()
        };
        let request = PromptBuilder::new(100_000)
            .build_synthesis(&input)
            .expect("build");
        assert!(request.system.contains("must contain 5 slides"));
        assert!(request.user.ends_with("Details: dark theme"));
    }

    #[test]
    fn budget_drops_context_before_required_sections() {
        let request = PromptBuilder::new(2_000)
            .with_context("reference ".repeat(1_000))
            .build_synthesis(&synthesis_input())
            .expect("build");

        assert!(!request.system.contains("### Reference"));
        assert!(request.system.contains("### Program Contract"));
        assert!(request.system.contains("### Requirements"));
    }

    #[test]
    fn repair_prompt_carries_program_and_error() {
        let input = RepairInput {
            program: Program::new("import pptx\nraise ValueError('boom')\n"),
            error_message: "Error executing code: ValueError: boom".to_string(),
            topic: "Solar energy".to_string(),
            output_path: PathBuf::from("deck.pptx"),
        };
        let request = PromptBuilder::new(100_000)
            .with_context(DEFAULT_STYLE_CONTEXT)
            .build_repair(&input)
            .expect("build");

        let program = request.system.find("raise ValueError('boom')").expect("program");
        let error = request.system.find("ValueError: boom\n</error>").expect("error");
        assert!(program < error);
        assert!(request.user.contains("`Solar energy`"));
    }

    #[test]
    fn supervisor_prompt_shows_state_and_observations() {
        let request = Request::from_input("s", "Tides, 6 slides");
        let history = vec![Turn::human("hello"), Turn::agent("Which topic?")];
        let mut machine = LoopMachine::new(LoopLimits::default());
        machine
            .admit(&Action::Synthesize {
                topic: request.topic.clone(),
                constraints: None,
                slide_count: request.target_count,
            })
            .expect("admit");
        machine.record_draft(DraftSource::Synthesis, Draft::Program(Program::new("x\ny")));
        machine.record_execution(&ExecutionResult {
            succeeded: false,
            stdout: String::new(),
            stderr: "KeyError: 'title'".to_string(),
            exit_code: Some(1),
            timed_out: false,
        });

        let prompt = PromptBuilder::new(100_000)
            .build_supervisor(&machine.view(&request, &history))
            .expect("build");

        assert!(prompt.system.contains("Topic: Tides, 6 slides"));
        assert!(prompt.system.contains("Requested slides: 6"));
        assert!(prompt.system.contains("Synthesis attempts: 1 of 3"));
        assert!(prompt.system.contains("Last error:\nError executing code: KeyError: 'title'"));
        assert!(prompt.system.contains("- synthesis produced a candidate program (2 lines)"));
        assert!(prompt.system.contains("human: hello"));
        assert!(prompt.system.contains("agent: Which topic?"));
    }

    #[test]
    fn supervisor_drops_history_before_observations() {
        let request = Request::from_input("s", "Tides");
        let history = vec![Turn::human("x".repeat(4_000))];
        let mut machine = LoopMachine::new(LoopLimits::default());
        let _ = machine.admit(&Action::Execute);

        let prompt = PromptBuilder::new(3_000)
            .build_supervisor(&machine.view(&request, &history))
            .expect("build");

        assert!(!prompt.system.contains("### Conversation"));
        assert!(prompt.system.contains("### Observations"));
        assert!(prompt.system.contains("### Loop State"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut sections = vec![ParsedSection {
            key: "contract".to_string(),
            required: true,
            content: "é".repeat(50),
        }];
        apply_budget_to_sections(&mut sections, 31);
        let content = &sections[0].content;
        assert!(content.len() <= 31);
        assert!(content.ends_with("[truncated]"));
    }

    #[test]
    fn style_context_loads_default_or_override() {
        assert_eq!(
            load_style_context(None).expect("default"),
            DEFAULT_STYLE_CONTEXT
        );

        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("docs.md");
        fs::write(&path, "custom docs").expect("write");
        assert_eq!(load_style_context(Some(&path)).expect("load"), "custom docs");
        assert!(load_style_context(Some(&temp.path().join("missing.md"))).is_err());
    }
}
