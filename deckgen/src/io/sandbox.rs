//! Sandbox abstraction for running candidate programs.
//!
//! The [`Sandbox`] trait decouples the orchestrator from how a program is run.
//! [`InterpreterSandbox`] writes the program into the request's slot and runs
//! it under a configured interpreter with a timeout. Programs run with the
//! caller's privileges; the only isolation is the process boundary and the
//! request directory used as working directory.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{ExecutionResult, Program};
use crate::io::config::SandboxConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::workspace::RequestWorkspace;

/// Environment variable holding the path the program must save the deck to.
pub const OUTPUT_ENV: &str = "DECKGEN_OUTPUT";

/// Abstraction over program execution backends.
pub trait Sandbox {
    /// Persist `program` to the workspace slot and run it.
    ///
    /// A program that fails or times out yields `succeeded = false`; only
    /// infrastructure problems (spawn, disk) are errors.
    fn execute(&self, program: &Program, workspace: &RequestWorkspace)
    -> Result<ExecutionResult>;
}

/// Runs programs as `<interpreter...> <program file>`.
#[derive(Debug, Clone)]
pub struct InterpreterSandbox {
    interpreter: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl InterpreterSandbox {
    pub fn new(interpreter: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            interpreter,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(
            config.interpreter.clone(),
            config.timeout(),
            config.output_limit_bytes,
        )
    }
}

impl Sandbox for InterpreterSandbox {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs(), lines = program.line_count()))]
    fn execute(
        &self,
        program: &Program,
        workspace: &RequestWorkspace,
    ) -> Result<ExecutionResult> {
        workspace.store_candidate(program)?;
        workspace.clear_output()?;

        let (bin, args) = self
            .interpreter
            .split_first()
            .context("sandbox interpreter is empty")?;
        let mut cmd = Command::new(bin);
        cmd.args(args)
            .arg(&workspace.program_path)
            .current_dir(&workspace.dir)
            .env(OUTPUT_ENV, &workspace.output_path);

        info!(program = %workspace.program_path.display(), "running candidate program");
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run {}", workspace.program_path.display()))?;

        let mut stderr = output.stderr_text("program");
        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "candidate program timed out");
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "program timed out after {}s and was killed",
                self.timeout.as_secs()
            ));
        }

        let result = ExecutionResult {
            succeeded: output.succeeded(),
            stdout: output.stdout_text("program"),
            stderr,
            exit_code: output.status.code(),
            timed_out: output.timed_out,
        };
        debug!(
            succeeded = result.succeeded,
            exit_code = ?result.exit_code,
            "candidate program finished"
        );
        Ok(result)
    }
}
