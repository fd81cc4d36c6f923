//! Attempt logging helpers for `<request dir>/attempts/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{DraftSource, ExecutionResult, Outcome, Program};
use crate::io::workspace::RequestWorkspace;

#[derive(Debug, Clone, Serialize)]
pub struct AttemptMeta {
    pub attempt: u32,
    /// Capability that produced the program.
    pub source: DraftSource,
    pub succeeded: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub program_path: PathBuf,
    pub execution_log_path: PathBuf,
}

impl AttemptPaths {
    pub fn new(workspace: &RequestWorkspace, attempt: u32) -> Self {
        let dir = workspace.attempts_dir.join(attempt.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            program_path: dir.join("program.txt"),
            execution_log_path: dir.join("execution.log"),
            dir,
        }
    }
}

pub struct AttemptWriteRequest<'a> {
    pub workspace: &'a RequestWorkspace,
    pub meta: &'a AttemptMeta,
    pub program: &'a Program,
    pub result: &'a ExecutionResult,
}

/// Record one executed program and what it printed.
pub fn write_attempt(request: &AttemptWriteRequest<'_>) -> Result<AttemptPaths> {
    let paths = AttemptPaths::new(request.workspace, request.meta.attempt);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;

    write_json(&paths.meta_path, request.meta)?;
    write_text(&paths.program_path, request.program.as_str())?;
    write_text(
        &paths.execution_log_path,
        &format_execution_log(request.result),
    )?;
    Ok(paths)
}

/// Write the terminal outcome next to the attempts.
pub fn write_outcome(workspace: &RequestWorkspace, outcome: &Outcome) -> Result<()> {
    write_json(&workspace.outcome_path, outcome)
}

fn format_execution_log(result: &ExecutionResult) -> String {
    let mut log = String::new();
    log.push_str(&format!(
        "exit_code: {}\ntimed_out: {}\n",
        result
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "none".to_string()),
        result.timed_out
    ));
    log.push_str("=== stdout ===\n");
    log.push_str(&result.stdout);
    if !result.stdout.is_empty() && !result.stdout.ends_with('\n') {
        log.push('\n');
    }
    log.push_str("=== stderr ===\n");
    log.push_str(&result.stderr);
    if !result.stderr.is_empty() && !result.stderr.ends_with('\n') {
        log.push('\n');
    }
    log
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_text(path, &buf)
}
