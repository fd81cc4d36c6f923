//! Generator configuration stored in `deckgen.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::machine::LoopLimits;

pub const DEFAULT_CONFIG_FILE: &str = "deckgen.toml";

/// Generator configuration (TOML).
///
/// Missing fields default to values that work with a local `python3` that has
/// `python-pptx` installed and the `llm` command line tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeckgenConfig {
    /// Root under which each request gets `<session>/<seq>/`.
    pub work_dir: PathBuf,

    /// Wall-clock budget for one request, checked between loop steps.
    pub request_timeout_secs: u64,

    pub model: ModelConfig,
    pub sandbox: SandboxConfig,
    pub limits: LoopLimits,
    pub prompt: PromptConfig,
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Command that reads a prompt on stdin and prints the completion.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Completions longer than this are cut off.
    pub output_limit_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "llm".to_string(),
                "-m".to_string(),
                "gemini-2.5-pro".to_string(),
            ],
            timeout_secs: 5 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter invoked with the program file as its last argument.
    pub interpreter: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate program stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
    /// File name of the candidate slot inside a request directory.
    pub program_file: String,
    /// File name of the generated deck inside a request directory.
    pub output_file: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: vec!["python3".to_string()],
            timeout_secs: 120,
            output_limit_bytes: 100_000,
            program_file: "generated_ppt_code.py".to_string(),
            output_file: "generated_presentation.pptx".to_string(),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    /// Maximum bytes of a rendered system prompt before dropping sections.
    pub budget_bytes: usize,
    /// Replacement for the built-in style/context document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_doc: Option<PathBuf>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 120_000,
            context_doc: None,
        }
    }
}

/// Which decision policy drives the loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorKind {
    /// Fixed synthesize/execute/repair policy.
    #[default]
    Policy,
    /// The language model picks each next action.
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SupervisorConfig {
    pub kind: SupervisorKind,
}

impl Default for DeckgenConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(".deckgen"),
            request_timeout_secs: 30 * 60,
            model: ModelConfig::default(),
            sandbox: SandboxConfig::default(),
            limits: LoopLimits::default(),
            prompt: PromptConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl DeckgenConfig {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be > 0"));
        }
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        if self.sandbox.interpreter.is_empty() || self.sandbox.interpreter[0].trim().is_empty() {
            return Err(anyhow!("sandbox.interpreter must be a non-empty array"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow!("sandbox.timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        for (field, name) in [
            ("sandbox.program_file", &self.sandbox.program_file),
            ("sandbox.output_file", &self.sandbox.output_file),
        ] {
            if name.trim().is_empty() || name.contains(['/', '\\']) {
                return Err(anyhow!("{field} must be a plain file name"));
            }
        }
        if self.sandbox.program_file == self.sandbox.output_file {
            return Err(anyhow!(
                "sandbox.program_file and sandbox.output_file must differ"
            ));
        }
        if self.limits.max_steps == 0 {
            return Err(anyhow!("limits.max_steps must be > 0"));
        }
        if self.limits.max_synthesis_attempts == 0 {
            return Err(anyhow!("limits.max_synthesis_attempts must be > 0"));
        }
        if self.prompt.budget_bytes == 0 {
            return Err(anyhow!("prompt.budget_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DeckgenConfig::default()`.
pub fn load_config(path: &Path) -> Result<DeckgenConfig> {
    if !path.exists() {
        let cfg = DeckgenConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DeckgenConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DeckgenConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, DeckgenConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("deckgen.toml");
        let cfg = DeckgenConfig {
            supervisor: SupervisorConfig {
                kind: SupervisorKind::Model,
            },
            prompt: PromptConfig {
                budget_bytes: 4096,
                context_doc: Some(PathBuf::from("docs/pptx.md")),
            },
            ..DeckgenConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("deckgen.toml");
        fs::write(
            &path,
            "[sandbox]\ntimeout_secs = 30\n\n[limits]\nmax_repair_attempts = 5\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.sandbox.timeout_secs, 30);
        assert_eq!(cfg.sandbox.interpreter, vec!["python3"]);
        assert_eq!(cfg.limits.max_repair_attempts, 5);
        assert_eq!(cfg.limits.max_steps, LoopLimits::default().max_steps);
    }

    #[test]
    fn rejects_nested_file_names() {
        let mut cfg = DeckgenConfig::default();
        cfg.sandbox.output_file = "../deck.pptx".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("sandbox.output_file"));
    }
}
