//! Text-completion capability.
//!
//! The [`Completer`] trait decouples prompt construction from the model
//! backend. [`CommandCompleter`] pipes the prompt to a command line tool;
//! tests use scripted completers that return predetermined responses.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::config::ModelConfig;
use crate::io::process::run_command_with_timeout;

/// A system/user prompt pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

impl CompletionRequest {
    /// Single-text rendering for backends without a separate system channel.
    pub fn render(&self) -> String {
        format!(
            "<system>\n{}\n</system>\n\n{}\n",
            self.system.trim(),
            self.user.trim()
        )
    }
}

/// Abstraction over language-model backends.
pub trait Completer {
    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

impl<T: Completer + ?Sized> Completer for &T {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        (**self).complete(request)
    }
}

impl<T: Completer + ?Sized> Completer for Arc<T> {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        (**self).complete(request)
    }
}

/// Completer that runs a command with the rendered prompt on stdin.
#[derive(Debug, Clone)]
pub struct CommandCompleter {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandCompleter {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(
            config.command.clone(),
            config.timeout(),
            config.output_limit_bytes,
        )
    }
}

impl Completer for CommandCompleter {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs(), prompt_bytes))]
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let (bin, args) = self
            .command
            .split_first()
            .context("model command is empty")?;
        let prompt = request.render();
        tracing::Span::current().record("prompt_bytes", prompt.len());
        info!(command = %bin, "requesting completion");

        let mut cmd = Command::new(bin);
        cmd.args(args);
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run model command {bin}"))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "model command timed out");
            return Err(anyhow!(
                "model command {bin} timed out after {:?}",
                self.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command {bin} failed with status {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        if output.stdout_truncated > 0 {
            warn!(
                truncated = output.stdout_truncated,
                "completion truncated at output limit"
            );
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(bytes = text.len(), "completion received");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "You write decks.".to_string(),
            user: "Topic: owls".to_string(),
        }
    }

    #[test]
    fn render_wraps_system_section() {
        let rendered = request().render();
        assert!(rendered.starts_with("<system>\nYou write decks.\n</system>"));
        assert!(rendered.ends_with("Topic: owls\n"));
    }

    #[test]
    fn command_receives_prompt_on_stdin() {
        let completer = CommandCompleter::new(
            vec!["cat".to_string()],
            Duration::from_secs(5),
            10_000,
        );
        let text = completer.complete(&request()).expect("complete");
        assert_eq!(text, request().render());
    }

    #[test]
    fn failing_command_is_an_error() {
        let completer = CommandCompleter::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo 'quota exceeded' >&2; exit 2".to_string(),
            ],
            Duration::from_secs(5),
            10_000,
        );
        let err = completer.complete(&request()).unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn stalled_command_times_out() {
        let completer = CommandCompleter::new(
            vec!["sh".to_string(), "-c".to_string(), "exec sleep 5".to_string()],
            Duration::from_millis(200),
            10_000,
        );
        let err = completer.complete(&request()).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn arc_and_reference_delegate() {
        let completer = Arc::new(CommandCompleter::new(
            vec!["cat".to_string()],
            Duration::from_secs(5),
            10_000,
        ));
        assert!(Arc::clone(&completer).complete(&request()).is_ok());
        assert!((&*completer).complete(&request()).is_ok());
    }
}
