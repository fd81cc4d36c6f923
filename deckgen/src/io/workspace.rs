//! Per-request directories holding the candidate slot and the deck.
//!
//! Layout: `<work_dir>/<session>/<seq>/` containing the program file, the
//! output file, `attempts/` and `outcome.json`. Request directories are
//! claimed with an exclusive `create_dir`, so no two requests (in this process
//! or another sharing the work dir) ever get the same one, and an existing
//! directory is never reused or removed.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::types::{Program, SessionId};
use crate::io::config::SandboxConfig;

/// Where request directories go and what the files inside are called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    pub root: PathBuf,
    pub program_file: String,
    pub output_file: String,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>, sandbox: &SandboxConfig) -> Self {
        Self {
            root: root.into(),
            program_file: sandbox.program_file.clone(),
            output_file: sandbox.output_file.clone(),
        }
    }

    /// Claim a fresh directory for a request of `session`.
    ///
    /// Starts at `seq` and moves past numbers already taken on disk. Returns
    /// the workspace together with the number actually claimed.
    pub fn create(&self, session: &SessionId, seq: u64) -> Result<RequestWorkspace> {
        let session_dir = self.root.join(session_dir_name(session));
        fs::create_dir_all(&session_dir)
            .with_context(|| format!("create session dir {}", session_dir.display()))?;

        let mut seq = seq.max(1);
        let dir = loop {
            let dir = session_dir.join(format!("{seq:04}"));
            match fs::create_dir(&dir) {
                Ok(()) => break dir,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => seq += 1,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("create request dir {}", dir.display()));
                }
            }
        };
        // Programs run with the request dir as cwd, so handed-out paths are absolute.
        let dir = std::path::absolute(&dir)
            .with_context(|| format!("resolve request dir {}", dir.display()))?;
        debug!(dir = %dir.display(), seq, "claimed request workspace");
        Ok(RequestWorkspace {
            seq,
            program_path: dir.join(&self.program_file),
            output_path: dir.join(&self.output_file),
            attempts_dir: dir.join("attempts"),
            outcome_path: dir.join("outcome.json"),
            dir,
        })
    }
}

/// Files owned by one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestWorkspace {
    /// Number of this request within its session directory.
    pub seq: u64,
    pub dir: PathBuf,
    /// Candidate slot: holds the most recently executed program.
    pub program_path: PathBuf,
    /// Where the program must save the deck.
    pub output_path: PathBuf,
    pub attempts_dir: PathBuf,
    pub outcome_path: PathBuf,
}

impl RequestWorkspace {
    /// Overwrite the candidate slot.
    pub fn store_candidate(&self, program: &Program) -> Result<()> {
        fs::write(&self.program_path, program.as_str())
            .with_context(|| format!("write candidate {}", self.program_path.display()))
    }

    /// Read back the program currently in the slot.
    pub fn load_candidate(&self) -> Result<Program> {
        let text = fs::read_to_string(&self.program_path)
            .with_context(|| format!("read candidate {}", self.program_path.display()))?;
        Ok(Program::new(text))
    }

    /// Remove a deck left by a previous attempt so only a fresh write counts.
    pub fn clear_output(&self) -> Result<()> {
        if self.output_path.exists() {
            fs::remove_file(&self.output_path)
                .with_context(|| format!("remove stale output {}", self.output_path.display()))?;
        }
        Ok(())
    }

    /// True when the deck exists and is non-empty.
    pub fn artifact_ready(&self) -> bool {
        fs::metadata(&self.output_path)
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }
}

fn session_dir_name(session: &SessionId) -> String {
    let name: String = session
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        return "_".to_string();
    }
    format!("session-{name}")
}
