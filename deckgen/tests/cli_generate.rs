//! CLI tests for `deckgen init` and `deckgen generate`.
//!
//! Spawns the deckgen binary with a config whose model command is a shell
//! one-liner and whose interpreter is `sh`, then checks exit codes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use deckgen::exit_codes;
use deckgen::io::config::{DeckgenConfig, load_config, write_config};

fn write_test_config(root: &Path, model_script: &str) {
    let mut cfg = DeckgenConfig::default();
    cfg.model.command = vec!["sh".to_string(), "-c".to_string(), model_script.to_string()];
    cfg.model.timeout_secs = 10;
    cfg.sandbox.interpreter = vec!["sh".to_string()];
    cfg.sandbox.timeout_secs = 10;
    write_config(&root.join("deckgen.toml"), &cfg).expect("write config");
}

/// Deck path printed by `generate`, resolved against the run directory.
fn artifact_path(root: &Path, stdout: &str) -> PathBuf {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("artifact: "))
        .map(|path| root.join(path))
        .expect("artifact line")
}

fn deckgen(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_deckgen"))
        .current_dir(root)
        .args(args)
        .output()
        .expect("run deckgen")
}

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");

    let first = deckgen(temp.path(), &["init"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    let cfg = load_config(&temp.path().join("deckgen.toml")).expect("load");
    assert_eq!(cfg, DeckgenConfig::default());

    let second = deckgen(temp.path(), &["init"]);
    assert_eq!(second.status.code(), Some(exit_codes::INVALID));

    let forced = deckgen(temp.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn generate_success_exits_ok_and_prints_artifact() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_test_config(
        temp.path(),
        r#"cat > /dev/null; printf '```python\nprintf deck > "$DECKGEN_OUTPUT"\n```\n'"#,
    );

    let output = deckgen(temp.path(), &["generate", "--session", "7", "Tides"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"completed\": true"));
    let deck = artifact_path(temp.path(), &stdout);
    assert!(deck.starts_with(temp.path().join(".deckgen/session-7")));
    assert_eq!(fs::read_to_string(deck).expect("deck"), "deck");
}

#[test]
fn repeated_generate_runs_keep_earlier_decks() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_test_config(
        temp.path(),
        r#"cat > /dev/null; printf '```python\nprintf deck > "$DECKGEN_OUTPUT"\n```\n'"#,
    );

    let first = deckgen(temp.path(), &["generate", "Tides"]);
    let second = deckgen(temp.path(), &["generate", "Tides"]);

    assert_eq!(first.status.code(), Some(exit_codes::OK));
    assert_eq!(second.status.code(), Some(exit_codes::OK));
    let first_deck = artifact_path(temp.path(), &String::from_utf8_lossy(&first.stdout));
    let second_deck = artifact_path(temp.path(), &String::from_utf8_lossy(&second.stdout));
    assert_ne!(first_deck, second_deck);
    assert_eq!(fs::read_to_string(&first_deck).expect("first deck"), "deck");
    assert_eq!(fs::read_to_string(&second_deck).expect("second deck"), "deck");
}

#[test]
fn generate_without_code_exits_not_completed() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_test_config(temp.path(), "cat > /dev/null; echo 'I would rather not.'");

    let output = deckgen(temp.path(), &["generate", "Tides"]);

    assert_eq!(output.status.code(), Some(exit_codes::NOT_COMPLETED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"completed\": false"));
    assert!(stdout.contains("Could not extract code block from the response."));
}

#[test]
fn generate_with_invalid_config_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("deckgen.toml"), "[model]\ncommand = []\n").expect("write");

    let output = deckgen(temp.path(), &["generate", "Tides"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("model.command"));
}
