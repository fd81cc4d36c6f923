//! Deck generator CLI.
//!
//! `deckgen generate` runs one supervised request and prints its outcome;
//! `deckgen chat` keeps sessions alive across lines so follow-up answers land
//! in the same transcript.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use deckgen::agents::repairer::ModelRepairer;
use deckgen::agents::supervisor::{ModelSupervisor, PolicySupervisor, Supervisor};
use deckgen::agents::synthesizer::ModelSynthesizer;
use deckgen::core::types::SessionId;
use deckgen::exit_codes;
use deckgen::io::completion::CommandCompleter;
use deckgen::io::config::{
    DEFAULT_CONFIG_FILE, DeckgenConfig, SupervisorKind, load_config, write_config,
};
use deckgen::io::prompt::{PromptBuilder, load_style_context};
use deckgen::io::sandbox::InterpreterSandbox;
use deckgen::logging;
use deckgen::orchestrator::{Orchestrator, OrchestratorConfig, Reply};

type CliOrchestrator = Orchestrator<
    ModelSynthesizer<Arc<CommandCompleter>>,
    ModelRepairer<Arc<CommandCompleter>>,
    InterpreterSandbox,
    Box<dyn Supervisor>,
>;

#[derive(Parser)]
#[command(
    name = "deckgen",
    version,
    about = "Generate PowerPoint decks with a supervised write/run/repair loop"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Generate one deck and print the outcome as JSON.
    Generate {
        #[arg(long, default_value = "cli")]
        session: String,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Topic and details, e.g. `Rust ownership, 6 slides`.
        #[arg(required = true, num_args = 1..)]
        topic: Vec<String>,
    },
    /// Interactive session; `/history` prints the transcript, `/quit` exits.
    Chat {
        #[arg(long, default_value = "cli")]
        session: String,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Generate {
            session,
            config,
            topic,
        } => cmd_generate(&config, SessionId::new(session), &topic.join(" ")),
        Command::Chat { session, config } => cmd_chat(&config, SessionId::new(session)),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &DeckgenConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_generate(config: &Path, session: SessionId, topic: &str) -> Result<i32> {
    let orchestrator = build_orchestrator(&load_config(config)?)?;
    let reply = orchestrator.handle_request(session, topic)?;
    print_json(&reply.outcome)?;
    if let Some(artifact) = &reply.artifact {
        println!("artifact: {}", artifact.path.display());
    }
    Ok(if reply.outcome.completed {
        exit_codes::OK
    } else {
        exit_codes::NOT_COMPLETED
    })
}

fn cmd_chat(config: &Path, session: SessionId) -> Result<i32> {
    let orchestrator = build_orchestrator(&load_config(config)?)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ").context("write prompt")?;
        stdout.flush().context("flush prompt")?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("read input")? == 0 {
            break;
        }
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/history" => print_json(&orchestrator.get_history(&session))?,
            input => match orchestrator.handle_request(session.clone(), input) {
                Ok(reply) => print_reply(&reply),
                Err(err) => eprintln!("error: {:#}", err),
            },
        }
    }
    Ok(exit_codes::OK)
}

fn build_orchestrator(cfg: &DeckgenConfig) -> Result<CliOrchestrator> {
    let completer = Arc::new(CommandCompleter::from_config(&cfg.model));
    let context = load_style_context(cfg.prompt.context_doc.as_deref())?;
    let code_prompts = PromptBuilder::new(cfg.prompt.budget_bytes).with_context(context);
    let supervisor: Box<dyn Supervisor> = match cfg.supervisor.kind {
        SupervisorKind::Policy => Box::new(PolicySupervisor),
        SupervisorKind::Model => Box::new(ModelSupervisor::new(
            Arc::clone(&completer),
            PromptBuilder::new(cfg.prompt.budget_bytes),
        )?),
    };
    Orchestrator::new(
        ModelSynthesizer::new(Arc::clone(&completer), code_prompts.clone()),
        ModelRepairer::new(completer, code_prompts),
        InterpreterSandbox::from_config(&cfg.sandbox),
        supervisor,
        OrchestratorConfig::from_config(cfg),
    )
}

fn print_reply(reply: &Reply) {
    println!("{}", reply.outcome.content);
    if let Some(artifact) = &reply.artifact {
        println!("deck saved to {}", artifact.path.display());
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
