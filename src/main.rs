//! Recall CLI
//!
//! Line-oriented chat with short-term and long-term memory.

use clap::Parser;
use recall::config::{apply_env, default_config_path, ConfigToml};
use recall::{ChatClient, MemoryMode, RecallConfig, Session, TurnOutcome};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Recall - a personal assistant that remembers you
#[derive(Parser, Debug)]
#[command(name = "recall")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.recall/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Chat model
    #[arg(short, long)]
    model: Option<String>,

    /// Model for memory extraction (defaults to the chat model)
    #[arg(long)]
    extractor_model: Option<String>,

    /// Model provider id (ollama, ollama-chat, lmstudio, openai, or one from config)
    #[arg(long)]
    provider: Option<String>,

    /// Path to the long-term memory file
    #[arg(long)]
    memory_file: Option<PathBuf>,

    /// Short-term window size in messages
    #[arg(long)]
    max_turns: Option<usize>,

    /// Extract long-term memory every N user turns
    #[arg(long)]
    extract_every: Option<usize>,

    /// Which memory tiers to use
    #[arg(long, value_enum)]
    mode: Option<MemoryMode>,

    /// Show extraction diagnostics in the chat
    #[arg(long)]
    debug_memory: bool,

    /// Verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&cli).await?;
    info!("Memory file: {:?}", config.memory_file);

    let client = ChatClient::new(config.provider.clone(), config.request_timeout)?;
    let mode = config.mode;
    let mut session = Session::new(client, config).await?;

    print_banner(mode);
    run_loop(&mut session).await
}

/// Defaults → config file → environment → flags
async fn build_config(cli: &Cli) -> anyhow::Result<RecallConfig> {
    let cwd = std::env::current_dir()?;

    let file = match &cli.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            ConfigToml::load(path).await?
        }
        None => match default_config_path() {
            Some(path) => ConfigToml::load(&path).await?,
            None => None,
        },
    };
    let mut file = file.unwrap_or_default();
    if let Some(provider) = &cli.provider {
        file.model_provider = Some(provider.clone());
    }

    let mut config = apply_env(file.apply(RecallConfig::new(cwd.clone()), &cwd)?);

    if let Some(model) = &cli.model {
        config = config.with_model(model.clone());
    }
    if let Some(model) = &cli.extractor_model {
        config = config.with_extractor_model(model.clone());
    }
    if let Some(path) = &cli.memory_file {
        config = config.with_memory_file(cwd.join(path));
    }
    if let Some(n) = cli.max_turns {
        config = config.with_max_turns(n);
    }
    if let Some(n) = cli.extract_every {
        config = config.with_extract_every(n);
    }
    if let Some(mode) = cli.mode {
        config = config.with_mode(mode);
    }
    if cli.debug_memory {
        config = config.with_debug_memory(true);
    }

    config.validate()?;
    Ok(config)
}

fn print_banner(mode: MemoryMode) {
    let title = match mode {
        MemoryMode::Stateless => "Basic chat (no memory)",
        MemoryMode::ShortTerm => "Chat with short-term memory",
        MemoryMode::LongTerm => "Chat with short + long-term memory (auto-save)",
    };
    println!("{title}");
    println!("Type 'exit' to quit.");
    if mode == MemoryMode::LongTerm {
        println!("Type '/memory' to view saved memory.");
    }
    println!();
}

async fn run_loop(session: &mut Session<ChatClient>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        // End of input ends the session like `exit`
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        match session.handle_input(&line).await {
            TurnOutcome::Exit => break,
            TurnOutcome::Ignored => {}
            TurnOutcome::Memory(rendered) => {
                println!("\nLong-term memory:\n{rendered}\n");
            }
            TurnOutcome::Reply {
                text,
                saved,
                notices,
            } => {
                println!("\nAssistant: {text}\n");
                if !saved.is_empty() {
                    println!("Auto-saved memory:");
                    for fact in &saved {
                        println!("  - {}: {}", fact.key, fact.value);
                    }
                    println!();
                }
                for notice in &notices {
                    println!("{notice}\n");
                }
            }
            TurnOutcome::Failed { error, hints } => {
                println!("\nError talking to the model: {error}");
                for hint in hints {
                    println!("Fix: {hint}");
                }
                println!();
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}
