//! `quill` - writing feedback and story chat from the terminal.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use quill_core::{Backend, PromptKind};
use quill_runtime::adapters::{DefaultModelLoader, ModelLoader};
use quill_runtime::config::ChatClientKind;
use quill_runtime::providers::{LlmProvider, OpenAiCompatibleProvider};
use quill_runtime::{
    client_from_config, BackendManager, Config, ConversationContext, INIT_FAILURE_MESSAGE,
};

/// Quill - writing feedback and storytelling help for young writers.
#[derive(Parser)]
#[command(name = "quill")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log detail (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a YAML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Get feedback on a piece of writing.
    Feedback {
        /// Text to review, or `-` to read stdin.
        text: String,

        /// Backend to use instead of the configured one.
        #[arg(short, long)]
        backend: Option<Backend>,

        /// Kind of help to ask for.
        #[arg(short, long, value_enum, default_value = "feedback")]
        prompt: PromptArg,

        /// System prompt for `--prompt custom`.
        #[arg(long)]
        system: Option<String>,

        /// Wait for the whole reply instead of streaming it.
        #[arg(long)]
        buffered: bool,
    },

    /// Build a story with the storytelling companion.
    Chat {
        /// Conversation service (groq or sugar-ai).
        #[arg(long)]
        client: Option<ChatClientKind>,

        /// Start without the opening greeting.
        #[arg(long)]
        no_greeting: bool,
    },

    /// Validate configuration and report backend readiness.
    Check,

    /// Print the effective configuration as YAML.
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum PromptArg {
    Feedback,
    Autocomplete,
    Custom,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Feedback {
            text,
            backend,
            prompt,
            system,
            buffered,
        } => feedback(config, &text, backend, prompt_kind(prompt, system)?, buffered).await,
        Commands::Chat {
            client,
            no_greeting,
        } => chat(config, client, no_greeting).await,
        Commands::Check => check(&config).await,
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn prompt_kind(prompt: PromptArg, system: Option<String>) -> Result<PromptKind> {
    Ok(match prompt {
        PromptArg::Feedback => PromptKind::Feedback,
        PromptArg::Autocomplete => PromptKind::Autocomplete,
        PromptArg::Custom => match system {
            Some(s) => PromptKind::Custom(s),
            None => bail!("--prompt custom needs --system"),
        },
    })
}

async fn feedback(
    config: Config,
    text: &str,
    backend: Option<Backend>,
    prompt: PromptKind,
    buffered: bool,
) -> Result<ExitCode> {
    let text = if text == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("Failed to read stdin")?;
        buf
    } else {
        text.to_string()
    };

    let manager = BackendManager::new(config);
    if let Some(b) = backend {
        if !manager.initialize(Some(b)) {
            println!("{}", INIT_FAILURE_MESSAGE);
            return Ok(ExitCode::FAILURE);
        }
    }

    if buffered {
        let chunks = manager.get_feedback_as_list(&text, prompt).await;
        println!("{}", chunks.concat());
    } else {
        let mut stdout = std::io::stdout();
        let mut chunks = manager.get_feedback(&text, prompt);
        while let Some(chunk) = chunks.next().await {
            write!(stdout, "{}", chunk)?;
            stdout.flush()?;
        }
        writeln!(stdout)?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn chat(
    mut config: Config,
    client: Option<ChatClientKind>,
    no_greeting: bool,
) -> Result<ExitCode> {
    if let Some(kind) = client {
        config.chat.client = kind;
    }
    let client = client_from_config(&config).context("Failed to create chat client")?;

    let mut ctx = if no_greeting {
        ConversationContext::new(client)
    } else {
        ConversationContext::with_greeting(client)
    };
    if let Some(greeting) = ctx.messages().first() {
        println!("{}", greeting.content);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/story" => {
                ctx.update_story_info().await;
                println!("{}", serde_json::to_string_pretty(ctx.story_info())?);
            }
            input => {
                let reply = ctx.respond(input).await;
                println!("{}", reply);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn check(config: &Config) -> Result<ExitCode> {
    println!("{:<8} {:<10} {:<14} STATUS", "BACKEND", "SELECTED", "CREDENTIAL");
    let mut selected_problem = None;

    for backend in Backend::ALL {
        let selected = if backend == config.backend { "*" } else { "" };
        let credential = match (backend.requires_credential(), config.get_credential(backend)) {
            (false, _) => "not needed".to_string(),
            (true, Some(c)) => c.source().to_string(),
            (true, None) => "missing".to_string(),
        };

        let readiness = readiness(config, backend).await;
        let status = match &readiness {
            Ok(()) => "ok".to_string(),
            Err(reason) => reason.clone(),
        };
        println!("{:<8} {:<10} {:<14} {}", backend.as_str(), selected, credential, status);

        if let (true, Err(reason)) = (backend == config.backend, readiness) {
            selected_problem = Some(reason);
        }
    }

    match selected_problem {
        None => Ok(ExitCode::SUCCESS),
        Some(reason) => {
            eprintln!("Selected backend '{}' is not usable: {}", config.backend, reason);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Whether `backend` could serve a request, or why not.
async fn readiness(config: &Config, backend: Backend) -> Result<(), String> {
    config.validate_for(backend).map_err(|e| e.to_string())?;

    if backend == Backend::Local {
        return DefaultModelLoader
            .check(&config.local)
            .map_err(|e| e.to_string());
    }
    match hosted_health(config, backend).await {
        Some(false) => Err("unhealthy".to_string()),
        _ => Ok(()),
    }
}

/// Provider health for a hosted backend; `None` for local.
async fn hosted_health(config: &Config, backend: Backend) -> Option<bool> {
    let hosted = config.hosted(backend)?;
    let credential = config.get_credential(backend)?.clone();
    match OpenAiCompatibleProvider::new(backend.as_str(), credential, &hosted.base_url) {
        Ok(provider) => Some(provider.health_check().await),
        Err(e) => {
            tracing::warn!(backend = %backend, error = %e, "Could not build provider");
            Some(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_readiness_reports_unloadable_model() {
        let mut config = Config::default();
        config.local.model_path = Some(PathBuf::from("/nonexistent/quill/model.gguf"));

        let reason = readiness(&config, Backend::Local).await.unwrap_err();
        assert!(!reason.is_empty());
    }

    #[tokio::test]
    async fn test_hosted_readiness_needs_credential() {
        let reason = readiness(&Config::default(), Backend::Groq).await.unwrap_err();
        assert!(reason.contains("GROQ_API_KEY"), "{}", reason);
    }
}
