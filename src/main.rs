use std::collections::HashMap;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::warn;

use ocla::cli;
use ocla::config::{self, Config};
use ocla::logs;
use ocla::session::SessionError;

#[derive(Parser, Debug)]
#[command(name = "ocla", version, about = "Coding assistant for the terminal")]
struct Cli {
    /// Start a new session instead of continuing the current one
    #[arg(short = 'n', long)]
    new_session: bool,

    /// Model name at the backend
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// DISABLED, HIDDEN or ENABLED
    #[arg(short, long, global = true)]
    thinking: Option<String>,

    /// ONESHOT or INTERACTIVE
    #[arg(short, long, global = true)]
    prompt_mode: Option<String>,

    /// DEFAULT, ALWAYS_ASK or ALWAYS_ALLOW
    #[arg(long, global = true)]
    permission_mode: Option<String>,

    /// ollama or openai
    #[arg(long, global = true)]
    provider: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,

    /// Prompt text; read from stdin when omitted
    prompt: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Show every configuration variable
    Config,
    /// Inspect models at the backend
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// List the tools the assistant can call
    Tools,
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    /// Create a session and make it current
    New {
        /// Session name (defaults to a timestamp)
        name: Option<String>,
    },
    /// List sessions, most recently used first
    List,
    /// Make an existing session current
    Set {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum ModelAction {
    /// List models available at the backend
    List,
    /// Show details of one model (defaults to the configured one)
    Info {
        name: Option<String>,
    },
}

impl Cli {
    fn overrides(&self) -> HashMap<&'static str, String> {
        [
            (config::MODEL.name, &self.model),
            (config::THINKING.name, &self.thinking),
            (config::PROMPT_MODE.name, &self.prompt_mode),
            (config::TOOL_PERMISSION_MODE.name, &self.permission_mode),
            (config::PROVIDER.name, &self.provider),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.clone().map(|v| (name, v)))
        .collect()
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = Config::load(cli.overrides())?;
    logs::init(cfg.log_level);
    for warning in cfg.warnings() {
        warn!("{warning}");
    }

    match cli.command {
        Some(Command::Session { action }) => match action {
            SessionAction::New { name } => cli::new_session(&cfg, name).await.map(|_| ()),
            SessionAction::List => cli::list_sessions(&cfg).await,
            SessionAction::Set { name } => cli::set_session(&cfg, &name).await,
        },
        Some(Command::Config) => {
            cli::show_config(&cfg);
            Ok(())
        }
        Some(Command::Model { action }) => match action {
            ModelAction::List => cli::list_models(&cfg).await,
            ModelAction::Info { name } => cli::model_info(&cfg, name.as_deref()).await,
        },
        Some(Command::Tools) => {
            cli::list_tools();
            Ok(())
        }
        None => cli::chat(&cfg, cli.new_session, &cli.prompt).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tokio::select! {
        result = run(cli) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                match e.downcast_ref::<SessionError>() {
                    Some(err @ SessionError::ContextWindowExceeded { .. }) => eprintln!("\n{err}"),
                    _ => eprintln!("error: {e:#}"),
                }
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\ninterrupted");
            // blocking prompt threads would keep the runtime alive on drop
            std::process::exit(130);
        }
    }
}
