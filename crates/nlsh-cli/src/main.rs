//! nlsh - natural-language shell
//!
//! Usage:
//!   nlsh "find large log files"     Generate, confirm and run commands
//!   nlsh "? what does umask do"     Ask a question
//!   nlsh "!ls -la"                  Run a command directly
//!   nlsh                            Interactive session
//!
//! In the interactive session plain lines run as shell commands, lines
//! starting with `:` or `llm:` ask for commands, and `?` or `llm?` chat.

mod display;
mod process;
mod provider;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use nlsh::history::{HistoryStore, render_events, render_stats};
use nlsh::policy::{ConfirmationGate, PromptReply, TerminalInput, default_risk_policy};
use nlsh::{Session, SessionConfig, SessionError, ShellExecutor};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::display::TerminalObserver;
use crate::provider::{ProviderPolicy, build_collaborator};

#[derive(Parser, Debug)]
#[command(name = "nlsh")]
#[command(about = "Turn plain-language requests into confirmed shell commands")]
struct Args {
    /// Request to handle once; starts an interactive session when empty
    prompt: Vec<String>,

    /// Stream command output while it runs
    #[arg(short, long)]
    live: bool,

    /// History database
    #[arg(long, env = "NLSH_HISTORY_DB")]
    history: Option<PathBuf>,

    /// Configuration file
    #[arg(long, env = "NLSH_CONFIG")]
    config: Option<PathBuf>,

    /// Command that answers model requests on stdin/stdout
    #[arg(long, env = "NLSH_MODEL_COMMAND")]
    model_command: Option<String>,

    /// Print history statistics and exit
    #[arg(long)]
    stats: bool,

    /// Print the N most recent history events and exit
    #[arg(long, value_name = "N")]
    recent: Option<usize>,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,
}

/// What a line of input asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent<'a> {
    Chat(&'a str),
    Command(&'a str),
    Manual(&'a str),
}

/// Classify input by its prefix. Unprefixed input falls back to `default`.
fn classify<'a>(line: &'a str, default: fn(&'a str) -> Intent<'a>) -> Intent<'a> {
    let line = line.trim();
    for prefix in ["llm?", "?"] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return Intent::Chat(rest.trim());
        }
    }
    for prefix in ["llm:", ":"] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return Intent::Command(rest.trim());
        }
    }
    if let Some(rest) = line.strip_prefix('!') {
        return Intent::Manual(rest.trim());
    }
    default(line)
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("nlsh: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(nlsh::config::default_config_path);
    let mut config = SessionConfig::load(&config_path)?;
    if args.live {
        config.live_output = true;
    }

    let history_path = args
        .history
        .clone()
        .unwrap_or_else(nlsh::config::default_history_path);
    let history = match HistoryStore::open(&history_path) {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!(error = %e, path = %history_path.display(), "history disabled");
            None
        }
    };

    if args.stats || args.recent.is_some() {
        let Some(store) = &history else {
            anyhow::bail!("history database {} is unavailable", history_path.display());
        };
        if args.stats {
            println!("{}", render_stats(&store.stats().await?));
        }
        if let Some(limit) = args.recent {
            let events = store.recent(limit).await?;
            if events.is_empty() {
                println!("No history yet.");
            } else {
                println!("{}", render_events(&events));
            }
        }
        return Ok(0);
    }

    let executor = Arc::new(ShellExecutor::detect().await);
    tracing::debug!(
        shell = %executor.shell().name,
        cwd = %executor.working_directory().display(),
        "starting session"
    );
    let gate = ConfirmationGate::new(
        Arc::new(default_risk_policy(&config.extra_risk_patterns)),
        TerminalInput::new(),
    );
    let model = build_collaborator(
        &ProviderPolicy::default(),
        |var| std::env::var(var).ok(),
        args.model_command.as_deref(),
    );

    let mut builder = Session::builder(executor, gate, model)
        .observer(Arc::new(TerminalObserver::new(config.live_output)))
        .config(config);
    if let Some(store) = history {
        builder = builder.history(store);
    }
    let session = builder.build();

    if args.prompt.is_empty() {
        repl(&session).await;
        return Ok(0);
    }
    let prompt = args.prompt.join(" ");
    Ok(handle(&session, classify(&prompt, Intent::Command)).await)
}

/// Handle one request and return its exit code.
async fn handle(session: &Session, intent: Intent<'_>) -> i32 {
    let outcome = match intent {
        Intent::Chat(prompt) => session.chat(prompt).await.map(|turn| {
            println!("{}", turn.response);
            0
        }),
        Intent::Command(prompt) => session.command(prompt).await.map(|turn| turn.exit_code()),
        Intent::Manual(command) => session.run_manual(command).await.map(|r| r.exit_code),
    };
    match outcome {
        Ok(code) => code,
        Err(SessionError::ConfirmationAborted) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    }
}

async fn repl(session: &Session) {
    loop {
        let prompt = format!("nlsh:{}$ ", session.executor().working_directory().display());
        let line = match session.read_line(&prompt).await {
            PromptReply::Line(line) => line,
            PromptReply::Interrupted => {
                eprintln!();
                continue;
            }
            PromptReply::Closed => break,
        };
        let line = line.trim();
        match line {
            "" => continue,
            "exit" | "quit" => break,
            "history" => {
                let events = session.recent(20).await;
                if !events.is_empty() {
                    println!("{}", render_events(&events));
                }
                continue;
            }
            "stats" => {
                if let Some(stats) = session.stats().await {
                    println!("{}", render_stats(&stats));
                }
                continue;
            }
            _ => {}
        }

        let intent = classify(line, Intent::Manual);
        if let Intent::Chat("") | Intent::Command("") | Intent::Manual("") = intent {
            continue;
        }
        let outcome = match intent {
            Intent::Manual(command) => session.run_manual(command).await.map(drop),
            Intent::Chat(prompt) => session.chat(prompt).await.map(|turn| {
                println!("{}", turn.response);
            }),
            Intent::Command(prompt) => session.command(prompt).await.map(drop),
        };
        match outcome {
            Ok(()) => {}
            Err(SessionError::ConfirmationAborted) => break,
            Err(e) => eprintln!("Error: {e}"),
        }
    }
}
