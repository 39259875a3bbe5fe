//! Player CLI - run or validate a flow document

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use player::{EventEmitter, EventLog, FixSuggestion, Flow, Player, PlayerConfig, PlayerError};

/// `transition:NAME` or `set:PATH=JSON`
static STEP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(transition|set):(.+)$").expect("valid regex"));

#[derive(Parser)]
#[command(name = "player")]
#[command(about = "Player - run declarative flows with live views")]
#[command(version)]
struct Cli {
    /// TOML config file (env vars PLAYER_LOG / PLAYER_OPTIMIZE_UPDATES override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow, applying scripted steps whenever it waits
    Run {
        /// Path to a .json / .yaml flow document
        file: PathBuf,

        /// `transition:NAME` or `set:PATH=JSON`, applied in order
        #[arg(short, long = "step")]
        steps: Vec<String>,

        /// Print the event log as JSON once the run ends
        #[arg(long)]
        events: bool,
    },

    /// Check a flow document's structure without running it
    Validate {
        /// Path to a .json / .yaml flow document
        file: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Transition(String),
    Set { path: String, value: Value },
}

impl Step {
    fn parse(src: &str) -> Result<Self> {
        let Some(caps) = STEP_RE.captures(src.trim()) else {
            bail!("invalid step '{src}': expected transition:NAME or set:PATH=JSON");
        };
        let body = &caps[2];
        match &caps[1] {
            "transition" => Ok(Step::Transition(body.to_string())),
            _ => {
                let (path, raw) = body
                    .split_once('=')
                    .with_context(|| format!("invalid step '{src}': set needs PATH=JSON"))?;
                // Bare words are taken as strings
                let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
                Ok(Step::Set {
                    path: path.trim().to_string(),
                    value,
                })
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => exit_with(e),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run {
            file,
            steps,
            events,
        } => run_flow(&file, &steps, events, config),
        Commands::Validate { file } => validate_flow(&file),
    };

    if let Err(e) = result {
        exit_with(e);
    }
}

fn exit_with(e: anyhow::Error) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), e);
    if let Some(suggestion) = e.downcast_ref::<PlayerError>().and_then(|e| e.fix_suggestion()) {
        eprintln!("  {} {}", "Fix:".yellow(), suggestion);
    }
    std::process::exit(1);
}

fn load_config(path: Option<&Path>) -> Result<PlayerConfig> {
    let config = match path {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };
    Ok(config.with_env()?)
}

fn load_flow(file: &Path) -> Result<Flow> {
    let src = std::fs::read_to_string(file)
        .with_context(|| format!("unable to read {}", file.display()))?;
    let flow = match file.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => Flow::from_yaml(&src)?,
        _ => Flow::from_json(&src)?,
    };
    Ok(flow)
}

fn run_flow(file: &Path, steps: &[String], print_events: bool, config: PlayerConfig) -> Result<()> {
    let flow = load_flow(file)?;
    let steps = steps.iter().map(|s| Step::parse(s)).collect::<Result<Vec<_>>>()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("unable to start the async runtime")?;
    let _guard = runtime.enter();

    let log = EventLog::new();
    let player = Player::with_emitter(config, Vec::new(), Arc::new(log.clone()));
    player.hooks.view.tap("cli", |view| {
        let id = view.id.clone();
        view.hooks.on_update.tap("cli", move |tree| {
            println!("{} {}", "view".cyan().bold(), id.cyan());
            println!("{}", serde_json::to_string_pretty(tree).unwrap_or_default());
        });
    });

    println!("{} Running flow '{}'", "→".cyan(), flow.id.cyan().bold());

    let mut run = player.start(flow);
    let mut pending = steps.into_iter();
    let result = loop {
        if let Some(result) = (&mut run).now_or_never() {
            break result;
        }
        player.flush();
        let Some(step) = pending.next() else {
            break Err(PlayerError::External {
                message: "flow is still waiting for input after the last step".to_string(),
            });
        };
        tracing::debug!(?step, "applying step");
        match step {
            Step::Transition(name) => {
                println!("{} transition {}", "→".cyan(), name.bold());
                player.transition(&name)?;
            }
            Step::Set { path, value } => {
                println!("{} set {} = {}", "→".cyan(), path.bold(), value);
                player.set_data(&path, value)?;
            }
        }
        player.flush();
    };
    drop(run);

    let outcome = match result {
        Ok(completed) => {
            println!(
                "{} Flow '{}' completed: {}",
                "✓".green(),
                completed.flow_id,
                completed.end_state.outcome.green().bold()
            );
            println!("{}", serde_json::to_string_pretty(&completed.data)?);
            Ok(())
        }
        Err(err) => Err(err.into()),
    };

    if print_events {
        println!("{}", serde_json::to_string_pretty(&log.snapshot())?);
    }
    outcome
}

fn validate_flow(file: &Path) -> Result<()> {
    let flow = load_flow(file)?;
    let report = flow.validate();
    if !report.is_ok() {
        eprint!("{report}");
        bail!(
            "flow '{}' has {} issue(s)",
            flow.id,
            report.issues.len()
        );
    }

    println!("{} Flow '{}' is valid", "✓".green(), flow.id);
    println!("  Flows: {}", flow.navigation.flows.len());
    println!("  Views: {}", flow.views.len());
    Ok(())
}
