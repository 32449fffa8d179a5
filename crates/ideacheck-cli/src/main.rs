use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ideacheck_engine::config::normalize_api_base;
use ideacheck_engine::{handle_refine_body, Reconciler, RefineConfig};
use tracing_subscriber::EnvFilter;

mod serve;

#[derive(Debug, Parser)]
#[command(name = "ideacheck", version, about = "Refine idea-validation cards against an LLM")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve POST /api/refine over HTTP.
    Serve(ServeArgs),
    /// Run one revision from a request file (or stdin) and print the reply.
    Refine(RefineArgs),
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long, env = "IDEACHECK_ADDR", default_value = "127.0.0.1:8787")]
    addr: String,
    #[arg(long, env = "IDEACHECK_WORKERS", default_value_t = 4)]
    workers: usize,
    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[derive(Debug, Parser)]
struct RefineArgs {
    /// JSON request body; read from stdin when omitted.
    #[arg(long)]
    request: Option<PathBuf>,
    #[command(flatten)]
    overrides: ConfigOverrides,
}

/// Flag overrides applied on top of the environment.
#[derive(Debug, Default, Args)]
struct ConfigOverrides {
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    timeout_ms: Option<u64>,
    #[arg(long)]
    deadline_ms: Option<u64>,
    #[arg(long)]
    events: Option<PathBuf>,
}

impl ConfigOverrides {
    fn apply(self, mut config: RefineConfig) -> RefineConfig {
        if let Some(model) = self.model.filter(|value| !value.trim().is_empty()) {
            config.model = model.trim().to_string();
        }
        if let Some(api_base) = self.api_base {
            config.api_base = normalize_api_base(Some(&api_base));
        }
        if let Some(ms) = self.timeout_ms.filter(|ms| *ms > 0) {
            config.call_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.deadline_ms.filter(|ms| *ms > 0) {
            config.deadline = Some(Duration::from_millis(ms));
        }
        if let Some(events) = self.events {
            config.events_path = Some(events);
        }
        config
    }
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("ideacheck error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let config = args.overrides.apply(RefineConfig::from_env());
            if config.api_key.is_none() {
                tracing::warn!("OPENAI_API_KEY is not set; refine requests will fail");
            }
            let reconciler = Arc::new(Reconciler::from_config(config));
            serve::serve(&args.addr, args.workers, reconciler)?;
            Ok(0)
        }
        Command::Refine(args) => run_refine(args),
    }
}

fn run_refine(args: RefineArgs) -> Result<i32> {
    let body = match &args.request {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut body = String::new();
            io::stdin()
                .read_to_string(&mut body)
                .context("failed to read request from stdin")?;
            body
        }
    };
    let reconciler = Reconciler::from_config(args.overrides.apply(RefineConfig::from_env()));
    let (status, envelope) = handle_refine_body(&reconciler, &body);
    tracing::info!(status, ok = envelope.ok, "refine done");
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(if envelope.ok { 0 } else { 1 })
}

/// `RUST_LOG` filter (default `info`), plain or JSON lines on stderr.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("IDEACHECK_LOG_JSON")
        .map(|value| value.trim() == "1")
        .unwrap_or(false);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
