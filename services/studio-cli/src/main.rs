//! Studio CLI
//!
//! Front end for the content-generation client:
//! 1. Manages the persisted API key pool (import, list, remove, validate)
//! 2. Runs generation requests with automatic key failover
//! 3. Ctrl-C cancels an in-flight request cooperatively

mod commands;
mod config;
mod metrics;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use key_pool::{FileStorage, KeyPool};
use provider::{GeminiProvider, GenerateRequest, Provider};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use studio_client::{ClientEvent, GenerateError, ResilientClient};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Exit code for a user-cancelled request (SIGINT convention)
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "studio")]
#[command(about = "Content studio generation client with API key failover")]
#[command(version)]
struct Cli {
    /// Path to studio.toml (overrides STUDIO_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the API key pool
    #[command(subcommand)]
    Keys(KeysCommands),
    /// Run one generation request
    Generate {
        /// Model name, e.g. gemini-2.0-flash
        #[arg(long)]
        model: String,
        /// Prompt text; read from stdin when omitted
        #[arg(long)]
        prompt: Option<String>,
        /// Generation config as a JSON object
        #[arg(long)]
        config_json: Option<String>,
        /// Print client counters to stderr after the run
        #[arg(long)]
        print_metrics: bool,
    },
}

#[derive(Subcommand)]
enum KeysCommands {
    /// Replace the pool with keys separated by commas or whitespace
    Import {
        /// File to read keys from; stdin when omitted
        file: Option<PathBuf>,
    },
    /// List keys with status; `*` marks the active key
    List,
    /// Remove one key by id
    Remove { id: String },
    /// Probe every key in order and record the results
    Validate,
    /// Flip automatic rotation on credential errors
    AutoRotate,
    /// Pool health as JSON
    Status,
}

fn init_tracing(json: bool) {
    // Logs go to stderr so stdout carries only command output
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            Ok(buf)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let source = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&source)
        .with_context(|| format!("failed to load config from {}", source.path().display()))?;
    info!(
        config = %source.path().display(),
        base_url = %config.provider.base_url,
        state_dir = %config.pool.state_dir.display(),
        "configuration loaded"
    );

    let storage = Arc::new(FileStorage::new(config.pool.state_dir.clone()));
    let pool = Arc::new(KeyPool::load(storage, config.pool_options()).await);
    let provider: Arc<dyn Provider> = Arc::new(
        GeminiProvider::new(
            reqwest::Client::new(),
            config.provider.base_url.clone(),
            config.timeout(),
        )
        .with_probe_model(config.provider.probe_model.clone()),
    );

    match cli.command {
        Commands::Keys(cmd) => run_keys(cmd, &pool, provider.as_ref()).await,
        Commands::Generate {
            model,
            prompt,
            config_json,
            print_metrics,
        } => {
            let prompt = match prompt {
                Some(p) => p,
                None => read_input(None)?,
            };
            let request = commands::build_request(&model, &prompt, config_json.as_deref())?;
            run_generate(pool, provider, request, print_metrics).await
        }
    }
}

async fn run_keys(cmd: KeysCommands, pool: &KeyPool, provider: &dyn Provider) -> Result<()> {
    match cmd {
        KeysCommands::Import { file } => {
            let raw = read_input(file.as_deref())?;
            pool.replace_all(&raw).await;
            print!("{}", commands::render_import(&pool.credentials().await));
        }
        KeysCommands::List => {
            print!(
                "{}",
                commands::render_key_list(&pool.credentials().await, pool.active_index().await)
            );
            let auto = if pool.auto_rotate_enabled().await { "on" } else { "off" };
            println!("auto-rotate: {auto}");
        }
        KeysCommands::Remove { id } => {
            pool.remove(&id).await.context("failed to remove key")?;
            println!("removed {id}; {} key(s) left", pool.len().await);
        }
        KeysCommands::Validate => {
            let summary = pool
                .validate_all(provider)
                .await
                .context("validation failed")?;
            println!(
                "validated: {} active, {} errored, {} skipped",
                summary.active, summary.errored, summary.skipped
            );
            print!(
                "{}",
                commands::render_key_list(&pool.credentials().await, pool.active_index().await)
            );
        }
        KeysCommands::AutoRotate => {
            let enabled = pool.toggle_auto_rotate().await;
            println!("auto-rotate: {}", if enabled { "on" } else { "off" });
        }
        KeysCommands::Status => {
            println!("{}", serde_json::to_string_pretty(&pool.health().await)?);
        }
    }
    Ok(())
}

async fn run_generate(
    pool: Arc<KeyPool>,
    provider: Arc<dyn Provider>,
    request: GenerateRequest,
    print_metrics: bool,
) -> Result<()> {
    let prometheus = if print_metrics {
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    let client = Arc::new(ResilientClient::new(pool, provider));

    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let ClientEvent::Rotated { from, to } = event {
                warn!(from = %from, to = %to, "switched to next API key");
            }
        }
    });

    let mut call = {
        let client = client.clone();
        tokio::spawn(async move { client.generate(&request).await })
    };

    let result = tokio::select! {
        joined = &mut call => joined.context("generate task failed")?,
        _ = tokio::signal::ctrl_c() => {
            client.cancel();
            eprintln!("cancelling; waiting for the in-flight attempt to settle");
            call.await.context("generate task failed")?
        }
    };

    if let Some(handle) = prometheus {
        eprint!("{}", handle.render());
    }

    match result {
        Ok(response) => {
            print!("{}", commands::render_response(&response));
            Ok(())
        }
        Err(GenerateError::Cancelled) => {
            eprintln!("{}", GenerateError::Cancelled);
            std::process::exit(EXIT_CANCELLED);
        }
        Err(e) => Err(e.into()),
    }
}
