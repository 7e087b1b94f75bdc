//! Command-line host for Quasar extensions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quasar_core::{ExtensionHub, HostConfig};

/// Quasar - inspect, poll and watch extension data sources.
#[derive(Parser, Debug)]
#[command(name = "quasar")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (defaults to ./quasar.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Show an extension's metadata and data sources.
    Inspect {
        /// Path to the extension library.
        #[arg(required = true)]
        path: PathBuf,
    },
    /// Poll one or more data sources once.
    Poll {
        /// Path to the extension library.
        #[arg(required = true)]
        path: PathBuf,
        /// Data sources to poll.
        #[arg(required = true)]
        sources: Vec<String>,
        /// Argument string passed to the extension.
        #[arg(short, long)]
        args: Option<String>,
    },
    /// Subscribe to a push source and print what arrives.
    Watch {
        /// Path to the extension library.
        #[arg(required = true)]
        path: PathBuf,
        /// Data source to subscribe to.
        #[arg(required = true)]
        source: String,
        /// Stop after this many seconds.
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose);

    let config = HostConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let hub = ExtensionHub::new(config);

    match args.command {
        Command::Inspect { path } => inspect(&hub, &path),
        Command::Poll {
            path,
            sources,
            args,
        } => poll(&hub, &path, &sources, args.as_deref()),
        Command::Watch {
            path,
            source,
            seconds,
        } => watch(&hub, &path, &source, Duration::from_secs(seconds)).await,
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var("QUASAR_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "quasar=debug" } else { "quasar=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load(hub: &ExtensionHub, path: &Path) -> Result<String> {
    hub.load_extension(path)
        .with_context(|| format!("Failed to load extension {}", path.display()))
}

fn inspect(hub: &ExtensionHub, path: &Path) -> Result<()> {
    let name = load(hub, path)?;
    let extension = hub
        .extension(&name)
        .with_context(|| format!("Extension {} vanished after loading", name))?;

    let report = serde_json::json!({
        "info": extension.info(),
        "state": extension.state(),
        "sources": extension.sources(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn poll(hub: &ExtensionHub, path: &Path, sources: &[String], args: Option<&str>) -> Result<()> {
    let name = load(hub, path)?;
    let (client, _inbound) = hub.register_client();

    let reply = hub.query(client, &name, sources, args);
    let parsed: serde_json::Value = serde_json::from_str(&reply)?;
    println!("{}", serde_json::to_string_pretty(&parsed)?);

    hub.revoke_client(client);
    Ok(())
}

async fn watch(hub: &ExtensionHub, path: &Path, source: &str, duration: Duration) -> Result<()> {
    let name = load(hub, path)?;
    let (client, mut inbound) = hub.register_client();

    let topic = format!("{}/{}", name, source);
    if !hub.subscribe(client, &topic) {
        hub.revoke_client(client);
        anyhow::bail!("Cannot subscribe to {}: unknown or poll-only source", topic);
    }

    tracing::info!(topic = %topic, seconds = duration.as_secs(), "Watching");

    let deadline = tokio::time::Instant::now() + duration;
    let mut received = 0usize;
    loop {
        match tokio::time::timeout_at(deadline, inbound.recv()).await {
            Ok(Some(message)) => {
                received += 1;
                println!("{}", message);
            }
            Ok(None) | Err(_) => break,
        }
    }

    hub.revoke_client(client);
    tracing::info!(topic = %topic, received, "Watch finished");
    Ok(())
}
