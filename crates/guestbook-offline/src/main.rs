//! Guestbook offline harness
//!
//! `run` registers the offline cache worker against a guestbook origin,
//! replays a list of page requests through it and prints a JSON report of
//! what was served from cache and what went to the network. `serve` hosts a
//! minimal origin (page shell plus static assets) to run it against.

mod origin;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use guestbook_common::{init_logging, LogConfig, LogFormat, NetworkConfig, WorkerConfig};
use guestbook_sw::{
    register_service_worker, CacheStorage, HttpNetwork, MemoryCacheStorage, Request,
    ServiceWorkerEvent, WorkerRuntime,
};
use serde_json::json;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "guestbook-offline")]
#[command(about = "Drive the guestbook offline cache against a live origin")]
struct Cli {
    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register the worker, replay request paths and print a JSON report
    Run {
        /// Worker configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Origin to register against
        #[arg(long)]
        origin: Option<String>,

        /// Keep the install bucket when the worker activates
        #[arg(long = "activate-keep-install")]
        keep_install_cache: bool,

        /// Request paths to replay (defaults to the declared asset list)
        paths: Vec<String>,
    },

    /// Serve the page shell and a static asset directory
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,

        /// Directory served under /static
        #[arg(long, default_value = "static")]
        static_dir: PathBuf,
    },
}

/// Loaded from `--config`. Worker fields sit at the top level, network
/// settings under `network`.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HarnessConfig {
    #[serde(flatten)]
    worker: WorkerConfig,
    network: NetworkConfig,
}

impl HarnessConfig {
    fn load(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = match cli.verbose {
        0 => LogConfig::default(),
        1 => LogConfig::debug(),
        _ => LogConfig::trace(),
    };
    init_logging(log_config.with_format(cli.log_format));

    match cli.command {
        Commands::Run {
            config,
            origin,
            keep_install_cache,
            paths,
        } => run(config, origin, keep_install_cache, paths).await,
        Commands::Serve { addr, static_dir } => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            origin::serve(listener, static_dir).await?;
            Ok(())
        }
    }
}

async fn run(
    config_path: Option<PathBuf>,
    origin_override: Option<String>,
    keep_install_cache: bool,
    paths: Vec<String>,
) -> anyhow::Result<()> {
    let HarnessConfig {
        worker: mut config,
        network: network_config,
    } = HarnessConfig::load(config_path.as_ref())?;
    if let Some(origin) = origin_override {
        config.origin = origin;
    }
    if keep_install_cache {
        config.preserve_install_cache = true;
    }
    config.validate()?;

    let origin = config.origin_url()?;
    let script_path = config.script_path.clone();
    let paths = if paths.is_empty() {
        config.declared_urls.clone()
    } else {
        paths
    };

    let storage = Arc::new(MemoryCacheStorage::new());
    let network = Arc::new(HttpNetwork::new(&network_config)?);
    let (runtime, mut events) = WorkerRuntime::new(config, Arc::clone(&storage), network)?;

    let event_log = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(event) = events.recv().await {
            match event {
                ServiceWorkerEvent::StateChange { worker_id, new_state } => {
                    debug!(worker = %worker_id, state = %new_state, "statechange");
                }
                other => debug!(event = ?other, "lifecycle event"),
            }
            count += 1;
        }
        count
    });

    info!(origin = %origin, "Registering offline cache");
    let registration = register_service_worker(&runtime, &script_path).await;

    let mut fetches = Vec::with_capacity(paths.len());
    for path in &paths {
        let url = origin
            .join(path)
            .with_context(|| format!("bad request path {path}"))?;
        let entry = match runtime.handle_fetch(&Request::get(url)).await {
            Ok(response) => json!({
                "path": path,
                "status": response.status.as_u16(),
                "from_cache": response.from_cache,
                "bytes": response.body.len(),
            }),
            Err(e) => json!({
                "path": path,
                "error": e.to_string(),
            }),
        };
        fetches.push(entry);
    }

    let mut caches = serde_json::Map::new();
    for name in storage.keys().await {
        let count = storage.entry_count(&name).await.unwrap_or(0);
        caches.insert(name, json!(count));
    }

    let report = json!({
        "origin": origin.as_str(),
        "registered": registration.is_some(),
        "scope": registration.as_ref().map(|r| r.scope.to_string()),
        "active_state": runtime.active_state().await.map(|s| s.as_str()),
        "caches": caches,
        "fetches": fetches,
    });

    drop(runtime);
    let event_count = event_log.await.unwrap_or(0);
    debug!(events = event_count, "Lifecycle events observed");

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
