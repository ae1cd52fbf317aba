// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as AnyhowContext, Result};
use axum::{routing::get, Router};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use zonesync::cache::{CacheMode, ZoneCache};
use zonesync::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_CLASS, DEFAULT_META_PREFIX, DEFAULT_PROCESSORS,
    DEFAULT_RATE_LIMITER_BURST, DEFAULT_RATE_LIMITER_QPS, METRICS_SERVER_BIND_ADDRESS,
    METRICS_SERVER_PATH, METRICS_SERVER_PORT, TOKIO_WORKER_THREADS,
};
use zonesync::metrics;
use zonesync::provider::build_handler;
use zonesync::resources::{Entry, HostedZonePolicy, ProviderConfig, RateLimitConfig};
use zonesync::scheduler::{
    reconcile_zone_once, EngineSettings, ProviderRuntime, Scheduler, StaticEntrySource,
};

/// Reconcile DNS zones in external providers against declarative entries.
#[derive(Debug, Parser)]
#[command(name = "zonesync", version, about)]
struct Args {
    /// Desired-state file with providers, entries and zone policies (JSON)
    #[arg(long, value_name = "FILE")]
    config: std::path::PathBuf,

    /// Ownership identity of this engine instance
    #[arg(long, default_value = "")]
    identity: String,

    /// Engine class; entries addressed to other classes are ignored
    #[arg(long, default_value = DEFAULT_CLASS)]
    class: String,

    /// META record name prefix
    #[arg(long, default_value = DEFAULT_META_PREFIX)]
    meta_prefix: String,

    /// Worker pool size
    #[arg(long, default_value_t = DEFAULT_PROCESSORS)]
    processors: usize,

    /// Default sustained provider request rate
    #[arg(long, default_value_t = DEFAULT_RATE_LIMITER_QPS)]
    ratelimiter_qps: f64,

    /// Default provider request burst
    #[arg(long, default_value_t = DEFAULT_RATE_LIMITER_BURST)]
    ratelimiter_burst: u32,

    /// Default change requests per batch (1..=50)
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Plan and log changes without writing to any provider
    #[arg(long)]
    dry_run: bool,

    /// Port for the metrics/health endpoint
    #[arg(long, default_value_t = METRICS_SERVER_PORT)]
    metrics_port: u16,
}

/// On-disk desired state consumed in place of the watch layer.
#[derive(Debug, serde::Deserialize)]
struct DesiredState {
    #[serde(default)]
    providers: Vec<ProviderConfig>,
    #[serde(default)]
    entries: Vec<Entry>,
    #[serde(default)]
    policies: Vec<HostedZonePolicy>,
}

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("zonesync")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

/// Initialize logging with custom format
///
/// Respects `RUST_LOG` environment variable if set, otherwise defaults to INFO level.
/// Respects `RUST_LOG_FORMAT` environment variable for output format (json or text).
fn initialize_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!("Starting zonesync DNS reconciliation engine");
    debug!("Logging initialized with file and line number tracking");
}

async fn serve_metrics(port: u16, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let app = Router::new()
        .route(
            METRICS_SERVER_PATH,
            get(|| async {
                metrics::gather_metrics()
                    .unwrap_or_else(|e| format!("# metrics encoding failed: {e}"))
            }),
        )
        .route("/healthz", get(|| async { "ok" }));
    let address = format!("{METRICS_SERVER_BIND_ADDRESS}:{port}");
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("cannot bind metrics server to {address}"))?;
    info!(%address, "metrics server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

/// Fill engine-level defaults into provider configs that omit them.
fn apply_defaults(args: &Args, mut config: ProviderConfig) -> ProviderConfig {
    if config.rate_limits.is_none() {
        config.rate_limits = Some(RateLimitConfig {
            enabled: true,
            qps: args.ratelimiter_qps,
            burst: args.ratelimiter_burst,
        });
    }
    if config.batch_size.is_none() {
        config.batch_size = Some(args.batch_size);
    }
    config
}

async fn async_main() -> Result<()> {
    initialize_logging();
    let args = Args::parse();

    let raw = tokio::fs::read_to_string(&args.config)
        .await
        .with_context(|| format!("cannot read desired state file {:?}", args.config))?;
    let desired: DesiredState =
        serde_json::from_str(&raw).context("cannot parse desired state file")?;
    info!(
        providers = desired.providers.len(),
        entries = desired.entries.len(),
        policies = desired.policies.len(),
        "desired state loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let metrics_shutdown = shutdown_rx.clone();
    let metrics_port = args.metrics_port;
    tokio::spawn(async move {
        if let Err(err) = serve_metrics(metrics_port, metrics_shutdown).await {
            error!(error = %err, "metrics server failed");
        }
    });

    // entries carry completion handles so terminal states are observable
    let entries: Vec<Entry> = desired
        .entries
        .into_iter()
        .map(|mut entry| {
            entry.done = Some(zonesync::resources::EntryDone::new());
            entry
        })
        .collect();
    let entry_source = StaticEntrySource::new(entries);

    let settings = EngineSettings {
        identity: args.identity.clone(),
        class: args.class.clone(),
        meta_prefix: args.meta_prefix.clone(),
        dry_run: args.dry_run,
    };

    let mut runtimes = Vec::new();
    for config in desired.providers {
        let config = apply_defaults(&args, config);
        let name = config.name.clone();
        match build_handler(&config).await {
            Ok(handler) => {
                runtimes.push(ProviderRuntime {
                    name,
                    handler,
                    cache: ZoneCache::new(CacheMode::ZoneState),
                    entries: entry_source.clone(),
                    policies: desired.policies.clone(),
                    priority: runtimes.len(),
                });
            }
            Err(err) => {
                // fatal provider errors park the provider, they never stop
                // the engine
                error!(provider = %name, error = %err, "provider failed to initialize");
            }
        }
    }
    if runtimes.is_empty() {
        anyhow::bail!("no usable provider configured");
    }

    if args.dry_run {
        for runtime in &runtimes {
            let zones = runtime
                .cache
                .get_zones(|| runtime.handler.get_zones())
                .await
                .map_err(|e| anyhow::anyhow!("zone listing failed: {e}"))?;
            for zone in zones {
                match reconcile_zone_once(runtime, &zone.id, &settings).await {
                    Ok(stats) => info!(
                        provider = %runtime.name,
                        zone = %zone.id,
                        planned = stats.planned,
                        "dry-run complete"
                    ),
                    Err(err) => warn!(
                        provider = %runtime.name,
                        zone = %zone.id,
                        error = %err,
                        "dry-run failed"
                    ),
                }
            }
        }
        return Ok(());
    }

    let scheduler = Arc::new(Scheduler::new(settings, args.processors, shutdown_rx));
    for runtime in runtimes {
        let name = runtime.name.clone();
        if let Err(err) = scheduler.add_provider(runtime).await {
            error!(provider = %name, error = %err, "initial zone enumeration failed");
        }
    }
    scheduler.run().await;
    Ok(())
}
