//! devcat catalog server
//!
//! Serves a device or service catalog over HTTP and purges registrations
//! whose lease ran out. Optionally keeps itself registered in an upstream
//! catalog.
//!
//! Usage:
//!   devcat-server --port 8411 --kind device
//!   devcat-server --kind service --register-endpoint http://upstream:8411/dc

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use devcat_keepalive::{CatalogEndpoint, HttpClientFactory, KeepaliveController, KeepaliveHandle};
use devcat_server::{AppState, STATIC_LOCATION, build_router, spawn_expiry_sweeper};
use devcat_store::{RegistryStore, StoreConfig, ViewBuilder};
use devcat_types::{CatalogKind, DEFAULT_MAX_PER_PAGE, Entity, LinkedDataFormatter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    Device,
    Service,
}

impl From<Kind> for CatalogKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Device => CatalogKind::Device,
            Kind::Service => CatalogKind::Service,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "devcat-server")]
#[command(about = "devcat device/service catalog")]
struct Args {
    /// Address to bind the HTTP API to
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8411)]
    port: u16,

    /// Path prefix of the catalog API
    #[arg(long, default_value = "/dc")]
    api_location: String,

    /// Which catalog flavour to serve
    #[arg(long, value_enum, default_value_t = Kind::Device)]
    kind: Kind,

    /// Upper bound for per_page
    #[arg(long, default_value_t = DEFAULT_MAX_PER_PAGE)]
    max_per_page: usize,

    /// JSON-LD context URL advertised in collections
    #[arg(long)]
    context_url: Option<String>,

    /// Directory served under /static (JSON-LD contexts and the like)
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Seconds between lease expiry sweeps
    #[arg(long, default_value_t = 1)]
    sweep_interval_secs: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Upstream catalog to register this server in
    #[arg(long)]
    register_endpoint: Option<String>,

    /// Registration name in the upstream catalog
    #[arg(long, default_value = "DeviceCatalog")]
    register_name: String,

    /// Registration TTL in seconds
    #[arg(long, default_value_t = 120)]
    register_ttl: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let kind = CatalogKind::from(args.kind);
    info!("devcat {kind} catalog starting...");

    let store = Arc::new(RegistryStore::new(StoreConfig {
        max_per_page: args.max_per_page,
    }));
    let mut views = ViewBuilder::new(
        LinkedDataFormatter::new(args.api_location.as_str()),
        kind,
        args.max_per_page,
    );
    if let Some(context) = &args.context_url {
        views = views.with_context(context.as_str());
    }
    let mut state = AppState::new(store.clone(), views);
    if let Some(dir) = &args.static_dir {
        if !dir.is_dir() {
            warn!("Static directory {} does not exist", dir.display());
        }
        state = state.with_static_dir(dir.clone());
    }
    let state = Arc::new(state);
    let api = state.api_location().to_string();

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let shutdown = CancellationToken::new();
    let sweeper = spawn_expiry_sweeper(
        store,
        Duration::from_secs(args.sweep_interval_secs),
        shutdown.child_token(),
    );
    let keepalive = match &args.register_endpoint {
        Some(endpoint) => Some(start_keepalive(&args, endpoint, &api, &shutdown)?),
        None => None,
    };

    println!("\n========================================");
    println!("  devcat Catalog Running");
    println!("========================================");
    println!("  Kind:      {kind}");
    println!("  Listening: {addr}");
    println!("  API:       {api}");
    if let Some(dir) = &args.static_dir {
        println!("  Static:    {} -> {}", STATIC_LOCATION, dir.display());
    }
    println!("========================================\n");

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down...");
                signal.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {e}"),
        }
    });

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    if let Some(handle) = keepalive {
        handle.shutdown().await;
    }
    if let Err(e) = sweeper.await {
        warn!("Expiry sweeper ended abnormally: {e}");
    }
    info!("devcat catalog stopped");
    Ok(())
}

/// Keeps this server registered in the upstream catalog at `endpoint`.
fn start_keepalive(
    args: &Args,
    endpoint: &str,
    api: &str,
    shutdown: &CancellationToken,
) -> Result<KeepaliveHandle> {
    let id = format!("{}/{}", Uuid::new_v4(), args.register_name);
    let entity = Entity::new(id, args.register_name.as_str(), args.register_ttl)
        .with_attribute("type", "catalog")
        .with_attribute("kind", CatalogKind::from(args.kind).entity_word())
        .with_attribute("url", format!("http://{}:{}{}", args.bind, args.port, api));
    let factory = HttpClientFactory::new().context("Failed to build registration client")?;

    info!("Registering {} in {endpoint}", entity.id);
    Ok(KeepaliveController::new(
        entity,
        CatalogEndpoint::Fixed(endpoint.to_string()),
        Arc::new(factory),
    )
    .with_shutdown(shutdown.child_token())
    .spawn())
}
