// src/main.rs
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use langkit::config::{ConfigService, CredentialStore, ProductionConfigService};
use langkit::dependency::DependencyService;
use langkit::docker::{ComputeMode, ContainerRuntime};
use langkit::event::{EventHub, EventSink, EventThrottler};
use langkit::media::MediaToolkit;
use langkit::models::{ModelCache, ToolFamily};
use langkit::providers::ProviderRegistry;
use langkit::separation::{ContainerSeparationProvider, SeparationEngine};
use langkit::server::{serve, AppState};
use langkit::stt::SttEngine;
use langkit::task::{EngineDeps, TaskEngine};

/// Langkit core server: binds the processing RPC surface to loopback.
#[derive(Parser)]
#[command(name = "langkit", version = langkit::VERSION)]
struct Args {
    /// Port on 127.0.0.1; defaults to the configured port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the config root directory.
    #[arg(long)]
    config_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("fatal: {}", e);
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> langkit::Result<()> {
    let config: Arc<dyn ConfigService> = match args.config_root {
        Some(root) => Arc::new(ProductionConfigService::with_root(root)),
        None => Arc::new(ProductionConfigService::new()?),
    };
    let settings = config.get_settings()?;
    let config_root = config.config_root();

    // Event plumbing: hub behind the throttler.
    let hub = Arc::new(EventHub::new(1024));
    let throttler = Arc::new(EventThrottler::new(hub.clone() as Arc<dyn EventSink>));
    throttler.set_enabled(settings.server.event_throttling);
    // Fresh subscribers get asked for their state snapshot.
    hub.set_on_connect(Box::new(|| {
        vec![langkit::event::WireEvent {
            channel: "wasm.state.request".to_string(),
            payload: serde_json::Value::Null,
        }]
    }));

    // Credentials and providers.
    let credentials = Arc::new(CredentialStore::new());
    credentials.refresh_from(&settings.api_keys);
    let registry = Arc::new(ProviderRegistry::new(credentials));
    registry.update_factory();

    let media = Arc::new(MediaToolkit::new());
    let cache = Arc::new(ModelCache::new(config_root.clone()));
    let idle_timeout = Duration::from_secs(settings.docker.idle_timeout_minutes * 60);
    let compute_mode = if settings.docker.prefer_gpu {
        ComputeMode::Gpu
    } else {
        ComputeMode::Cpu
    };

    // One-time migration of legacy per-container model dirs.
    for tool in [ToolFamily::Demucs, ToolFamily::AudioSeparator] {
        if let Err(e) = cache.migrate_legacy(tool).await {
            warn!("legacy model migration for {:?} failed: {}", tool, e);
        }
    }

    let demucs_runtime = ContainerRuntime::new(ToolFamily::Demucs, config_root.clone(), idle_timeout);
    let audiosep_runtime =
        ContainerRuntime::new(ToolFamily::AudioSeparator, config_root.clone(), idle_timeout);
    registry.register_separation(Arc::new(ContainerSeparationProvider::new(
        "demucs",
        SeparationEngine::new(
            demucs_runtime.clone(),
            cache.clone(),
            media.clone(),
            compute_mode,
        ),
    )));
    registry.register_separation(Arc::new(ContainerSeparationProvider::new(
        "audiosep",
        SeparationEngine::new(
            audiosep_runtime.clone(),
            cache.clone(),
            media.clone(),
            compute_mode,
        ),
    )));

    let stt = Arc::new(SttEngine::new(registry.clone()));
    let engine = TaskEngine::new(Arc::new(EngineDeps {
        config: config.clone(),
        throttler: throttler.clone(),
        registry: registry.clone(),
        media,
        stt,
    }));
    let dependency = Arc::new(DependencyService::new(config_root, throttler.clone()));

    let state = AppState {
        engine,
        hub: hub.clone(),
        throttler: throttler.clone(),
        registry,
        config,
        dependency,
    };

    let port = args.port.unwrap_or(settings.server.port);
    serve(state, port, shutdown_signal()).await?;

    // Drain the last events, then stop the managers.
    info!("shutting down");
    throttler.sync_flush().await;
    throttler.shutdown().await;
    demucs_runtime.close().await;
    audiosep_runtime.close().await;
    hub.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("termination signal received");
}
