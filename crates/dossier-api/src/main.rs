//! dossier-api - HTTP API server for dossier

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dossier_api::{router, AppState};
use dossier_core::{defaults, ObjectStore, SourceRecordRepository};
use dossier_db::{
    Database, FilesystemObjectStore, HttpObjectStore, HttpObjectStoreConfig,
    MemorySourceRecordRepository, PoolConfig,
};
use dossier_enrich::EnrichmentChain;
use dossier_inference::{ExtractorRegistry, OllamaAnalyzer};
use dossier_jobs::{Collaborators, IngestionService, PipelineConfig, WorkerConfig};

const DEFAULT_STORAGE_PATH: &str = "/var/lib/dossier/sources";

/// Parse allowed CORS origins from the `ALLOWED_ORIGINS` env var (comma-separated).
fn parse_allowed_origins() -> Vec<HeaderValue> {
    let origins_str =
        std::env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| "http://localhost:3000".to_string());

    origins_str
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect()
}

/// Source record store: PostgreSQL when `DATABASE_URL` is set, in-memory otherwise.
async fn record_store(worker_jobs: usize) -> anyhow::Result<Arc<dyn SourceRecordRepository>> {
    match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            info!("Connecting to database...");
            let pool_config = PoolConfig::for_worker_concurrency(worker_jobs).with_env_overrides();
            let db = Database::connect_with_config(&database_url, pool_config).await?;
            info!("Running database migrations...");
            db.migrate().await?;
            info!("Database ready");
            Ok(Arc::new(db.source_records))
        }
        Err(_) => {
            warn!("DATABASE_URL not set, source records are kept in memory only");
            Ok(Arc::new(MemorySourceRecordRepository::new()))
        }
    }
}

/// Object store: remote HTTP storage when configured, local filesystem otherwise.
async fn object_store() -> anyhow::Result<Arc<dyn ObjectStore>> {
    if let Some(config) = HttpObjectStoreConfig::from_env() {
        info!(base_url = %config.base_url, bucket = %config.bucket, "Using remote object storage");
        return Ok(Arc::new(HttpObjectStore::new(config)?));
    }
    let path =
        std::env::var("DOSSIER_STORAGE_PATH").unwrap_or_else(|_| DEFAULT_STORAGE_PATH.to_string());
    let store = FilesystemObjectStore::new(&path);
    store.validate().await?;
    info!(path = %path, "Using filesystem object storage");
    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}

/// Install the global subscriber.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `RUST_LOG` | `dossier_api=debug,dossier_jobs=debug,...` | Env filter |
/// | `LOG_FORMAT` | `text` | `json` or `text` |
/// | `LOG_FILE` | unset | Log to this file (rotated daily) instead of stdout |
/// | `LOG_ANSI` | auto | Force ANSI colors on or off; files default to off |
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing() -> Option<WorkerGuard> {
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "dossier_api=debug,dossier_jobs=debug,dossier_enrich=info,tower_http=debug".into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = match log_file.as_deref().map(std::path::Path::new) {
        Some(path) => {
            let dir = path.parent().unwrap_or(std::path::Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or("dossier-api.log");
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name));
            let layer = tracing_subscriber::fmt::layer().with_writer(writer);
            if json {
                registry.with(layer.json()).init();
            } else {
                registry.with(layer.with_ansi(log_ansi.unwrap_or(false))).init();
            }
            Some(guard)
        }
        None => {
            let layer = tracing_subscriber::fmt::layer();
            if json {
                registry.with(layer.json()).init();
            } else if let Some(ansi) = log_ansi {
                registry.with(layer.with_ansi(ansi)).init();
            } else {
                registry.with(layer).init();
            }
            None
        }
    };

    info!(
        json,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("SERVER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults::SERVER_PORT);

    let extractor = ExtractorRegistry::from_env()?;
    info!(extractors = ?extractor.names(), "Text extraction configured");
    let analyzer = OllamaAnalyzer::from_env()?;
    info!(base_url = analyzer.base_url(), "Analysis backend configured");
    let enrichment = EnrichmentChain::from_env()?;
    info!(providers = ?enrichment.provider_names(), "Enrichment chain configured");

    let worker_config = WorkerConfig::from_env();
    let collaborators = Collaborators {
        records: record_store(worker_config.max_concurrent_jobs).await?,
        store: object_store().await?,
        extractor: Arc::new(extractor),
        analyzer: Arc::new(analyzer),
        enrichment,
    };

    let (ingestion, worker) = IngestionService::start(
        collaborators,
        PipelineConfig::from_env(),
        worker_config,
    );

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(parse_allowed_origins()))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static(dossier_api::context::SESSION_HEADER),
        ])
        .max_age(std::time::Duration::from_secs(3600));

    let app = router(AppState::new(ingestion)).layer(cors);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining processing worker...");
    worker.shutdown().await?;
    info!("Server stopped");

    Ok(())
}
