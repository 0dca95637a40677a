//! critique-api server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use critique_api::{router, AppState};
use critique_core::defaults::{EVENT_BUS_CAPACITY, MAX_BODY_SIZE_BYTES, SERVER_PORT};
use critique_core::{AdvisorCatalog, EventBus};
use critique_db::{Database, PoolConfig, Stores};
use critique_inference::{ExclusiveEngine, InferenceEngine, OllamaVisionEngine};
use critique_jobs::{
    JobWorker, Orchestrator, OrchestratorConfig, ProgressPublisher, StrategyConfig, WorkerConfig,
};

/// Time-ordered request correlation ids.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = critique_core::new_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Origins from `ALLOWED_ORIGINS` (comma separated), defaulting to the
/// local dev server.
fn parse_allowed_origins() -> Vec<HeaderValue> {
    std::env::var("ALLOWED_ORIGINS")
        .unwrap_or_else(|_| format!("http://localhost:{}", SERVER_PORT))
        .split(',')
        .filter_map(|o| {
            let o = o.trim();
            if o.is_empty() {
                return None;
            }
            match o.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            }
        })
        .collect()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "critique_api=debug,critique_jobs=debug,critique_search=info,tower_http=debug".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("critique-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(SERVER_PORT);

    // Stores: PostgreSQL when configured, in-process otherwise
    let stores = match std::env::var("DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => {
            info!("Connecting to database...");
            let db = Database::connect_with_config(&url, PoolConfig::from_env()).await?;
            info!("Database connected");
            #[cfg(feature = "migrations")]
            {
                info!("Running database migrations...");
                db.migrate().await?;
                info!("Database migrations complete");
            }
            Stores::postgres(db)
        }
        _ => {
            warn!("DATABASE_URL not set, using in-process stores; jobs and profiles will not survive a restart");
            Stores::in_memory()
        }
    };

    let advisors = Arc::new(AdvisorCatalog::from_env()?);
    info!(advisors = advisors.len(), "Advisor catalog ready");

    let vision = OllamaVisionEngine::from_env();
    info!(
        model = vision.model_name(),
        adapter_dir = %vision.adapters().root().display(),
        "Inference engine configured"
    );
    let engine = Arc::new(ExclusiveEngine::new(Arc::new(vision)));

    let bus_capacity = std::env::var("EVENT_BUS_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|c| *c > 0)
        .unwrap_or(EVENT_BUS_CAPACITY);
    let progress = ProgressPublisher::new(EventBus::new(bus_capacity), stores.jobs.clone());

    let config = OrchestratorConfig::from_env()?;
    info!(
        default_mode = %config.default_mode,
        similar_k = config.similar_k,
        upload_dir = %config.upload_dir.display(),
        "Orchestrator configured"
    );
    let orchestrator = Arc::new(Orchestrator::with_strategy_config(
        stores,
        advisors,
        engine,
        progress,
        config,
        StrategyConfig::from_env(),
    ));

    let worker = JobWorker::new(orchestrator.clone(), WorkerConfig::from_env()).start();

    let app = router(AppState::new(orchestrator))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(parse_allowed_origins()))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
                .max_age(std::time::Duration::from_secs(3600)),
        )
        // Outermost, so oversized uploads are refused before anything else runs
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE_BYTES));

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.shutdown().await.ok();
    info!("Server stopped");
    Ok(())
}
