use crate::handlers::{get_limits, health_check, hello, readiness_check, AppState, SharedState};
use crate::key_generator::KeyExtractor;
use crate::middleware::{logging_middleware, rate_limit_middleware, RateLimitLayerState};
use crate::rate_limit_config::LimiterSettings;
use crate::rate_limiter::RateLimiter;
use crate::store::CounterStore;
use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the router: `/api/v1/*` behind the admission middleware, health and
/// settings endpoints outside it.
pub fn create_app(
    store: Arc<dyn CounterStore>,
    settings: LimiterSettings,
    limiter: Arc<RateLimiter>,
    extractor: Arc<dyn KeyExtractor>,
) -> Router {
    let shared_state: SharedState = Arc::new(AppState { store, settings });

    let protected = Router::new()
        .route("/api/v1/hello", get(hello))
        .route_layer(middleware::from_fn_with_state(
            RateLimitLayerState::new(extractor, limiter),
            rate_limit_middleware,
        ));

    Router::new()
        .merge(protected)
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/limits", get(get_limits))
        .with_state(shared_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub fn new(app: Router, bind_addr: SocketAddr) -> Self {
        Self { app, bind_addr }
    }

    pub async fn run(self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Throttler server listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");
        tracing::info!("Readiness check available at /ready");

        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
