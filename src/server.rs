//! HTTP surfaces for both gateway roles.
//!
//! Router: `POST /infer` routes a request across the worker fleet,
//! `GET /stats` reports ring size and breaker states.
//! Worker: `POST /infer` runs the cache/batch pipeline, `GET /health`
//! reports the node snapshot.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router as AxumRouter,
};
use tokio::signal;
use tracing::info;

use crate::{
    config::{RouterConfig, WorkerConfig},
    core::RouterError,
    inference::LinearModel,
    protocols::{ErrorBody, InferenceRequest},
    routers::{HttpTransport, Router},
    worker::WorkerNode,
};

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody::new(message))).into_response()
}

async fn route_infer(
    State(router): State<Arc<Router>>,
    payload: Result<Json<InferenceRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    match router.route(&request).await {
        Ok(response) => Json(response).into_response(),
        Err(err @ (RouterError::NoWorkers | RouterError::AllWorkersUnavailable)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
    }
}

async fn router_stats(State(router): State<Arc<Router>>) -> Response {
    Json(router.stats()).into_response()
}

async fn worker_infer(
    State(node): State<Arc<WorkerNode>>,
    payload: Result<Json<InferenceRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    match node.infer(request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn worker_health(State(node): State<Arc<WorkerNode>>) -> Response {
    Json(node.health()).into_response()
}

pub fn router_app(router: Arc<Router>) -> AxumRouter {
    AxumRouter::new()
        .route("/infer", post(route_infer))
        .route("/stats", get(router_stats))
        .with_state(router)
}

pub fn worker_app(node: Arc<WorkerNode>) -> AxumRouter {
    AxumRouter::new()
        .route("/infer", post(worker_infer))
        .route("/health", get(worker_health))
        .with_state(node)
}

pub async fn run_router(mut config: RouterConfig) -> anyhow::Result<()> {
    config.validate()?;

    let transport = Arc::new(HttpTransport::new(
        config.connect_timeout,
        config.read_timeout,
    )?);
    let router = Arc::new(Router::new(&config, transport));

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        host = %config.host,
        port = config.port,
        workers = config.worker_urls.len(),
        failure_threshold = config.failure_threshold,
        success_threshold = config.success_threshold,
        cooldown_secs = config.cooldown.as_secs(),
        "router listening"
    );

    axum::serve(listener, router_app(router))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("router stopped");
    Ok(())
}

pub async fn run_worker(config: WorkerConfig) -> anyhow::Result<()> {
    config.validate()?;

    let model = LinearModel::load(&config.model_path)?;
    let node = Arc::new(WorkerNode::new(&config, model));

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        node_id = %config.node_id,
        host = %config.host,
        port = config.port,
        cache_capacity = config.cache_capacity,
        max_batch_size = config.max_batch_size,
        batch_timeout_ms = config.batch_timeout.as_millis() as u64,
        "worker listening"
    );

    axum::serve(listener, worker_app(node.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Fail anything still queued before the process exits.
    node.shutdown();
    info!(node_id = %config.node_id, "worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
