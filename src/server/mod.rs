//! HTTP surface: `/llm`, `/multiply`, `/health` and `/models`.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use tokio::signal;
use tower_http::trace::TraceLayer;

use crate::api::types::{
    ErrorResponse, GenerationRequest, HealthResponse, ListResponse, MessageResponse, ModelInfo,
    MultiplyRequest,
};
use crate::app::{arith, GenerationService};
use crate::core::{Error, ModelRegistry, PipelineCache};
use crate::discover::DeviceProfile;
use crate::envconfig::Config;
use crate::infra::{CandleEngine, ModelStore};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GenerationService>,
}

impl AppState {
    pub fn new(service: GenerationService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/llm", post(llm))
        .route("/multiply", post(multiply))
        .route("/health", get(health))
        .route("/models", get(list_models))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds the production service from `config` and serves until ctrl-c or
/// SIGTERM.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let profile = DeviceProfile::probe(config.device, config.precision);
    let registry = ModelRegistry::new(profile.device, profile.precision, config.default_max_length);

    let store = ModelStore::new(&config.models_dir, config.hub_url.clone())
        .with_token(config.hub_token.clone())
        .offline(config.offline);
    let cache = PipelineCache::new(Arc::new(CandleEngine::new(store)));
    let service = GenerationService::new(registry, cache).with_timeout(config.timeout);

    let addr = config.host.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        models_dir = %config.models_dir.display(),
        offline = config.offline,
        "Listening"
    );

    axum::serve(listener, router(AppState::new(service)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

/// Parses a JSON body regardless of content type, so a malformed or
/// unlabelled body is a 400 rather than axum's 415/422.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|e| Error::validation(format!("malformed JSON body: {e}")))
}

async fn llm(State(state): State<AppState>, body: Bytes) -> Result<Json<MessageResponse>, Error> {
    let request: GenerationRequest = parse_body(&body)?;
    let result = state.service.generate(request).await?;
    Ok(Json(MessageResponse {
        message: result.text,
    }))
}

async fn multiply(body: Bytes) -> Result<Json<MessageResponse>, Error> {
    let request: MultiplyRequest = parse_body(&body)?;
    Ok(Json(MessageResponse {
        message: arith::describe_product(&request.x, &request.y),
    }))
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
        }),
    )
}

async fn list_models(State(state): State<AppState>) -> Json<ListResponse> {
    let registry = state.service.registry();
    let cache = state.service.cache();
    let default = registry.default_descriptor();

    let models = registry
        .descriptors()
        .into_iter()
        .map(|d| ModelInfo::new(d, d == default, cache.is_loaded(d)))
        .collect();
    Json(ListResponse { models })
}
