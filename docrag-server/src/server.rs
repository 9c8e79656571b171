use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
};
use docrag::{GenerationRequest, RagError, Services, format_context, generation};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::protocol::{
    AskRequest, AskResponse, EnginesResponse, ErrorResponse, MISSING_FIELDS, NO_RESULTS,
    RETRIEVAL_ENGINE, RetrieveRequest, RetrieveResponse, Source, non_blank,
};

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    fn default_engine(&self) -> &str {
        self.services.generator().map_or(RETRIEVAL_ENGINE, |g| g.name())
    }

    fn engines(&self) -> Vec<String> {
        let mut engines: Vec<String> =
            self.services.generator().map(|g| g.name().to_string()).into_iter().collect();
        engines.push(RETRIEVAL_ENGINE.to_string());
        engines
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8100 }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: message.into() }))
}

fn rag_error(e: RagError) -> ApiError {
    let status = match &e {
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        RagError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RagError::EmbeddingError { .. } | RagError::GenerationError { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %e, "request failed");
    } else {
        warn!(error = %e, "request rejected");
    }
    api_error(status, e.to_string())
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/engines", get(engines))
        .route("/api/retrieve", post(retrieve))
        .route("/api/ask", post(ask))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve the API until the process is stopped, then flush the store.
pub async fn run_server(config: ServerConfig, services: Services) -> anyhow::Result<()> {
    let state = AppState::new(services.clone());
    let app = app_router(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| "invalid host/port for docrag server")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("docrag-server listening on http://{}", addr);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    services.shutdown().await.context("failed to flush the vector store")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn index() -> impl IntoResponse {
    Html(include_str!("../ui/index.html"))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status":"ok","service":"docrag-server"}))
}

async fn engines(State(state): State<AppState>) -> impl IntoResponse {
    Json(EnginesResponse {
        engines: state.engines(),
        default: state.default_engine().to_string(),
    })
}

async fn retrieve(
    State(state): State<AppState>,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, ApiError> {
    let question = non_blank(request.question.as_deref())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, MISSING_FIELDS))?;
    let settings = state.services.settings();
    let collection =
        non_blank(request.collection.as_deref()).unwrap_or(settings.collection.as_str());
    let k = request.top_k.unwrap_or(settings.rag.top_k);

    let results = state
        .services
        .retriever()
        .retrieve(collection, question, k, request.topic_weight.as_deref())
        .await
        .map_err(rag_error)?;

    Ok(Json(RetrieveResponse { results: results.into_iter().map(Source::from).collect() }))
}

async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let question = non_blank(request.question.as_deref())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, MISSING_FIELDS))?;

    let engine =
        non_blank(request.engine.as_deref()).unwrap_or(state.default_engine()).to_string();
    let generator = match state.services.generator() {
        Some(generator) if generator.name() == engine => Some(generator),
        _ if engine == RETRIEVAL_ENGINE => None,
        _ => {
            return Err(api_error(StatusCode::BAD_REQUEST, format!("Unknown engine '{engine}'.")));
        }
    };

    let temperature = request.temperature.unwrap_or(generation::DEFAULT_TEMPERATURE);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("temperature must be between 0 and 2, got {temperature}"),
        ));
    }
    let max_tokens = request.max_tokens.unwrap_or(generation::DEFAULT_MAX_TOKENS);
    if max_tokens == 0 {
        return Err(api_error(StatusCode::BAD_REQUEST, "max_tokens must be greater than zero"));
    }

    let settings = state.services.settings();
    let k = request.top_k.unwrap_or(settings.rag.top_k);
    let results = state
        .services
        .retriever()
        .retrieve(&settings.collection, question, k, request.topic_weight.as_deref())
        .await
        .map_err(rag_error)?;

    if results.is_empty() {
        return Ok(Json(AskResponse {
            answer: NO_RESULTS.to_string(),
            engine,
            sources: Vec::new(),
        }));
    }

    let context = format_context(&results);
    let answer = match generator {
        Some(generator) => {
            let request = GenerationRequest {
                question: question.to_string(),
                context,
                temperature,
                max_tokens,
            };
            generator.generate(&request).await.map_err(rag_error)?
        }
        None => context,
    };

    info!(engine = %engine, sources = results.len(), "answered question");
    Ok(Json(AskResponse {
        answer,
        engine,
        sources: results.into_iter().map(Source::from).collect(),
    }))
}
