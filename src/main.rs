use axum::{http::StatusCode, response::IntoResponse, Json};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::brave::BraveClient;
use crate::config::{ConfigError, GatewayConfig};
use crate::mcp::{McpError, McpRegistry};
use crate::search::{HttpVectorSearcher, SearchError};
use crate::web::extproc::{self, FilterProcessor};
use crate::web::openai::ChatCompletionsBackend;
use crate::web::responses::{self, codec_for, Engine, InMemoryResponseStore, ToolExecutor};

mod brave;
mod config;
mod mcp;
mod search;
mod web;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Resource not found")]
    NotFound,

    #[error("Internal server error")]
    InternalServerError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                status: status.as_u16(),
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub message: String,
}

pub struct AppState {
    pub engine: Engine,
    pub filter: FilterProcessor,
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to set up MCP connectors: {0}")]
    Mcp(#[from] McpError),
    #[error("failed to set up search client: {0}")]
    Search(#[from] SearchError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

fn build_tool_executor(cfg: &GatewayConfig) -> Result<ToolExecutor, StartupError> {
    let mut tools = ToolExecutor::default();

    if !cfg.mcp_connectors.is_empty() {
        info!("MCP connectors enabled: {}", cfg.mcp_connectors.len());
        tools.mcp = Some(Arc::new(McpRegistry::new(cfg.mcp_connectors.clone())?));
    }
    if let Some(endpoint) = &cfg.vector_search_endpoint {
        info!("file_search enabled via {}", endpoint);
        tools.vector_search = Some(Arc::new(HttpVectorSearcher::new(
            endpoint,
            cfg.vector_search_api_key.clone(),
        )?));
    }
    if let Some(key) = &cfg.brave_api_key {
        info!("web_search enabled");
        tools.web_search = Some(Arc::new(BraveClient::new(key.clone())?));
    }

    Ok(tools)
}

async fn run() -> Result<(), StartupError> {
    let cfg = GatewayConfig::from_env()?;
    let addr = cfg.listen_addr()?;

    let backend = ChatCompletionsBackend::new(
        &cfg.backend_url,
        cfg.backend_api_key.clone(),
        cfg.backend_timeout_secs,
    );
    let engine = Engine::new(
        Arc::new(backend),
        Arc::new(InMemoryResponseStore::new()),
        build_tool_executor(&cfg)?,
        cfg.max_tool_calls,
    );
    let filter = FilterProcessor::new(engine.clone(), codec_for(cfg.state_codec));
    let app_state = Arc::new(AppState { engine, filter });

    let app = responses::router(app_state.clone())
        .merge(extproc::router(app_state))
        .layer(CorsLayer::permissive());

    info!(
        "Listening on {} (backend {}, state codec {:?})",
        addr, cfg.backend_url, cfg.state_codec
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("openresponses_gateway=info,tower_http=info")),
        )
        .init();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}
