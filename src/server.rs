//! HTTP tool server.
//!
//! Serves the discovery tools two ways: a plain JSON API for scripts and
//! tests, and the MCP Streamable HTTP transport for agent clients. Both
//! dispatch through the same [`ToolRegistry`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name |
//! | `GET`  | `/health` | Health check (status, version, catalog size) |
//! | `*`    | `/mcp` | MCP Streamable HTTP endpoint |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "entity 'X' not found",
//!              "remediation": "...", "details": { "available": ["..."] } } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `validation_error`, `capability_error` | 400 |
//! | `not_found` | 404 |
//! | `upstream_error` | 502 |
//! | `configuration_error`, `internal` | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.
//!
//! # MCP client configuration
//!
//! ```json
//! { "mcpServers": { "catalog-scout": { "url": "http://127.0.0.1:7332/mcp" } } }
//! ```

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::error::DiscoveryError;
use crate::mcp::{error_payload, McpBridge};
use crate::protocol::Discovery;
use crate::traits::{validate_params, ToolContext, ToolRegistry};

/// Shared state for route handlers.
#[derive(Clone)]
struct AppState {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
}

/// Build the router with the built-in tools and the `/mcp` endpoint.
pub fn build_router(discovery: Arc<Discovery>) -> Router {
    build_router_with_tools(discovery, Arc::new(ToolRegistry::with_builtins()))
}

/// Build the router around a caller-supplied registry.
pub fn build_router_with_tools(discovery: Arc<Discovery>, tools: Arc<ToolRegistry>) -> Router {
    let ctx = ToolContext::new(discovery);
    let bridge = McpBridge::new(tools.clone(), ctx.clone());
    let mcp_service = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .nest_service("/mcp", mcp_service)
        .layer(cors)
        .with_state(AppState { tools, ctx })
}

/// Bind `bind` and serve until the process is terminated.
pub async fn run_server(discovery: Arc<Discovery>, bind: &str) -> anyhow::Result<()> {
    let app = build_router(discovery);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, "tool server listening (REST at /tools, MCP at /mcp)");
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

struct AppError {
    status: StatusCode,
    body: Value,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn status_for(err: &DiscoveryError) -> StatusCode {
    match err {
        DiscoveryError::NotFound { .. } => StatusCode::NOT_FOUND,
        DiscoveryError::Validation { .. } | DiscoveryError::Capability { .. } => {
            StatusCode::BAD_REQUEST
        }
        DiscoveryError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        DiscoveryError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Map a tool failure to a status and the shared JSON error payload.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    let status = err
        .downcast_ref::<DiscoveryError>()
        .map(status_for)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::warn!(tool = tool_name, error = %err, "tool call failed");
    }
    AppError {
        status,
        body: error_payload(&err),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    services: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: state.ctx.discovery().catalog().len(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    description: String,
    builtin: bool,
    read_only: bool,
    parameters: Value,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo {
            name: t.name().to_string(),
            description: t.description().to_string(),
            builtin: t.is_builtin(),
            read_only: t.is_read_only(),
            parameters: t.parameters_schema(),
        })
        .collect();
    Json(ToolListResponse { tools })
}

// ============ POST /tools/{name} ============

/// Validates parameters against the tool schema, then executes.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let tool = state.tools.find(&name).ok_or_else(|| {
        let err = DiscoveryError::NotFound {
            kind: "tool".to_string(),
            name: name.clone(),
            available: state.tools.tools().iter().map(|t| t.name().to_string()).collect(),
            remediation: "GET /tools/list for the registered tools".to_string(),
        };
        AppError {
            status: StatusCode::NOT_FOUND,
            body: err.to_payload(),
        }
    })?;

    let validated = validate_params(&tool.parameters_schema(), &params).map_err(|e| AppError {
        status: status_for(&e),
        body: e.to_payload(),
    })?;

    let result = tool
        .execute(validated, &state.ctx)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}
