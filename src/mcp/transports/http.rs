//! HTTP transport for MCP server
//!
//! Implements the MCP Streamable HTTP transport (MCP spec 2025-11-25), bound to
//! loopback only. Authentication is out of scope (§ Non-goals); origin validation
//! below is loopback-server hardening against DNS rebinding, not an auth layer.

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::Config;

use super::super::server::{McpServer, MCP_PROTOCOL_VERSION};
use super::super::types::JsonRpcRequest;

struct HttpState {
    server: McpServer,
}

/// Run the MCP server with the Streamable HTTP transport, bound to `127.0.0.1:<port>`.
pub fn serve_http(project_root: impl AsRef<Path>, port: u16, config: &Config) -> Result<()> {
    let server = McpServer::new(project_root, config)?;
    let state = Arc::new(HttpState { server });

    // CORS allows any origin through preflight; validate_origin_header() then rejects
    // non-localhost origins at the application layer on the actual request.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let middleware = ServiceBuilder::new()
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(cors);

    let app = Router::new()
        .route("/mcp", post(handle_mcp_post).get(handle_mcp_sse))
        .route("/health", get(handle_health))
        .layer(middleware)
        .with_state(state);

    let addr = format!("127.0.0.1:{port}");
    eprintln!("MCP HTTP server listening on http://{addr}");
    eprintln!("MCP protocol version: {MCP_PROTOCOL_VERSION}");

    // Separate runtime from Store's own internal runtime; Store's sync API does its
    // own block_on per call, so sharing a runtime here would risk the nested-runtime panic.
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let shutdown = async {
            tokio::signal::ctrl_c().await.ok();
            eprintln!("\nshutting down HTTP server...");
        };
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok::<_, anyhow::Error>(())
    })?;

    Ok(())
}

type ValidationError = (StatusCode, Json<Value>);

/// Validate Origin header for DNS rebinding protection (MCP 2025-11-25 spec).
/// Allows localhost origins only. Empty/missing Origin is allowed.
fn validate_origin_header(headers: &HeaderMap) -> Result<(), ValidationError> {
    if let Some(origin) = headers.get("origin") {
        let origin_str = origin.to_str().unwrap_or("");
        if !origin_str.is_empty() && !is_localhost_origin(origin_str) {
            return Err((
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({
                    "jsonrpc": "2.0",
                    "error": {"code": -32600, "message": "invalid origin"}
                })),
            ));
        }
    }
    Ok(())
}

/// Check if origin is a valid localhost origin.
/// Prevents bypass via subdomains like localhost.evil.com
fn is_localhost_origin(origin: &str) -> bool {
    let prefixes = [
        "http://localhost",
        "http://127.0.0.1",
        "https://localhost",
        "https://127.0.0.1",
        "http://[::1]",
        "https://[::1]",
    ];

    for prefix in prefixes {
        if let Some(rest) = origin.strip_prefix(prefix) {
            if rest.is_empty() || rest.starts_with(':') || rest.starts_with('/') {
                return true;
            }
        }
    }
    false
}

/// Require Accept header includes text/event-stream for SSE endpoints.
fn require_accept_event_stream(headers: &HeaderMap) -> Result<(), ValidationError> {
    let accept = headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !accept.contains("text/event-stream") {
        return Err((
            StatusCode::NOT_ACCEPTABLE,
            Json(serde_json::json!({
                "jsonrpc": "2.0",
                "error": {"code": -32600, "message": "Accept header must include text/event-stream"}
            })),
        ));
    }
    Ok(())
}

/// Handle POST /mcp - JSON-RPC requests (MCP 2025-11-25 compliant)
async fn handle_mcp_post(
    State(state): State<Arc<HttpState>>,
    headers: axum::http::HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    if let Err(e) = validate_origin_header(&headers) {
        return e;
    }

    if let Some(version) = headers.get("mcp-protocol-version") {
        let version_str = version.to_str().unwrap_or("");
        if !version_str.is_empty()
            && version_str != MCP_PROTOCOL_VERSION
            && version_str != "2025-03-26"
        {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "jsonrpc": "2.0",
                    "error": {
                        "code": -32600,
                        "message": format!("unsupported protocol version: {version_str}. supported: {MCP_PROTOCOL_VERSION}")
                    }
                })),
            );
        }
    }

    let response = state.server.handle_request(request);

    if response.id.is_none()
        && response
            .result
            .as_ref()
            .map(|v| v.is_null())
            .unwrap_or(false)
    {
        return (StatusCode::ACCEPTED, Json(serde_json::json!(null)));
    }

    (
        StatusCode::OK,
        Json(serde_json::to_value(&response).unwrap_or_default()),
    )
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "pommel",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Handle GET /mcp - SSE stream for server-to-client messages (MCP 2025-11-25)
async fn handle_mcp_sse(
    State(_state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<Value>)> {
    validate_origin_header(&headers)?;
    require_accept_event_stream(&headers)?;

    // Priming event per MCP 2025-11-25 spec: "the server SHOULD immediately send
    // an SSE event consisting of an event ID and an empty data field in order to
    // prime the client to reconnect". There are no server-initiated messages to
    // push beyond this, so the stream otherwise just stays alive.
    let event_id = event_id();
    let stream = stream::once(async move { Ok(Event::default().id(event_id).data("")) });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

fn event_id() -> String {
    use rand::Rng;
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let random: u32 = rand::rng().random();
    format!("{nanos:x}-{random:08x}")
}
