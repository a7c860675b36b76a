//! HTTP transport: health/info endpoints plus the MCP endpoint.
//!
//! `GET /mcp` opens an SSE stream announcing the message endpoint; clients
//! then POST JSON-RPC requests to `/mcp`. When an API key is configured the
//! `/mcp` routes require it, either as a bearer token or an `api_key` query
//! parameter.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use log::{info, warn};
use serde_json::{json, Value};
use std::convert::Infallible;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServerSettings;
use crate::rpc::JsonRpcRequest;
use crate::server::Dispatcher;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub api_key: Option<String>,
}

pub async fn serve(
    settings: ServerSettings,
    dispatcher: Dispatcher,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState {
        dispatcher,
        api_key: settings.api_key.clone(),
    };
    let app = router(state, &settings);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("MCP server listening on http://{addr}/mcp");
    info!("Health check at http://{addr}/health");
    if settings.enable_cors {
        if settings.allowed_origins.iter().any(|o| o == "*") {
            warn!("CORS allows all origins");
        } else {
            info!("CORS allowed origins: {}", settings.allowed_origins.join(", "));
        }
    }
    if settings.api_key.is_some() {
        info!("API key authentication enabled for /mcp");
    }

    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState, settings: &ServerSettings) -> Router {
    let mcp_routes = Router::new()
        .route("/mcp", get(sse_handler).post(message_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/api/info", get(api_info))
        .merge(mcp_routes)
        .with_state(state);

    if settings.enable_cors {
        app = app.layer(cors_layer(&settings.allowed_origins));
    }
    app
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin '{o}'");
                    None
                }
            })
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn health() -> Json<Value> {
    Json(health_payload())
}

fn health_payload() -> Value {
    json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": env!("CARGO_PKG_NAME"),
    })
}

async fn api_info() -> Json<Value> {
    Json(info_payload())
}

fn info_payload() -> Value {
    json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "capabilities": ["tools"],
        "endpoints": {
            "mcp": "/mcp",
            "health": "/health",
            "info": "/api/info",
        }
    })
}

async fn sse_handler() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Announce where messages go, then hold the stream open.
    let stream = stream::once(async {
        Ok::<_, Infallible>(Event::default().event("endpoint").data("/mcp"))
    })
    .chain(stream::pending());

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn message_handler(
    State(state): State<AppState>,
    Json(request): Json<JsonRpcRequest>,
) -> Response {
    if request.method.starts_with("notifications/") && request.id.is_none() {
        return StatusCode::NO_CONTENT.into_response();
    }
    Json(state.dispatcher.handle_request(request).await).into_response()
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = &state.api_key else {
        return next.run(request).await;
    };

    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    if api_key_matches(expected, authorization, request.uri().query()) {
        next.run(request).await
    } else {
        warn!(
            "Rejected request to {} with missing or invalid API key",
            request.uri().path()
        );
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid API key"})),
        )
            .into_response()
    }
}

fn api_key_matches(expected: &str, authorization: Option<&str>, query: Option<&str>) -> bool {
    if let Some(token) = authorization.and_then(|h| h.strip_prefix("Bearer ")) {
        return token == expected;
    }
    if let Some(query) = query {
        return query
            .split('&')
            .any(|pair| pair.strip_prefix("api_key=") == Some(expected));
    }
    false
}
