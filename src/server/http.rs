//! The A2A HTTP server: axum app, CORS, agent-card routes, and
//! JSON-RPC dispatch with SSE framing over a `Router` + CORS +
//! `Sse<Stream>` stack.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, options};
use axum::Router;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::core::agent_card::AgentCardHolder;
use crate::errors::rpc_code;
use crate::server::rpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcRouter};

#[derive(Clone)]
pub struct AppState {
    pub card: Arc<AgentCardHolder>,
    pub router: Arc<RpcRouter>,
    /// Live log tail, wired up when `init_logging_with_tap` was given a
    /// sender. `None` makes `/logs` answer 404 instead of an empty stream.
    pub log_tap: Option<broadcast::Sender<String>>,
}

pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(agent_card_handler).post(json_rpc_handler))
        .route("/.well-known/agent.json", get(agent_card_handler))
        .route("/healthz", get(healthz_handler))
        .route("/logs", get(logs_handler))
        .route("/", options(options_handler))
        .route("/.well-known/agent.json", options(options_handler))
        .layer(cors)
        .with_state(state)
}

async fn options_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn agent_card_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let card = state.card.get().await;
    Json(serde_json::to_value(card).unwrap_or(serde_json::Value::Null))
}

/// Tails the live log broadcast as `log` SSE events. 404s when no tap was
/// configured, rather than serving a stream that never emits anything.
async fn logs_handler(State(state): State<AppState>) -> Response {
    let Some(sender) = &state.log_tap else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let stream = BroadcastStream::new(sender.subscribe())
        .filter_map(|item| item.ok().map(|line| Ok::<Event, Infallible>(Event::default().event("log").data(line))));
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

async fn json_rpc_handler(State(state): State<AppState>, body: bytes::Bytes) -> Response {
    let parsed: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(err) => {
            return Json(JsonRpcResponse::failure(
                serde_json::Value::Null,
                JsonRpcError::new(rpc_code::PARSE_ERROR, format!("parse error: {err}")),
            ))
            .into_response();
        }
    };

    if parsed.jsonrpc != "2.0" {
        return Json(JsonRpcResponse::failure(
            parsed.id,
            JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
        ))
        .into_response();
    }

    if let Some(sse_handler) = state.router.sse_handler(&parsed.method) {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            sse_handler.handle(parsed.params, tx).await;
        });

        let stream = ReceiverStream::new(rx).map(|frame| {
            let data = serde_json::to_string(&frame.data).unwrap_or_default();
            Ok::<Event, Infallible>(Event::default().event(frame.event).data(data))
        });

        let mut response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        return response;
    }

    if let Some(handler) = state.router.handler(&parsed.method) {
        return match handler.handle(parsed.params).await {
            Ok(result) => Json(JsonRpcResponse::success(parsed.id, result)).into_response(),
            Err(err) => Json(JsonRpcResponse::failure(parsed.id, err)).into_response(),
        };
    }

    Json(JsonRpcResponse::failure(
        parsed.id,
        JsonRpcError::method_not_found(&parsed.method),
    ))
    .into_response()
}

/// Serves the app until `shutdown` resolves, then stops accepting new
/// connections and waits for in-flight requests to finish.
pub async fn serve(
    host: &str,
    port: u16,
    app: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> crate::errors::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|err| crate::errors::AppError::Io(format!("failed to bind {addr}: {err}")))?;
    info!(%addr, "a2a server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|err| {
            error!(error = %err, "http server exited with error");
            crate::errors::AppError::Io(err.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, CapabilitiesConfig};
    use crate::core::task::AgentCard;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn sample_state() -> AppState {
        let card = AgentCard {
            name: "demo".to_string(),
            description: "d".to_string(),
            url: "http://localhost".to_string(),
            skills: Vec::new(),
            capabilities: CapabilitiesConfig::default(),
        };
        AppState {
            card: Arc::new(AgentCardHolder::new(card)),
            router: Arc::new(RpcRouter::new()),
            log_tap: None,
        }
    }

    #[tokio::test]
    async fn logs_endpoint_404s_without_a_configured_tap() {
        let app = build_app(sample_state());
        let response = app
            .oneshot(Request::builder().uri("/logs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn logs_endpoint_streams_broadcast_lines_as_sse() {
        let mut state = sample_state();
        let (tx, _rx) = broadcast::channel(16);
        state.log_tap = Some(tx.clone());

        let app = build_app(state);
        let response = app
            .oneshot(Request::builder().uri("/logs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        tx.send("hello from the log tap".to_string()).unwrap();
        drop(tx);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: log"));
        assert!(text.contains("hello from the log tap"));
    }

    #[tokio::test]
    async fn healthz_returns_ok_status() {
        let app = build_app(sample_state());
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn agent_card_served_at_well_known_and_root() {
        let app = build_app(sample_state());
        for path in ["/.well-known/agent.json", "/"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn options_returns_no_content() {
        let app = build_app(sample_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let app = build_app(sample_state());
        let body = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "no/such"}).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: JsonRpcResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.error.unwrap().code, rpc_code::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn wrong_jsonrpc_version_is_rejected() {
        let app = build_app(sample_state());
        let body = serde_json::json!({"jsonrpc": "1.0", "id": 1, "method": "tasks/get"}).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: JsonRpcResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.error.unwrap().code, rpc_code::INVALID_REQUEST);
    }

    struct EchoHandler;

    #[async_trait]
    impl crate::server::rpc::RpcHandler for EchoHandler {
        async fn handle(&self, params: serde_json::Value) -> Result<serde_json::Value, JsonRpcError> {
            Ok(params)
        }
    }

    #[tokio::test]
    async fn registered_method_dispatches_and_echoes_result() {
        let mut state = sample_state();
        let mut router = RpcRouter::new();
        router.register("echo", Arc::new(EchoHandler));
        state.router = Arc::new(router);

        let app = build_app(state);
        let body = serde_json::json!({"jsonrpc": "2.0", "id": 7, "method": "echo", "params": {"x": 1}}).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: JsonRpcResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.result.unwrap(), serde_json::json!({"x": 1}));
    }

    struct CountingSseHandler;

    #[async_trait]
    impl crate::server::rpc::SseHandler for CountingSseHandler {
        async fn handle(&self, _params: serde_json::Value, tx: mpsc::Sender<crate::server::rpc::SseFrame>) {
            let _ = tx
                .send(crate::server::rpc::SseFrame {
                    event: "status".to_string(),
                    data: serde_json::json!({"state": "submitted"}),
                })
                .await;
            let _ = tx
                .send(crate::server::rpc::SseFrame {
                    event: "result".to_string(),
                    data: serde_json::json!({"state": "completed"}),
                })
                .await;
        }
    }

    #[tokio::test]
    async fn sse_method_streams_event_frames() {
        let mut state = sample_state();
        let mut router = RpcRouter::new();
        router.register_sse("tasks/sendSubscribe", Arc::new(CountingSseHandler));
        state.router = Arc::new(router);

        let app = build_app(state);
        let body =
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tasks/sendSubscribe", "params": {}}).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: status"));
        assert!(text.contains("event: result"));
    }
}
