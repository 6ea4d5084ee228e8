//! HTTP side of the servo RPC channel.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::constants::{
    MAX_SESSIONS, RPC_PATH, SESSION_HEADER, SESSION_IDLE_TIMEOUT_SECS, TOOL_NAME,
};
use crate::orchestrator::Orchestrator;
use crate::rpc::protocol::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    // `initialize` answered, waiting for `notifications/initialized`
    Initializing,
    Ready,
}

#[derive(Debug)]
struct Session {
    state: SessionState,
    last_seen: Instant,
}

/// Open sessions. Idle ones are pruned and the table never exceeds `capacity`.
#[derive(Debug)]
struct SessionTable {
    sessions: HashMap<String, Session>,
    idle_timeout: Duration,
    capacity: usize,
}

impl SessionTable {
    fn new(idle_timeout: Duration, capacity: usize) -> Self {
        SessionTable {
            sessions: HashMap::new(),
            idle_timeout,
            capacity: capacity.max(1),
        }
    }

    fn open(&mut self) -> String {
        let now = Instant::now();
        let idle_timeout = self.idle_timeout;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now.duration_since(session.last_seen) < idle_timeout);
        if self.sessions.len() < before {
            tracing::debug!("Dropped {} idle session(s)", before - self.sessions.len());
        }

        while self.sessions.len() >= self.capacity {
            let oldest = self
                .sessions
                .iter()
                .min_by_key(|(_, session)| session.last_seen)
                .map(|(id, _)| id.clone());
            let Some(oldest) = oldest else { break };
            self.sessions.remove(&oldest);
            tracing::info!("Evicted least recently used session {}", oldest);
        }

        let id = Uuid::new_v4().to_string();
        self.sessions.insert(
            id.clone(),
            Session {
                state: SessionState::Initializing,
                last_seen: now,
            },
        );
        id
    }

    /// Looks up a session and records that it was used.
    fn touch(&mut self, id: &str) -> Option<SessionState> {
        let session = self.sessions.get_mut(id)?;
        session.last_seen = Instant::now();
        Some(session.state)
    }

    fn mark_ready(&mut self, id: &str) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.state = SessionState::Ready;
        }
    }

    fn close(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}

pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    sessions: Mutex<SessionTable>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self::with_session_limits(
            orchestrator,
            Duration::from_secs(SESSION_IDLE_TIMEOUT_SECS),
            MAX_SESSIONS,
        )
    }

    pub fn with_session_limits(
        orchestrator: Arc<Orchestrator>,
        idle_timeout: Duration,
        max_sessions: usize,
    ) -> Self {
        AppState {
            orchestrator,
            sessions: Mutex::new(SessionTable::new(idle_timeout, max_sessions)),
        }
    }
}

/// Create the router serving the RPC endpoint and health check
pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    router_with_state(Arc::new(AppState::new(orchestrator)))
}

pub fn router_with_state(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            RPC_PATH,
            post(rpc_handler).delete(close_session_handler).get(stream_handler),
        )
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    listener: TcpListener,
    orchestrator: Arc<Orchestrator>,
) -> std::io::Result<()> {
    axum::serve(listener, create_router(orchestrator)).await
}

fn reply(response: RpcResponse) -> Response {
    (StatusCode::OK, Json(response)).into_response()
}

fn reject(status: StatusCode, id: Value, code: i64, message: &str) -> Response {
    (status, Json(RpcResponse::failure(id, RpcError::new(code, message)))).into_response()
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn rpc_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            let message = format!("Parse error: {}", e);
            return reject(StatusCode::BAD_REQUEST, Value::Null, PARSE_ERROR, &message);
        }
    };
    let request: RpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(_) => {
            return reject(StatusCode::BAD_REQUEST, Value::Null, INVALID_REQUEST, "Invalid request")
        }
    };
    if request.jsonrpc != JSONRPC_VERSION {
        let id = request.id.unwrap_or(Value::Null);
        let message = "Unsupported jsonrpc version";
        return reject(StatusCode::BAD_REQUEST, id, INVALID_REQUEST, message);
    }

    if request.method == METHOD_INITIALIZE {
        return initialize(&state, request);
    }

    let Some(session) = session_id(&headers) else {
        let id = request.id.unwrap_or(Value::Null);
        let message = "Missing session id; call initialize first";
        return reject(StatusCode::BAD_REQUEST, id, INVALID_REQUEST, message);
    };
    let Some(session_state) = state.sessions.lock().touch(&session) else {
        let id = request.id.unwrap_or(Value::Null);
        return reject(StatusCode::NOT_FOUND, id, INVALID_REQUEST, "Unknown session");
    };

    if request.is_notification() {
        if request.method == METHOD_INITIALIZED {
            state.sessions.lock().mark_ready(&session);
            tracing::debug!("Session {} ready", session);
        }
        return StatusCode::ACCEPTED.into_response();
    }
    let id = request.id.clone().unwrap_or(Value::Null);

    match request.method.as_str() {
        METHOD_PING => reply(RpcResponse::success(id, json!({}))),
        METHOD_TOOLS_LIST => {
            reply(RpcResponse::success(id, json!({ "tools": [tool_descriptor()] })))
        }
        METHOD_TOOLS_CALL => {
            if session_state != SessionState::Ready {
                return reply(RpcResponse::failure(
                    id,
                    RpcError::new(SESSION_NOT_INITIALIZED, "Session not initialized"),
                ));
            }
            call_tool(&state, id, request.params).await
        }
        other => reply(RpcResponse::failure(
            id,
            RpcError::new(METHOD_NOT_FOUND, format!("Method not found: {}", other)),
        )),
    }
}

fn initialize(state: &AppState, request: RpcRequest) -> Response {
    let Some(id) = request.id else {
        let message = "initialize must be a request";
        return reject(StatusCode::BAD_REQUEST, Value::Null, INVALID_REQUEST, message);
    };

    let session = state.sessions.lock().open();
    tracing::info!("New RPC session {}", session);

    let mut response = reply(RpcResponse::success(id, initialize_result()));
    if let Ok(value) = HeaderValue::from_str(&session) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

async fn call_tool(state: &AppState, id: Value, params: Option<Value>) -> Response {
    let params = params
        .map(serde_json::from_value::<CallToolParams>)
        .transpose();
    let params = match params {
        Ok(Some(params)) => params,
        _ => {
            return reply(RpcResponse::failure(
                id,
                RpcError::new(INVALID_PARAMS, "tools/call needs name and arguments"),
            ))
        }
    };
    if params.name != TOOL_NAME {
        return reply(RpcResponse::failure(
            id,
            RpcError::new(INVALID_PARAMS, format!("Unknown tool: {}", params.name)),
        ));
    }
    let args: ServoArguments = match serde_json::from_value(params.arguments) {
        Ok(args) => args,
        Err(e) => {
            return reply(RpcResponse::failure(
                id,
                RpcError::new(INVALID_PARAMS, format!("Invalid arguments: {}", e)),
            ))
        }
    };

    tracing::info!("{} called with {} command(s)", TOOL_NAME, args.commands.len());
    // A started batch runs to completion even if the caller goes away,
    // so every held pin is released.
    let orchestrator = Arc::clone(&state.orchestrator);
    let batch = tokio::spawn(async move { orchestrator.execute_records(&args.commands).await });
    match batch.await {
        Ok(results) => reply(RpcResponse::success(id, tool_result(&results))),
        Err(e) => {
            tracing::error!("Batch task failed: {}", e);
            let error = RpcError::new(INTERNAL_ERROR, "Batch execution failed");
            reply(RpcResponse::failure(id, error))
        }
    }
}

async fn close_session_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> StatusCode {
    match session_id(&headers) {
        Some(session) if state.sessions.lock().close(&session) => {
            tracing::info!("Closed RPC session {}", session);
            StatusCode::OK
        }
        Some(_) => StatusCode::NOT_FOUND,
        None => StatusCode::BAD_REQUEST,
    }
}

// Server-initiated streams are not offered.
async fn stream_handler() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let limits = state.orchestrator.limits();
    Json(json!({
        "status": "ok",
        "backend_available": state.orchestrator.backend_available(),
        "sessions": state.sessions.lock().len(),
        "allowed_pins": limits.allowed_pins,
        "capped_pins": limits.capped_pins,
        "angle_cap": limits.angle_cap,
    }))
}
