// ABOUTME: HTTP and WebSocket surface of the gateway, built on axum.
// ABOUTME: Accepts chat submissions and pushes relay events to connected browsers.

use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xlm_grpc::ProviderDescriptor;

use crate::error::{GatewayError, Result};
use crate::events::RequestId;
use crate::relay::StreamingRelay;
use crate::session::{Session, SessionRequest, SessionState};
use crate::sink::{ChannelSink, EventHub, EventSink};
use crate::supervisor::RelaySupervisor;

/// Buffered events per WebSocket connection for its own submissions.
const CONNECTION_BUFFER: usize = 64;

const INDEX_PAGE: &str = "<!doctype html>\n<title>xlm-gateway</title>\n<p>xlm-gateway is running. Connect a client to <code>/ws</code> and submit prompts to <code>/send_message</code>.</p>\n";

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    pub relay: Arc<StreamingRelay>,
    pub supervisor: RelaySupervisor,
    pub hub: EventHub,
    pub provider: String,
    pub model: String,
    /// Fires when the server starts shutting down; open sockets close on it.
    pub shutdown: CancellationToken,
}

impl AppState {
    fn chat_request(&self, prompt: String) -> Result<SessionRequest> {
        self.session
            .chat_request(prompt, self.provider.as_str(), self.model.as_str())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SendMessage {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub client_id: String,
    pub in_flight: usize,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            err if err.is_client_error() => StatusCode::BAD_REQUEST,
            GatewayError::Busy { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": client_message(&self) }))).into_response()
    }
}

fn client_message(err: &GatewayError) -> String {
    match err {
        GatewayError::EmptyPrompt => "Prompt cannot be empty".to_string(),
        other => other.to_string(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/send_message", post(send_message))
        .route("/providers", get(providers))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Serve `state` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Gateway listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = match state.session.state() {
        SessionState::Invalidated => "invalidated",
        _ => "ok",
    };
    Json(HealthResponse {
        status,
        client_id: state.session.client_id().to_string(),
        in_flight: state.supervisor.in_flight(),
    })
}

async fn providers(State(state): State<AppState>) -> Result<Json<Vec<ProviderDescriptor>>> {
    Ok(Json(state.session.list_providers().await?))
}

async fn send_message(
    State(state): State<AppState>,
    body: std::result::Result<Json<SendMessage>, JsonRejection>,
) -> Result<Json<serde_json::Value>> {
    let Json(body) = body.map_err(|rejection| {
        debug!(error = %rejection, "Rejected send_message body");
        GatewayError::EmptyPrompt
    })?;
    let request = state.chat_request(body.message)?;
    let request_id = RequestId::new();

    let relay = Arc::clone(&state.relay);
    let hub = state.hub.clone();
    state
        .supervisor
        .submit(move |cancel| async move {
            run_relay(&relay, request, request_id, &hub, &cancel).await;
        })?;

    info!(request_id = %request_id, "Chat submitted");
    Ok(Json(json!({
        "status": "streaming started",
        "request_id": request_id,
    })))
}

async fn run_relay(
    relay: &StreamingRelay,
    request: SessionRequest,
    request_id: RequestId,
    sink: &dyn EventSink,
    cancel: &CancellationToken,
) {
    match relay.relay(request, request_id, sink, cancel).await {
        Ok(_) => {}
        Err(GatewayError::Cancelled) => debug!(request_id = %request_id, "Relay cancelled"),
        Err(e) => warn!(request_id = %request_id, error = %e, "Relay ended early"),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("WebSocket connected");
    let connection = CancellationToken::new();
    let mut hub_events = state.hub.subscribe();
    let (sink, mut own_events) = ChannelSink::channel(CONNECTION_BUFFER);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            Some(event) = hub_events.recv() => {
                if send_frame(&mut socket, event.to_json()).await.is_err() {
                    break;
                }
            }
            Some(event) = own_events.recv() => {
                if send_frame(&mut socket, event.to_json()).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = submit_from_socket(&state, &sink, &connection, &text) {
                        if send_frame(&mut socket, error_frame(&e)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }

    connection.cancel();
    info!("WebSocket disconnected");
}

/// Start a relay whose events go to this connection only.
fn submit_from_socket(
    state: &AppState,
    sink: &ChannelSink,
    connection: &CancellationToken,
    text: &str,
) -> Result<RequestId> {
    let submission: SendMessage = serde_json::from_str(text).unwrap_or_else(|e| {
        debug!(error = %e, "Unreadable WebSocket submission");
        SendMessage::default()
    });
    let request = state.chat_request(submission.message)?;
    let request_id = RequestId::new();

    let relay = Arc::clone(&state.relay);
    let sink = sink.clone();
    state
        .supervisor
        .submit_linked(connection, move |cancel| async move {
            run_relay(&relay, request, request_id, &sink, &cancel).await;
        })?;

    info!(request_id = %request_id, "Chat submitted over WebSocket");
    Ok(request_id)
}

fn error_frame(err: &GatewayError) -> String {
    json!({ "event": "error", "data": { "message": client_message(err) } }).to_string()
}

async fn send_frame(socket: &mut WebSocket, frame: String) -> std::result::Result<(), axum::Error> {
    socket.send(Message::Text(frame)).await
}
