use crate::error::handle_error;
use crate::serial::list_ports;
use crate::types::{AppState, Call};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use std::sync::{Arc, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ports", get(ports_handler))
        .route("/calls", get(calls_handler))
        .route("/events", get(events_handler))
        .route("/", get(health_handler))
        .with_state(app_state)
}

pub async fn health_handler() -> &'static str {
    "ok"
}

pub async fn ports_handler() -> impl IntoResponse {
    // enumeration can block on some platforms
    match tokio::task::spawn_blocking(list_ports).await {
        Ok(Ok(ports)) => Ok(Json(ports)),
        Ok(Err(e)) => {
            handle_error(e).await;
            Err((StatusCode::INTERNAL_SERVER_ERROR, "failed to list ports"))
        }
        Err(e) => {
            error!(error=%e, "port listing task failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "failed to list ports"))
        }
    }
}

pub async fn calls_handler(State(app_state): State<Arc<AppState>>) -> Json<Vec<Call>> {
    let mut calls: Vec<Call> = {
        let calls = app_state
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        calls.values().cloned().collect()
    };
    calls.sort_by(|a, b| a.line.cmp(&b.line));
    Json(calls)
}

pub async fn events_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| socket_handler(socket, app_state))
}

/// Stream every monitor event to a websocket client as JSON text frames until
/// the client goes away.
async fn socket_handler(socket: WebSocket, app_state: Arc<AppState>) {
    let (mut client_sink, mut client_stream) = socket.split();
    let mut events = app_state.events.subscribe();
    info!("event feed client connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            error!(error=%e, "failed to serialize event");
                            continue;
                        }
                    };
                    if let Err(e) = client_sink.send(Message::Text(json)).await {
                        debug!(error=%e, "failed to send event to client");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event feed client lagging; events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            msg = client_stream.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => (),
                Some(Err(e)) => {
                    debug!(error=%e, "event feed client errored");
                    break;
                }
            }
        }
    }

    info!("event feed client disconnected");
}
