//! HTTP and WebSocket handlers

use super::types::{ClientMessage, HealthResponse};
use super::AppState;
use crate::llm::LlmService;
use crate::runtime::{start_session, ClientEvent, SessionCommand};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;

/// How long a new connection may wait before sending `start_session`
const START_TIMEOUT: Duration = Duration::from_secs(30);

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: state.llm.as_ref().map(|llm| llm.model_id().to_string()),
    })
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

/// One connection, one session
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let tool_type = match wait_for_start(&mut receiver).await {
        Ok(tool_type) => tool_type,
        Err(message) => {
            reject(&mut sender, message).await;
            return;
        }
    };

    let Some(llm) = state.llm.clone() else {
        reject(&mut sender, "No LLM credentials configured".to_string()).await;
        return;
    };

    let handle = match start_session(&state.config, llm, &tool_type).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(tool_type = %tool_type, error = %e, "Session start failed");
            reject(&mut sender, e.to_string()).await;
            return;
        }
    };
    let session_id = handle.session_id.clone();
    tracing::info!(session_id = %session_id, tool_type = %tool_type, "WebSocket session opened");

    let mut writer = tokio::spawn(write_events(sender, handle.events));
    let mut reader = tokio::spawn(read_commands(receiver, handle.commands, session_id.clone()));

    // The writer finishes when the session ends; the reader when the client leaves.
    // Dropping the reader drops the command sender, which stops the session.
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => {
            // Let the session flush its final events before the socket goes away
            if tokio::time::timeout(Duration::from_secs(5), &mut writer).await.is_err() {
                writer.abort();
            }
        }
    }
    tracing::info!(session_id = %session_id, "WebSocket session closed");
}

/// Wait for the opening `start_session` message and return its tool type
async fn wait_for_start(receiver: &mut SplitStream<WebSocket>) -> Result<String, String> {
    let first = tokio::time::timeout(START_TIMEOUT, async {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    })
    .await
    .map_err(|_| "Timed out waiting for start_session".to_string())?
    .ok_or_else(|| "Connection closed before start_session".to_string())?;

    match serde_json::from_str::<ClientMessage>(&first) {
        Ok(ClientMessage::StartSession { tool_type }) => Ok(tool_type),
        Ok(_) => Err("First message must be start_session".to_string()),
        Err(e) => Err(format!("Invalid message: {e}")),
    }
}

async fn reject(sender: &mut SplitSink<WebSocket, Message>, message: String) {
    let event = ClientEvent::Error { message };
    if let Ok(json) = serde_json::to_string(&event) {
        let _ = sender.send(Message::Text(json)).await;
    }
    let _ = sender.send(Message::Close(None)).await;
}

async fn write_events(
    mut sender: SplitSink<WebSocket, Message>,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
) {
    while let Some(event) = events.recv().await {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize session event");
                continue;
            }
        };
        if sender.send(Message::Text(json)).await.is_err() {
            return;
        }
    }
    let _ = sender.send(Message::Close(None)).await;
}

async fn read_commands(
    mut receiver: SplitStream<WebSocket>,
    commands: mpsc::Sender<SessionCommand>,
    session_id: String,
) {
    while let Some(message) = receiver.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "WebSocket read failed");
                break;
            }
        };

        let command = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => message.into_command(),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Ignoring malformed client message");
                continue;
            }
        };
        match command {
            Ok(command) => {
                let stop = matches!(command, SessionCommand::Stop);
                if commands.send(command).await.is_err() || stop {
                    break;
                }
            }
            Err(e) => tracing::warn!(session_id = %session_id, error = %e, "Ignoring client message"),
        }
    }
}
