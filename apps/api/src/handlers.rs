use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use messaging_cell::{InboundEmailRequest, InboundSmsRequest, MessagingError};
use shared_models::error::AppError;
use voice_cell::ClientFrame;

use crate::state::AppState;

const VOICE_CHANNEL_CAPACITY: usize = 64;

fn map_messaging_error(e: MessagingError) -> AppError {
    match e {
        MessagingError::InvalidRequest(msg) => AppError::BadRequest(msg),
        MessagingError::Store(e) => AppError::Database(e.to_string()),
        MessagingError::Delivery(msg) => AppError::ExternalService(msg),
        other => AppError::Internal(other.to_string()),
    }
}

/// Inbound SMS webhook: the reply text is returned in the webhook response.
pub async fn inbound_sms(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InboundSmsRequest>,
) -> Result<Json<Value>, AppError> {
    let reply = state
        .inbound
        .handle_inbound_sms(request)
        .await
        .map_err(map_messaging_error)?;

    Ok(Json(json!({ "reply": reply })))
}

/// Inbound email webhook, keyed by sender address.
pub async fn inbound_email(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InboundEmailRequest>,
) -> Result<Json<Value>, AppError> {
    let reply = state
        .inbound
        .handle_inbound_email(request)
        .await
        .map_err(map_messaging_error)?;

    Ok(Json(json!({ "reply": reply })))
}

#[derive(Debug, Deserialize)]
pub struct VoiceQuery {
    pub caller: Option<String>,
}

/// Upgrade to the voice websocket and hand the connection to a session.
pub async fn voice_ws(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VoiceQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_voice_socket(state, query.caller, socket))
}

/// Pump client frames into the session and relay its frames back. The
/// session task owns the upstream provider socket and finalizes the call
/// when either side disconnects.
async fn handle_voice_socket(state: Arc<AppState>, caller: Option<String>, socket: WebSocket) {
    let (client_tx, client_rx) = mpsc::channel(VOICE_CHANNEL_CAPACITY);
    let (server_tx, mut server_rx) = mpsc::channel(VOICE_CHANNEL_CAPACITY);

    let voice = state.voice.clone();
    let session = tokio::spawn(async move { voice.run(caller, client_rx, server_tx).await });

    let (mut ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = server_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(_) => continue,
            };
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            WsMessage::Text(text) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(frame) => {
                    let ending = frame == ClientFrame::EndSession;
                    if client_tx.send(frame).await.is_err() {
                        break;
                    }
                    if ending {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Dropping malformed voice client frame: {}", e);
                }
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    // Closing the channel tells the session to finalize.
    drop(client_tx);

    match session.await {
        Ok(Ok(conversation_id)) => {
            info!("Voice session ended: conversation {}", conversation_id)
        }
        Ok(Err(e)) => error!("Voice session failed: {}", e),
        Err(e) => error!("Voice session task panicked: {}", e),
    }
    writer.abort();
}
