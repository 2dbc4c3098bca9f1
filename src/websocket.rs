//! WebSocket chat transport

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::bot::InboundEvent;
use crate::gateway::Outbound;
use crate::AppState;

/// WebSocket handler
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut session: Option<(String, Uuid)> = None;
    let mut pushes: Option<mpsc::UnboundedReceiver<Vec<Outbound>>> = None;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                };

                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        let error = ServerMessage::Error {
                            message: format!("Invalid message: {}", e),
                        };
                        if let Err(e) = send(&mut sender, &error).await {
                            tracing::error!("Failed to send error: {}", e);
                        }
                        continue;
                    }
                };

                let reply = match client_msg {
                    ClientMessage::Hello { identity } => {
                        if let Some((old, session_id)) = session.take() {
                            state.hub.disconnect(&old, session_id).await;
                        }
                        let (session_id, rx) = state.hub.connect(&identity).await;
                        tracing::info!("{} connected", identity);
                        session = Some((identity.clone(), session_id));
                        pushes = Some(rx);
                        Some(ServerMessage::Connected { identity })
                    }
                    ClientMessage::Text { text } => {
                        dispatch(&state, session.as_ref(), InboundEvent::Text(text)).await
                    }
                    ClientMessage::Postback { data } => {
                        dispatch(&state, session.as_ref(), InboundEvent::Postback(data)).await
                    }
                };

                if let Some(reply) = reply {
                    if let Err(e) = send(&mut sender, &reply).await {
                        tracing::error!("Failed to send reply: {}", e);
                        break;
                    }
                }
            }
            Some(messages) = next_push(&mut pushes) => {
                if let Err(e) = send(&mut sender, &ServerMessage::Push { messages }).await {
                    tracing::error!("Failed to send push: {}", e);
                    break;
                }
            }
        }
    }

    if let Some((identity, session_id)) = session {
        state.hub.disconnect(&identity, session_id).await;
    }
}

async fn dispatch(
    state: &AppState,
    session: Option<&(String, Uuid)>,
    event: InboundEvent,
) -> Option<ServerMessage> {
    let Some((identity, _)) = session else {
        return Some(ServerMessage::Error {
            message: "Send hello with your identity first".to_string(),
        });
    };
    state
        .dispatcher
        .handle(identity, event)
        .await
        .map(|messages| ServerMessage::Reply { messages })
}

async fn next_push(
    pushes: &mut Option<mpsc::UnboundedReceiver<Vec<Outbound>>>,
) -> Option<Vec<Outbound>> {
    match pushes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    sender.send(Message::Text(json)).await
}

/// Messages from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind this connection to a messaging identity
    Hello { identity: String },
    /// Free text
    Text { text: String },
    /// Data of a tapped button
    Postback { data: String },
}

/// Messages from server to client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Identity bound; queued pushes follow
    Connected { identity: String },
    /// Answer to the last text or postback
    Reply { messages: Vec<Outbound> },
    /// Unsolicited delivery
    Push { messages: Vec<Outbound> },
    /// Error occurred
    Error { message: String },
}
