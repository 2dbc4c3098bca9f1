//! WebSocket client for the Shiftswap server

use anyhow::{anyhow, bail, Result};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::messages::{ClientMessage, Outbound, ServerMessage};

/// WebSocket client bound to one messaging identity
pub struct ShiftswapClient {
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<ServerMessage>,
    #[allow(dead_code)]
    handle: tokio::task::JoinHandle<()>,
}

impl ShiftswapClient {
    /// Connect to a Shiftswap server
    pub async fn connect(server: &str) -> Result<Self> {
        let url = url::Url::parse(server)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            bail!("server URL must use ws:// or wss://, got {}", url);
        }
        tracing::info!("Connecting to {}", url);

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        // Channel for outgoing messages
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(32);

        // Channel for incoming parsed messages
        let (in_tx, in_rx) = mpsc::channel::<ServerMessage>(32);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = out_rx.recv() => {
                        if write.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Some(result) = read.next() => {
                        match result {
                            Ok(Message::Text(text)) => {
                                match serde_json::from_str::<ServerMessage>(&text) {
                                    Ok(msg) => {
                                        if in_tx.send(msg).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!("Failed to parse message: {} - {}", e, text);
                                    }
                                }
                            }
                            Ok(Message::Close(_)) => break,
                            Err(e) => {
                                tracing::error!("WebSocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    else => break,
                }
            }
        });

        Ok(Self {
            tx: out_tx,
            rx: in_rx,
            handle,
        })
    }

    async fn send(&self, msg: ClientMessage) -> Result<()> {
        let json = serde_json::to_string(&msg)?;
        self.tx
            .send(Message::Text(json))
            .await
            .map_err(|e| anyhow!("Failed to send message: {}", e))
    }

    /// Receive a message from the server
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    /// Bind the connection to `identity`
    pub async fn hello(&mut self, identity: &str) -> Result<()> {
        self.send(ClientMessage::Hello {
            identity: identity.to_string(),
        })
        .await?;

        while let Some(msg) = self.recv().await {
            match msg {
                ServerMessage::Connected { .. } => return Ok(()),
                ServerMessage::Error { message } => {
                    return Err(anyhow!("Server error: {}", message));
                }
                _ => continue,
            }
        }

        Err(anyhow!("Connection closed"))
    }

    pub async fn text(&self, text: &str) -> Result<()> {
        self.send(ClientMessage::Text {
            text: text.to_string(),
        })
        .await
    }

    /// Send the data of a tapped button
    pub async fn tap(&self, data: &str) -> Result<()> {
        self.send(ClientMessage::Postback {
            data: data.to_string(),
        })
        .await
    }

    /// Collect the reply to the last message
    ///
    /// The bot stays silent on unrecognized input, so an empty list comes
    /// back once `wait` passes without a reply. Pushes seen meanwhile are
    /// handed to `on_push`.
    pub async fn reply<F>(&mut self, wait: Duration, mut on_push: F) -> Result<Vec<Outbound>>
    where
        F: FnMut(Vec<Outbound>),
    {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.recv()).await {
                Err(_) => return Ok(Vec::new()),
                Ok(None) => return Err(anyhow!("Connection closed")),
                Ok(Some(ServerMessage::Reply { messages })) => return Ok(messages),
                Ok(Some(ServerMessage::Push { messages })) => on_push(messages),
                Ok(Some(ServerMessage::Error { message })) => {
                    return Err(anyhow!("Server error: {}", message));
                }
                Ok(Some(ServerMessage::Connected { .. })) => continue,
            }
        }
    }
}
