//! Outbound messages and their delivery
//!
//! Replies travel back on the connection that sent the inbound event. Pushes
//! go through a [`NotificationGateway`], addressed by messaging identity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::error::Result;

/// A tappable button; `data` is posted back verbatim when tapped
///
/// Empty data marks a dismiss button, which the server ignores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl ToString) -> Self {
        Self {
            label: label.into(),
            data: data.to_string(),
        }
    }

    pub fn dismiss(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: String::new(),
        }
    }
}

/// One outbound chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Text {
        text: String,
    },
    /// A list of choices
    Menu {
        title: String,
        text: String,
        buttons: Vec<Button>,
    },
    /// A yes/no question
    Confirm {
        text: String,
        yes: Button,
        no: Button,
    },
}

impl Outbound {
    pub fn text(text: impl Into<String>) -> Self {
        Outbound::Text { text: text.into() }
    }

    pub fn menu(title: impl Into<String>, text: impl Into<String>, buttons: Vec<Button>) -> Self {
        Outbound::Menu {
            title: title.into(),
            text: text.into(),
            buttons,
        }
    }

    pub fn confirm(text: impl Into<String>, yes: Button, no: Button) -> Self {
        Outbound::Confirm {
            text: text.into(),
            yes,
            no,
        }
    }

    /// Main text of the message
    pub fn body(&self) -> &str {
        match self {
            Outbound::Text { text } | Outbound::Menu { text, .. } | Outbound::Confirm { text, .. } => {
                text
            }
        }
    }

    /// Every button carried by the message, in display order
    pub fn buttons(&self) -> Vec<&Button> {
        match self {
            Outbound::Text { .. } => Vec::new(),
            Outbound::Menu { buttons, .. } => buttons.iter().collect(),
            Outbound::Confirm { yes, no, .. } => vec![yes, no],
        }
    }
}

/// Delivers pushes to a worker's messaging identity
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn push(&self, identity: &str, messages: Vec<Outbound>) -> Result<()>;

    /// Drop anything still held for `identity`, which no longer belongs to a worker
    async fn forget(&self, identity: &str) -> Result<()>;
}

type Mailbox = mpsc::UnboundedSender<Vec<Outbound>>;

/// Most pushes held for one offline identity; older ones are dropped first
pub const MAX_BACKLOG: usize = 50;

/// Push delivery to live websocket sessions
///
/// Pushes for an identity with no open session wait in a backlog that is
/// flushed when the identity connects again. Each backlog keeps at most
/// [`MAX_BACKLOG`] pushes.
#[derive(Default)]
pub struct ConnectionHub {
    sessions: RwLock<HashMap<String, (Uuid, Mailbox)>>,
    backlog: Mutex<HashMap<String, Vec<Vec<Outbound>>>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to a new session, replacing any older one
    ///
    /// Returns the session id (needed to disconnect) and the push receiver,
    /// already holding any backlog.
    pub async fn connect(&self, identity: &str) -> (Uuid, mpsc::UnboundedReceiver<Vec<Outbound>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = Uuid::new_v4();

        let pending = self.backlog.lock().await.remove(identity).unwrap_or_default();
        for messages in pending {
            // Receiver is held locally, send cannot fail here
            let _ = tx.send(messages);
        }

        self.sessions
            .write()
            .await
            .insert(identity.to_string(), (session_id, tx));
        tracing::debug!("Session {} bound to {}", session_id, identity);

        (session_id, rx)
    }

    /// Drop the session if it is still the current one for `identity`
    pub async fn disconnect(&self, identity: &str, session_id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(identity).is_some_and(|(id, _)| *id == session_id) {
            sessions.remove(identity);
            tracing::debug!("Session {} for {} closed", session_id, identity);
        }
    }

    pub async fn is_connected(&self, identity: &str) -> bool {
        self.sessions.read().await.contains_key(identity)
    }

    /// Number of queued pushes waiting for `identity`
    pub async fn backlog_len(&self, identity: &str) -> usize {
        self.backlog.lock().await.get(identity).map_or(0, Vec::len)
    }
}

#[async_trait]
impl NotificationGateway for ConnectionHub {
    async fn push(&self, identity: &str, messages: Vec<Outbound>) -> Result<()> {
        let undelivered = {
            let sessions = self.sessions.read().await;
            match sessions.get(identity) {
                Some((_, tx)) => tx.send(messages).err().map(|e| e.0),
                None => Some(messages),
            }
        };

        if let Some(messages) = undelivered {
            tracing::debug!("{} is offline, queueing push", identity);
            let mut backlog = self.backlog.lock().await;
            let queue = backlog.entry(identity.to_string()).or_default();
            queue.push(messages);
            if queue.len() > MAX_BACKLOG {
                let dropped = queue.len() - MAX_BACKLOG;
                queue.drain(..dropped);
                tracing::warn!("Backlog for {} is full, dropped {} oldest push(es)", identity, dropped);
            }
        }
        Ok(())
    }

    async fn forget(&self, identity: &str) -> Result<()> {
        if let Some(queue) = self.backlog.lock().await.remove(identity) {
            tracing::debug!("Discarded {} queued push(es) for {}", queue.len(), identity);
        }
        Ok(())
    }
}

/// Gateway that only records what it was asked to push
#[derive(Default)]
pub struct RecordingGateway {
    pushes: Mutex<Vec<(String, Vec<Outbound>)>>,
    forgotten: Mutex<Vec<String>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pushes(&self) -> Vec<(String, Vec<Outbound>)> {
        self.pushes.lock().await.clone()
    }

    /// Messages pushed to `identity`, flattened in delivery order
    pub async fn pushed_to(&self, identity: &str) -> Vec<Outbound> {
        self.pushes
            .lock()
            .await
            .iter()
            .filter(|(to, _)| to == identity)
            .flat_map(|(_, messages)| messages.iter().cloned())
            .collect()
    }

    /// Identities passed to `forget`, in call order
    pub async fn forgotten(&self) -> Vec<String> {
        self.forgotten.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.pushes.lock().await.clear();
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn push(&self, identity: &str, messages: Vec<Outbound>) -> Result<()> {
        self.pushes
            .lock()
            .await
            .push((identity.to_string(), messages));
        Ok(())
    }

    async fn forget(&self, identity: &str) -> Result<()> {
        self.forgotten.lock().await.push(identity.to_string());
        Ok(())
    }
}
