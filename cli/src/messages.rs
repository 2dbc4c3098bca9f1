//! WebSocket message types for the Shiftswap chat protocol
//!
//! These types mirror the server's protocol.

use serde::{Deserialize, Serialize};

/// Messages from client to server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello { identity: String },
    Text { text: String },
    Postback { data: String },
}

/// Messages from server to client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected { identity: String },
    Reply { messages: Vec<Outbound> },
    Push { messages: Vec<Outbound> },
    Error { message: String },
}

/// A tappable button; empty data only closes the prompt
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn is_dismiss(&self) -> bool {
        self.data.is_empty()
    }
}

/// One message rendered by the bot
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Text {
        text: String,
    },
    Menu {
        title: String,
        text: String,
        buttons: Vec<Button>,
    },
    Confirm {
        text: String,
        yes: Button,
        no: Button,
    },
}

impl Outbound {
    /// Print-ready lines; buttons are numbered from `first`
    pub fn render(&self, first: usize) -> (Vec<String>, Vec<Button>) {
        let (mut lines, buttons) = match self {
            Outbound::Text { text } => (vec![text.clone()], Vec::new()),
            Outbound::Menu {
                title,
                text,
                buttons,
            } => (vec![format!("== {} ==", title), text.clone()], buttons.clone()),
            Outbound::Confirm { text, yes, no } => {
                (vec![text.clone()], vec![yes.clone(), no.clone()])
            }
        };
        for (i, button) in buttons.iter().enumerate() {
            lines.push(format!("  [{}] {}", first + i, button.label));
        }
        (lines, buttons)
    }
}
