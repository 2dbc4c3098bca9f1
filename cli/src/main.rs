//! Shiftswap CLI - chat with the duty exchange bot from a terminal

mod client;
mod messages;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::client::ShiftswapClient;
use crate::messages::{Button, Outbound, ServerMessage};

#[derive(Parser)]
#[command(name = "shiftswap")]
#[command(about = "Terminal chat client for the Shiftswap duty exchange bot")]
#[command(version)]
struct Cli {
    /// Server URL
    #[arg(short, long, default_value = "ws://localhost:3000/ws")]
    server: String,

    /// Messaging identity to chat as
    #[arg(short, long, env = "SHIFTSWAP_IDENTITY")]
    identity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat; type a number to tap a button
    Chat,

    /// Send one text message and print the reply
    Say {
        text: String,

        /// Seconds to wait for a reply
        #[arg(long, default_value_t = 3)]
        wait: u64,
    },

    /// Send raw button data and print the reply
    Tap {
        data: String,

        /// Seconds to wait for a reply
        #[arg(long, default_value_t = 3)]
        wait: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shiftswap_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    let mut client = ShiftswapClient::connect(&cli.server).await?;
    client.hello(&cli.identity).await?;

    match cli.command {
        Commands::Chat => run_chat(client).await,
        Commands::Say { text, wait } => {
            client.text(&text).await?;
            print_reply(&mut client, wait).await
        }
        Commands::Tap { data, wait } => {
            client.tap(&data).await?;
            print_reply(&mut client, wait).await
        }
    }
}

async fn print_reply(client: &mut ShiftswapClient, wait: u64) -> Result<()> {
    let mut buttons = Vec::new();
    let messages = client
        .reply(Duration::from_secs(wait), |pushed| {
            print_messages("push", &pushed, &mut buttons)
        })
        .await?;
    if messages.is_empty() {
        println!("(no reply)");
    } else {
        print_messages("bot", &messages, &mut buttons);
    }
    Ok(())
}

async fn run_chat(mut client: ShiftswapClient) -> Result<()> {
    println!("Type a message, a button number, or /quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut buttons: Vec<Button> = Vec::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }

                let picked = line
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| buttons.get(i).cloned());

                match picked {
                    Some(button) => {
                        buttons.clear();
                        if !button.is_dismiss() {
                            client.tap(&button.data).await?;
                        }
                    }
                    None => client.text(line).await?,
                }
            }
            msg = client.recv() => {
                match msg {
                    Some(ServerMessage::Reply { messages }) => {
                        buttons.clear();
                        print_messages("bot", &messages, &mut buttons);
                    }
                    Some(ServerMessage::Push { messages }) => {
                        print_messages("push", &messages, &mut buttons);
                    }
                    Some(ServerMessage::Error { message }) => eprintln!("error: {}", message),
                    Some(ServerMessage::Connected { .. }) => {}
                    None => {
                        println!("Connection closed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Print messages and append their buttons to the numbered list
fn print_messages(source: &str, messages: &[Outbound], buttons: &mut Vec<Button>) {
    for message in messages {
        let (lines, new_buttons) = message.render(buttons.len() + 1);
        println!("[{}]", source);
        for line in lines {
            println!("{}", line);
        }
        buttons.extend(new_buttons);
    }
    println!();
}
