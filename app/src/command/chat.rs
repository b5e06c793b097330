//! Interactive chat through the turn gate.
//!
//! Every line typed is one inbound turn delivered by a simulated relay
//! client. `/replay` retransmits the previous turn verbatim, which the gate
//! discards once a newer token has been issued.

use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing::info;
use turnstile_config::Config;
use turnstile_core::{Activity, ConversationKey, InboundTurn};
use turnstile_lock::KeyedMutex;
use uuid::Uuid;

use super::{EchoAdapter, build_adapter};
use crate::relay::RelayClient;

/// Input parameters for the Chat command strategy.
#[derive(Debug, Clone)]
pub struct ChatInput {
    /// Conversation key to resume (a new one is generated if not provided)
    pub conversation: Option<String>,
    /// User id for user-scoped state
    pub user: Option<String>,
    /// Optional single message to send (non-interactive mode)
    pub message: Option<String>,
}

/// Strategy for executing the Chat command.
#[derive(Debug, Clone, Copy)]
pub struct ChatStrategy;

fn print_replies(replies: &[Activity]) {
    if replies.is_empty() {
        println!("(no reply)");
    }
    for reply in replies.iter().filter(|a| a.is_message()) {
        println!("{}", reply.text.as_deref().unwrap_or_default());
    }
}

async fn deliver(
    adapter: &EchoAdapter,
    client: &mut RelayClient,
    turn: InboundTurn,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let replies = adapter.handle(turn, cancel).await?;
    client.receive(&replies);
    print_replies(&replies);
    Ok(())
}

async fn run_interactive(
    adapter: &EchoAdapter,
    client: &mut RelayClient,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    println!("=== Conversation: {} ===", client.conversation());
    println!("Type 'exit' to quit, '/replay' to resend the last turn, '/reset' to clear state.\n");

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        match input {
            "" => {}
            "exit" | "quit" | "q" => break,
            "/replay" => match client.replay() {
                Some(turn) => deliver(adapter, client, turn, cancel).await?,
                None => println!("Nothing to replay yet."),
            },
            "/reset" => {
                adapter
                    .gatekeeper()
                    .reset_conversation(client.conversation(), cancel)
                    .await?;
                client.reset();
                println!("Conversation state cleared.");
            }
            text => {
                let turn = client.send(text);
                deliver(adapter, client, turn, cancel).await?;
            }
        }
    }

    Ok(())
}

impl super::CommandStrategy for ChatStrategy {
    type Input = ChatInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load_or_default()?;
        let (adapter, _store) = build_adapter(&config).await?;

        let conversation = ConversationKey::new(
            input
                .conversation
                .unwrap_or_else(|| format!("cli:{}", Uuid::now_v7())),
        );
        info!("Starting conversation: {conversation}");

        let mut client = RelayClient::new(conversation, input.user);
        let cancel = CancellationToken::new();

        if let Some(message) = input.message {
            let turn = client.send(&message);
            deliver(&adapter, &mut client, turn, &cancel).await?;
        } else {
            run_interactive(&adapter, &mut client, &cancel).await?;
        }

        KeyedMutex::global().wait_idle().await;
        info!("Conversation ended: {}", client.conversation());
        Ok(())
    }
}
