use clap::Subcommand;
use tokio_util::sync::CancellationToken;
use turnstile_config::Config;
use turnstile_core::ConversationKey;

use super::build_adapter;

#[derive(Debug, Clone, Subcommand)]
pub enum SessionsAction {
    /// List conversations with stored state
    List,
    /// Delete a conversation's stored state
    Clear {
        /// Conversation key
        key: String,
    },
}

/// Strategy for inspecting and clearing stored conversation state.
#[derive(Debug, Clone, Copy)]
pub struct SessionsStrategy;

impl super::CommandStrategy for SessionsStrategy {
    type Input = SessionsAction;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;
        let (adapter, store) = build_adapter(&config).await?;

        match input {
            SessionsAction::List => {
                let conversations: Vec<ConversationKey> = store
                    .keys()
                    .await?
                    .iter()
                    .filter_map(|key| ConversationKey::from_storage_key(key))
                    .collect();

                if conversations.is_empty() {
                    println!("No stored conversations.");
                }
                for conversation in conversations {
                    println!("{conversation}");
                }
            }
            SessionsAction::Clear { key } => {
                let conversation = ConversationKey::new(key);
                adapter
                    .gatekeeper()
                    .reset_conversation(&conversation, &CancellationToken::new())
                    .await?;
                println!("Cleared conversation: {conversation}");
            }
        }

        Ok(())
    }
}
