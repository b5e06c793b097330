use turnstile_config::{Config, StoreKind};
use turnstile_core::ConversationKey;

use crate::store::Store;

/// Strategy for displaying configuration information.
#[derive(Debug, Clone, Copy)]
pub struct InfoStrategy;

impl super::CommandStrategy for InfoStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;

        println!("=== turnstile Configuration ===\n");
        println!("Config file: {}", Config::config_path()?.display());
        println!();

        println!("State store:");
        println!("  Kind: {:?}", config.store.kind);
        if config.store.kind == StoreKind::Sqlite {
            println!("  Path: {}", config.store.resolved_path()?.display());
        }
        match Store::open(&config.store).await {
            Ok(store) => {
                let conversations = store
                    .keys()
                    .await?
                    .iter()
                    .filter(|key| ConversationKey::from_storage_key(key).is_some())
                    .count();
                println!("  Status: Connected");
                println!("  Stored conversations: {conversations}");
            }
            Err(e) => {
                println!("  Status: Connection failed");
                println!("  Error: {e}");
            }
        }
        println!();

        println!("Turn gate:");
        println!("  Reset on error: {}", config.gate.reset_on_error);
        println!("  Fault message: {}", config.gate.fault_message);
        println!();

        println!("Logging:");
        println!("  Level: {}", config.logging.level);

        Ok(())
    }
}
