//! Static strategy pattern for CLI commands.
//!
//! Each command is a separate strategy type with its own input type,
//! dispatched statically from `main`.

use std::sync::Arc;
use tracing::info;
use turnstile_config::Config;
use turnstile_gate::{Adapter, ApologyNotifier, TurnGatekeeper};

use crate::dialog::EchoDialog;
use crate::store::Store;

mod chat;
mod info;
mod init;
mod sessions;
mod version;

pub use chat::{ChatInput, ChatStrategy};
pub use info::InfoStrategy;
pub use init::InitStrategy;
pub use sessions::{SessionsAction, SessionsStrategy};
pub use version::VersionStrategy;

pub type EchoAdapter = Adapter<Arc<Store>, EchoDialog, ApologyNotifier>;

/// Open the configured store and wire it to the echo dialog.
async fn build_adapter(config: &Config) -> anyhow::Result<(EchoAdapter, Arc<Store>)> {
    let store = Arc::new(Store::open(&config.store).await?);
    info!(
        "Gate settings: reset_on_error={}, store={:?}",
        config.gate.reset_on_error, config.store.kind
    );

    let gatekeeper = TurnGatekeeper::new(Arc::clone(&store), EchoDialog);
    let notifier = ApologyNotifier::new(config.gate.fault_message.clone(), config.gate.reset_on_error);
    Ok((Adapter::new(gatekeeper, notifier), store))
}

/// Core trait defining the contract for all command strategies.
///
/// Each strategy defines its own input type via the associated type, so
/// parameters are passed without runtime casting or boxing.
pub trait CommandStrategy: Send + Sync + 'static {
    /// The input type this strategy accepts.
    type Input;

    /// Execute the command with the given input.
    ///
    /// # Errors
    /// Returns an error if command execution fails.
    async fn execute(&self, input: Self::Input) -> anyhow::Result<()>;
}
