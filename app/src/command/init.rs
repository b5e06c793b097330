use tracing::info;
use turnstile_config::Config;

/// Writes the config template, then reads it back so a broken template
/// fails here rather than on the first `chat`.
#[derive(Debug, Clone, Copy)]
pub struct InitStrategy;

impl super::CommandStrategy for InitStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        Config::create_config()?;

        let config = Config::load()?;
        let state_path = config.store.resolved_path()?;
        info!("Template validated, store={:?}", config.store.kind);
        println!("State will be kept in: {}", state_path.display());
        Ok(())
    }
}
