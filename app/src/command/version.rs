use turnstile_core::CORRELATION_VERSION;

/// Prints the binary version and the channel-metadata format it emits.
#[derive(Debug, Clone, Copy)]
pub struct VersionStrategy;

impl super::CommandStrategy for VersionStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        println!("turnstile {}", env!("CARGO_PKG_VERSION"));
        println!("correlation metadata v{CORRELATION_VERSION}");
        Ok(())
    }
}
