//! Stamps outgoing replies with a fresh turn token.

use tracing::debug;
use turnstile_core::{Activity, ConversationState, CorrelationToken, TurnCorrelation};

/// Tags the last message of an outbound batch and records the token.
#[derive(Debug, Clone, Copy)]
pub struct OutboundTagger {
    generate: fn() -> CorrelationToken,
}

impl Default for OutboundTagger {
    fn default() -> Self {
        Self {
            generate: CorrelationToken::generate,
        }
    }
}

impl OutboundTagger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom token source instead of random UUIDs.
    #[must_use]
    pub const fn with_generator(generate: fn() -> CorrelationToken) -> Self {
        Self { generate }
    }

    /// Attach a new token to the last message activity in `batch` and store
    /// it as the conversation's last issued token.
    ///
    /// Batches without a message activity are left untouched and `None`
    /// is returned.
    pub fn tag(
        &self,
        batch: &mut [Activity],
        state: &mut ConversationState,
    ) -> Option<CorrelationToken> {
        let last_message = batch.iter_mut().rev().find(|a| a.is_message())?;

        let token = (self.generate)();
        last_message.correlation = Some(TurnCorrelation::new(token.clone()));
        state.last_issued_token = Some(token.clone());

        debug!("Issued turn token: {token}");
        Some(token)
    }
}
