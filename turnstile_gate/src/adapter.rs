//! Transport-facing entry point with top-level fault handling.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use turnstile_core::{
    Activity, ConversationKey, FaultNotifier, FaultResponse, InboundTurn, StateStore, TurnError,
    TurnHandler,
};

use crate::{TurnGatekeeper, TurnOutcome};

/// Runs turns through a [`TurnGatekeeper`] and routes failures to a
/// [`FaultNotifier`].
pub struct Adapter<S, H, N> {
    gatekeeper: TurnGatekeeper<S, H>,
    notifier: N,
}

impl<S, H, N> Adapter<S, H, N>
where
    S: StateStore,
    H: TurnHandler,
    N: FaultNotifier,
{
    pub const fn new(gatekeeper: TurnGatekeeper<S, H>, notifier: N) -> Self {
        Self {
            gatekeeper,
            notifier,
        }
    }

    pub const fn gatekeeper(&self) -> &TurnGatekeeper<S, H> {
        &self.gatekeeper
    }

    /// Process an inbound turn and return the activities to transmit.
    ///
    /// A discarded replay yields an empty batch. A failed turn is handed to
    /// the notifier once its lock is free; the notifier's replies are
    /// returned and, if requested, the conversation state is deleted. If the
    /// notifier itself fails, the original turn error is returned.
    pub async fn handle(
        &self,
        turn: InboundTurn,
        cancel: &CancellationToken,
    ) -> Result<Vec<Activity>, TurnError> {
        let conversation = turn.conversation.clone();

        match self.gatekeeper.process(turn, cancel).await {
            Ok(outcome) => Ok(outcome.into_replies()),
            Err(e) => self.on_turn_error(&conversation, e).await,
        }
    }

    /// Process a turn and keep the full outcome, skipping fault handling.
    pub async fn handle_raw(
        &self,
        turn: InboundTurn,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        self.gatekeeper.process(turn, cancel).await
    }

    async fn on_turn_error(
        &self,
        conversation: &ConversationKey,
        turn_error: TurnError,
    ) -> Result<Vec<Activity>, TurnError> {
        error!(%conversation, "Unhandled turn error: {turn_error}");

        let response = match self.notifier.notify(conversation, &turn_error).await {
            Ok(response) => response,
            Err(e) => {
                error!(%conversation, "Fault notifier failed: {e:#}");
                return Err(turn_error);
            }
        };

        if response.reset_conversation {
            // Fresh token: the reset must run even though the turn was cancelled.
            let reset = self
                .gatekeeper
                .reset_conversation(conversation, &CancellationToken::new())
                .await;
            if let Err(e) = reset {
                warn!(%conversation, "Failed to reset conversation after error: {e}");
            }
        }

        Ok(response.replies)
    }
}

/// Default fault notifier: apologise to the user and optionally reset.
#[derive(Debug, Clone)]
pub struct ApologyNotifier {
    message: String,
    reset_conversation: bool,
}

impl ApologyNotifier {
    #[must_use]
    pub fn new(message: impl Into<String>, reset_conversation: bool) -> Self {
        Self {
            message: message.into(),
            reset_conversation,
        }
    }
}

impl Default for ApologyNotifier {
    fn default() -> Self {
        Self::new("Sorry, something went wrong. Let's start over.", true)
    }
}

#[async_trait]
impl FaultNotifier for ApologyNotifier {
    async fn notify(
        &self,
        conversation: &ConversationKey,
        error: &TurnError,
    ) -> anyhow::Result<FaultResponse> {
        // Nobody is waiting on a cancelled turn.
        if matches!(error, TurnError::Cancelled) {
            warn!(%conversation, "Turn cancelled");
            return Ok(FaultResponse::default());
        }

        Ok(FaultResponse {
            replies: vec![Activity::message(self.message.clone())],
            reset_conversation: self.reset_conversation,
        })
    }
}
