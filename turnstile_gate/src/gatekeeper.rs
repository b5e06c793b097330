//! Per-conversation turn gate.
//!
//! Turn lifecycle: acquire the conversation lock, load state, reject stale
//! replays, run the handler, tag the replies, save state, release the lock.
//! The lock is a guard value, so it is released on every exit path
//! including errors, cancellation of the calling future, and panics.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use turnstile_core::{
    Activity, ConversationKey, ConversationState, CorrelationToken, InboundTurn, StateBlob,
    StateStore, TurnContext, TurnCorrelation, TurnError, TurnHandler, TurnState,
    user_storage_key,
};
use turnstile_lock::KeyedMutex;

use crate::OutboundTagger;

/// Result of a turn that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The handler ran and state was saved.
    Completed {
        replies: Vec<Activity>,
        /// Token attached to the last reply message, if any.
        issued_token: Option<CorrelationToken>,
    },
    /// Stale replay of an earlier round-trip; nothing was run or saved.
    Discarded,
}

impl TurnOutcome {
    #[must_use]
    pub fn replies(&self) -> &[Activity] {
        match self {
            Self::Completed { replies, .. } => replies,
            Self::Discarded => &[],
        }
    }

    #[must_use]
    pub fn into_replies(self) -> Vec<Activity> {
        match self {
            Self::Completed { replies, .. } => replies,
            Self::Discarded => Vec::new(),
        }
    }

    #[must_use]
    pub const fn is_discarded(&self) -> bool {
        matches!(self, Self::Discarded)
    }
}

/// Whether an inbound turn is a stale replay.
///
/// Only a mismatch between two non-empty tokens counts. A conversation
/// that has never been issued a token cannot receive a stale turn, and a
/// turn without metadata is accepted.
#[must_use]
pub fn is_stale(stored: Option<&CorrelationToken>, inbound: Option<&CorrelationToken>) -> bool {
    match (stored, inbound) {
        (Some(stored), Some(inbound)) => {
            !stored.is_empty() && !inbound.is_empty() && stored != inbound
        }
        _ => false,
    }
}

/// Loaded state plus the snapshot used to skip no-op writes.
struct LoadedState {
    state: TurnState,
    conversation_snapshot: ConversationState,
    user_snapshot: StateBlob,
}

pub struct TurnGatekeeper<S, H> {
    store: S,
    handler: H,
    locks: KeyedMutex,
    tagger: OutboundTagger,
}

impl<S, H> TurnGatekeeper<S, H>
where
    S: StateStore,
    H: TurnHandler,
{
    /// Create a gatekeeper backed by the process-wide lock registry.
    pub fn new(store: S, handler: H) -> Self {
        Self {
            store,
            handler,
            locks: KeyedMutex::global().clone(),
            tagger: OutboundTagger::new(),
        }
    }

    /// Use a dedicated lock registry instead of the process-wide one.
    #[must_use]
    pub fn with_locks(mut self, locks: KeyedMutex) -> Self {
        self.locks = locks;
        self
    }

    #[must_use]
    pub fn with_tagger(mut self, tagger: OutboundTagger) -> Self {
        self.tagger = tagger;
        self
    }

    pub const fn locks(&self) -> &KeyedMutex {
        &self.locks
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Run one inbound turn.
    ///
    /// Turns for the same conversation run one at a time in arrival order
    /// of lock acquisition; turns for other conversations are unaffected.
    #[tracing::instrument(skip_all, fields(conversation = %turn.conversation))]
    pub async fn process(
        &self,
        turn: InboundTurn,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let _guard = self
            .locks
            .lock_with_cancel(turn.conversation.as_str(), cancel)
            .await?;

        let conversation_key = turn.conversation.storage_key();
        let user_key = turn.user_id.as_deref().map(user_storage_key);

        let LoadedState {
            mut state,
            conversation_snapshot,
            user_snapshot,
        } = self
            .load_state(&conversation_key, user_key.as_deref())
            .await?;

        let inbound_token = turn.correlation.as_ref().map(TurnCorrelation::token);
        if is_stale(state.conversation.last_issued_token.as_ref(), inbound_token) {
            info!(
                "Discarding stale turn: expected token {:?}, got {:?}",
                state.conversation.last_issued_token.as_ref().map(CorrelationToken::as_str),
                inbound_token.map(CorrelationToken::as_str)
            );
            return Ok(TurnOutcome::Discarded);
        }

        let ctx = TurnContext {
            conversation: turn.conversation.clone(),
            user_id: turn.user_id.clone(),
            cancel: cancel.clone(),
        };

        let mut replies = self
            .handler
            .process(&ctx, &turn.payload, &mut state)
            .await
            .map_err(|e| {
                error!("Turn handler failed: {e:#}");
                TurnError::Downstream(e)
            })?;

        let issued_token = self.tagger.tag(&mut replies, &mut state.conversation);

        // The conversation blob carries the issued token and must be written
        // last: a failed save before it leaves the previous token in place.
        if let Some(user_key) = user_key.as_deref() {
            if state.user != user_snapshot {
                self.save(user_key, &state.user).await?;
            }
        }
        if state.conversation != conversation_snapshot {
            let blob = state
                .conversation
                .into_blob()
                .map_err(TurnError::Persistence)?;
            self.save(&conversation_key, &blob).await?;
        }

        debug!("Turn completed with {} replies", replies.len());
        Ok(TurnOutcome::Completed {
            replies,
            issued_token,
        })
    }

    /// Delete a conversation's stored state under its lock.
    #[tracing::instrument(skip_all, fields(conversation = %conversation))]
    pub async fn reset_conversation(
        &self,
        conversation: &ConversationKey,
        cancel: &CancellationToken,
    ) -> Result<(), TurnError> {
        let _guard = self
            .locks
            .lock_with_cancel(conversation.as_str(), cancel)
            .await?;

        self.store
            .delete(&conversation.storage_key())
            .await
            .map_err(|e| {
                error!("Failed to delete conversation state: {e:#}");
                TurnError::Persistence(e)
            })?;

        info!("Conversation state reset");
        Ok(())
    }

    async fn load_state(
        &self,
        conversation_key: &str,
        user_key: Option<&str>,
    ) -> Result<LoadedState, TurnError> {
        let blob = self
            .store
            .load(conversation_key)
            .await
            .map_err(TurnError::StateLoad)?;
        let conversation = ConversationState::from_blob(blob).map_err(TurnError::StateLoad)?;

        let user = match user_key {
            Some(key) => self.store.load(key).await.map_err(TurnError::StateLoad)?,
            None => StateBlob::new(),
        };

        Ok(LoadedState {
            conversation_snapshot: conversation.clone(),
            user_snapshot: user.clone(),
            state: TurnState { conversation, user },
        })
    }

    async fn save(&self, key: &str, blob: &StateBlob) -> Result<(), TurnError> {
        self.store.save(key, blob).await.map_err(|e| {
            error!("Failed to save state for {key}: {e:#}");
            TurnError::Persistence(e)
        })
    }
}
