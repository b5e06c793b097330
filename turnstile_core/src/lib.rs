#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub mod activity;
pub mod correlation;
pub mod error;
pub mod state;

pub use activity::{Activity, ActivityType, InboundTurn};
pub use correlation::{CORRELATION_VERSION, CorrelationToken, TurnCorrelation};
pub use error::{LockError, TurnError};
pub use state::{ConversationKey, ConversationState, StateBlob, TurnState, user_storage_key};

/// Persistent key/value storage for per-conversation and per-user state.
///
/// The gatekeeper never issues two concurrent writes for the same
/// conversation key, so implementations need no per-key coordination.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the blob stored under `key`, or an empty blob if none exists.
    async fn load(&self, key: &str) -> anyhow::Result<StateBlob>;
    async fn save(&self, key: &str, blob: &StateBlob) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: StateStore + ?Sized> StateStore for std::sync::Arc<T> {
    async fn load(&self, key: &str) -> anyhow::Result<StateBlob> {
        (**self).load(key).await
    }

    async fn save(&self, key: &str, blob: &StateBlob) -> anyhow::Result<()> {
        (**self).save(key, blob).await
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        (**self).delete(key).await
    }
}

/// Per-turn information handed to the downstream handler.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub conversation: ConversationKey,
    pub user_id: Option<String>,
    /// Fires when the caller abandons the turn. Honouring it is up to the handler.
    pub cancel: CancellationToken,
}

/// The dialog engine invoked once per accepted turn.
#[async_trait]
pub trait TurnHandler: Send + Sync {
    /// Process one inbound activity, mutating `state` in place and returning
    /// the outbound batch.
    async fn process(
        &self,
        ctx: &TurnContext,
        payload: &Activity,
        state: &mut TurnState,
    ) -> anyhow::Result<Vec<Activity>>;
}

#[async_trait]
impl<T: TurnHandler + ?Sized> TurnHandler for std::sync::Arc<T> {
    async fn process(
        &self,
        ctx: &TurnContext,
        payload: &Activity,
        state: &mut TurnState,
    ) -> anyhow::Result<Vec<Activity>> {
        (**self).process(ctx, payload, state).await
    }
}

/// What the top-level error handler wants done after a failed turn.
#[derive(Debug, Clone, Default)]
pub struct FaultResponse {
    /// Activities to send to the end user.
    pub replies: Vec<Activity>,
    /// Delete the conversation's stored state to break error loops.
    pub reset_conversation: bool,
}

/// Top-level handler for turn errors surfaced at the transport boundary.
///
/// Runs after the conversation lock has been released.
#[async_trait]
pub trait FaultNotifier: Send + Sync {
    async fn notify(
        &self,
        conversation: &ConversationKey,
        error: &TurnError,
    ) -> anyhow::Result<FaultResponse>;
}
