//! Integration tests for turn serialization and stale-replay suppression.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use turnstile_core::{
    Activity, ConversationKey, ConversationState, CorrelationToken, InboundTurn, StateBlob,
    StateStore, TurnContext, TurnCorrelation, TurnError, TurnHandler, TurnState,
};
use turnstile_gate::{Adapter, ApologyNotifier, TurnGatekeeper, TurnOutcome};
use turnstile_lock::KeyedMutex;
use turnstile_session::MemoryStore;

/// Counts turns into conversation state and echoes the text back.
#[derive(Default)]
struct EchoHandler {
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Duration,
}

impl EchoHandler {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TurnHandler for EchoHandler {
    async fn process(
        &self,
        ctx: &TurnContext,
        payload: &Activity,
        state: &mut TurnState,
    ) -> anyhow::Result<Vec<Activity>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let count = state
            .conversation
            .values
            .get("turnCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        sleep(self.delay).await;
        state
            .conversation
            .values
            .insert("turnCount".into(), json!(count + 1));
        if ctx.user_id.is_some() {
            state.user.insert("seen".into(), json!(true));
            state.user.insert("lastText".into(), json!(payload.text));
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![
            Activity::typing(),
            Activity::message(format!(
                "echo: {}",
                payload.text.as_deref().unwrap_or_default()
            )),
        ])
    }
}

struct FailingHandler;

#[async_trait]
impl TurnHandler for FailingHandler {
    async fn process(
        &self,
        _ctx: &TurnContext,
        _payload: &Activity,
        state: &mut TurnState,
    ) -> anyhow::Result<Vec<Activity>> {
        state
            .conversation
            .values
            .insert("partial".into(), json!(true));
        anyhow::bail!("dialog exploded")
    }
}

/// Holds turns for the "slow" conversation until released.
#[derive(Default)]
struct GatedHandler {
    release: Notify,
}

#[async_trait]
impl TurnHandler for GatedHandler {
    async fn process(
        &self,
        ctx: &TurnContext,
        _payload: &Activity,
        _state: &mut TurnState,
    ) -> anyhow::Result<Vec<Activity>> {
        if ctx.conversation.as_str() == "slow" {
            self.release.notified().await;
        }
        Ok(vec![Activity::message("done")])
    }
}

/// Parks inside the handler until the turn's token is cancelled.
#[derive(Default)]
struct StuckHandler {
    entered: Notify,
}

#[async_trait]
impl TurnHandler for StuckHandler {
    async fn process(
        &self,
        ctx: &TurnContext,
        _payload: &Activity,
        state: &mut TurnState,
    ) -> anyhow::Result<Vec<Activity>> {
        state
            .conversation
            .values
            .insert("partial".into(), json!(true));
        self.entered.notify_one();
        ctx.cancel.cancelled().await;
        anyhow::bail!("turn cancelled")
    }
}

/// Memory store that counts writes and can be told to fail them.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    saves: AtomicUsize,
    fail_saves: bool,
    fail_user_saves: AtomicBool,
}

impl CountingStore {
    fn failing() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn set_user_saves_failing(&self, failing: bool) {
        self.fail_user_saves.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateStore for CountingStore {
    async fn load(&self, key: &str) -> anyhow::Result<StateBlob> {
        self.inner.load(key).await
    }

    async fn save(&self, key: &str, blob: &StateBlob) -> anyhow::Result<()> {
        if self.fail_saves {
            anyhow::bail!("disk full");
        }
        if key.starts_with("users/") && self.fail_user_saves.load(Ordering::SeqCst) {
            anyhow::bail!("user table locked");
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(key, blob).await
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.inner.delete(key).await
    }
}

fn gatekeeper<S: StateStore, H: TurnHandler>(store: S, handler: H) -> TurnGatekeeper<S, H> {
    TurnGatekeeper::new(store, handler).with_locks(KeyedMutex::new())
}

fn turn(conversation: &str, text: &str) -> InboundTurn {
    InboundTurn::new(conversation, Activity::message(text))
}

fn turn_with_token(conversation: &str, text: &str, token: &str) -> InboundTurn {
    turn(conversation, text).with_correlation(TurnCorrelation::new(token.into()))
}

async fn stored_state(store: &impl StateStore, conversation: &str) -> ConversationState {
    let blob = store
        .load(&ConversationKey::from(conversation).storage_key())
        .await
        .unwrap();
    ConversationState::from_blob(blob).unwrap()
}

async fn seed_token(store: &impl StateStore, conversation: &str, token: &str) {
    let state = ConversationState {
        last_issued_token: Some(token.into()),
        ..ConversationState::default()
    };
    store
        .save(
            &ConversationKey::from(conversation).storage_key(),
            &state.into_blob().unwrap(),
        )
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_turns_on_one_conversation_are_serialized() {
    let store = Arc::new(MemoryStore::new());
    let handler = Arc::new(EchoHandler::with_delay(Duration::from_millis(5)));
    let gate = Arc::new(gatekeeper(Arc::clone(&store), Arc::clone(&handler)));

    let mut handles = Vec::new();
    for i in 0..10 {
        let gate = Arc::clone(&gate);
        handles.push(tokio::spawn(async move {
            gate.process(turn("conv", &format!("msg {i}")), &CancellationToken::new())
                .await
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(!outcome.is_discarded());
    }

    assert_eq!(handler.calls(), 10);
    assert_eq!(handler.max_active.load(Ordering::SeqCst), 1);
    let state = stored_state(&*store, "conv").await;
    assert_eq!(state.values["turnCount"], 10);
    assert!(gate.locks().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_conversations_do_not_block_each_other() {
    let handler = Arc::new(GatedHandler::default());
    let gate = Arc::new(gatekeeper(MemoryStore::new(), Arc::clone(&handler)));

    let slow = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.process(turn("slow", "hi"), &CancellationToken::new()).await })
    };
    sleep(Duration::from_millis(20)).await;
    assert!(gate.locks().contains("slow"));

    let fast = timeout(
        Duration::from_secs(1),
        gate.process(turn("fast", "hi"), &CancellationToken::new()),
    )
    .await;
    assert!(fast.is_ok(), "fast conversation waited on slow one");
    assert!(!fast.unwrap().unwrap().is_discarded());

    handler.release.notify_one();
    slow.await.unwrap().unwrap();
    assert!(gate.locks().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lock_registry_drains_after_burst() {
    let gate = Arc::new(gatekeeper(MemoryStore::new(), EchoHandler::default()));

    let mut handles = Vec::new();
    for i in 0..32 {
        let gate = Arc::clone(&gate);
        handles.push(tokio::spawn(async move {
            gate.process(turn(&format!("conv-{i}"), "hi"), &CancellationToken::new())
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(gate.locks().len(), 0);
}

#[tokio::test]
async fn stale_replay_is_discarded_without_side_effects() {
    let store = Arc::new(CountingStore::default());
    seed_token(&*store, "conv", "abc").await;
    let handler = Arc::new(EchoHandler::default());
    let gate = gatekeeper(Arc::clone(&store), Arc::clone(&handler));
    let saves_before = store.saves();

    let outcome = gate
        .process(turn_with_token("conv", "late", "xyz"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Discarded);
    assert!(outcome.replies().is_empty());
    assert_eq!(handler.calls(), 0);
    assert_eq!(store.saves(), saves_before);
    assert_eq!(
        stored_state(&*store, "conv").await.last_issued_token,
        Some("abc".into())
    );
    assert!(gate.locks().is_empty());
}

#[tokio::test]
async fn matching_or_missing_token_proceeds() {
    let store = Arc::new(MemoryStore::new());
    seed_token(&*store, "matching", "abc").await;
    seed_token(&*store, "missing", "abc").await;
    let handler = Arc::new(EchoHandler::default());
    let gate = gatekeeper(Arc::clone(&store), Arc::clone(&handler));
    let cancel = CancellationToken::new();

    let matching = gate
        .process(turn_with_token("matching", "hi", "abc"), &cancel)
        .await
        .unwrap();
    let missing = gate.process(turn("missing", "hi"), &cancel).await.unwrap();

    assert!(!matching.is_discarded());
    assert!(!missing.is_discarded());
    assert_eq!(handler.calls(), 2);
}

#[tokio::test]
async fn first_turn_is_never_stale() {
    let handler = Arc::new(EchoHandler::default());
    let gate = gatekeeper(MemoryStore::new(), Arc::clone(&handler));

    // No token was ever issued, so any inbound metadata is accepted.
    let outcome = gate
        .process(turn_with_token("fresh", "hi", "whatever"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.is_discarded());
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn issued_token_is_stored_and_attached() {
    let store = Arc::new(MemoryStore::new());
    let gate = gatekeeper(Arc::clone(&store), EchoHandler::default());

    let outcome = gate
        .process(turn("conv", "hello"), &CancellationToken::new())
        .await
        .unwrap();

    let TurnOutcome::Completed {
        replies,
        issued_token,
    } = outcome
    else {
        panic!("turn was discarded");
    };
    let attached = replies
        .last()
        .and_then(|a| a.correlation.as_ref())
        .map(|c| c.token().clone());

    assert!(issued_token.is_some());
    assert_eq!(attached, issued_token);
    assert!(replies[0].correlation.is_none(), "typing must not be tagged");
    assert_eq!(
        stored_state(&*store, "conv").await.last_issued_token,
        issued_token
    );
}

#[tokio::test]
async fn replaying_an_accepted_turn_is_discarded() {
    let handler = Arc::new(EchoHandler::default());
    let gate = gatekeeper(MemoryStore::new(), Arc::clone(&handler));
    let cancel = CancellationToken::new();

    let first = gate.process(turn("conv", "one"), &cancel).await.unwrap();
    let first_token = first.replies()[1]
        .correlation
        .as_ref()
        .map(|c| c.token().clone())
        .unwrap();

    let second = turn_with_token("conv", "two", first_token.as_str());
    assert!(!gate.process(second.clone(), &cancel).await.unwrap().is_discarded());

    // The client retransmits the same turn; a newer token has been issued since.
    assert!(gate.process(second, &cancel).await.unwrap().is_discarded());
    assert_eq!(handler.calls(), 2);
}

#[tokio::test]
async fn handler_failure_releases_lock_and_skips_save() {
    let store = Arc::new(CountingStore::default());
    let gate = gatekeeper(Arc::clone(&store), FailingHandler);

    let result = gate
        .process(turn("conv", "hi"), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(TurnError::Downstream(_))));
    assert!(gate.locks().try_lock("conv").unwrap().is_some());
    assert_eq!(store.saves(), 0);
    assert!(stored_state(&*store, "conv").await.values.is_empty());
}

#[tokio::test]
async fn persistence_failure_surfaces_and_releases_lock() {
    let gate = gatekeeper(CountingStore::failing(), EchoHandler::default());

    let result = gate
        .process(turn("conv", "hi"), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(TurnError::Persistence(_))));
    assert!(gate.locks().is_empty());
}

#[tokio::test]
async fn cancelled_wait_skips_turn() {
    let handler = Arc::new(EchoHandler::default());
    let gate = gatekeeper(MemoryStore::new(), Arc::clone(&handler));
    let holder = gate.locks().lock("conv").await.unwrap();
    let cancel = CancellationToken::new();

    let pending = gate.process(turn("conv", "hi"), &cancel);
    let canceller = async {
        sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    };
    let (result, ()) = tokio::join!(pending, canceller);

    assert!(matches!(result, Err(TurnError::Cancelled)));
    assert_eq!(handler.calls(), 0);
    drop(holder);
    assert!(gate.locks().is_empty());
}

#[tokio::test]
async fn aborted_turn_releases_lock_without_saving() {
    let store = Arc::new(CountingStore::default());
    let handler = Arc::new(StuckHandler::default());
    let gate = Arc::new(gatekeeper(Arc::clone(&store), Arc::clone(&handler)));

    let task = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.process(turn("conv", "hi"), &CancellationToken::new()).await })
    };
    handler.entered.notified().await;
    assert!(gate.locks().contains("conv"));

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert!(gate.locks().is_empty());
    assert!(gate.locks().try_lock("conv").unwrap().is_some());
    assert_eq!(store.saves(), 0);
}

#[tokio::test]
async fn cancellation_during_handler_releases_lock_without_saving() {
    let store = Arc::new(CountingStore::default());
    let handler = Arc::new(StuckHandler::default());
    let gate = Arc::new(gatekeeper(Arc::clone(&store), Arc::clone(&handler)));
    let cancel = CancellationToken::new();

    let task = {
        let gate = Arc::clone(&gate);
        let cancel = cancel.clone();
        tokio::spawn(async move { gate.process(turn("conv", "hi"), &cancel).await })
    };
    handler.entered.notified().await;
    cancel.cancel();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(TurnError::Downstream(_))));
    assert!(gate.locks().is_empty());
    assert!(gate.locks().try_lock("conv").unwrap().is_some());
    assert_eq!(store.saves(), 0);
    assert!(stored_state(&*store, "conv").await.values.is_empty());
}

#[tokio::test]
async fn failed_user_save_keeps_previous_token() {
    let store = Arc::new(CountingStore::default());
    let adapter = Adapter::new(
        gatekeeper(Arc::clone(&store), EchoHandler::default()),
        ApologyNotifier::new("oops", false),
    );
    let cancel = CancellationToken::new();

    let first = adapter
        .handle(turn("conv", "one").with_user("alice"), &cancel)
        .await
        .unwrap();
    let issued = first[1]
        .correlation
        .as_ref()
        .map(|c| c.token().clone())
        .unwrap();

    store.set_user_saves_failing(true);
    let failed = adapter
        .handle(
            turn_with_token("conv", "two", issued.as_str()).with_user("alice"),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(failed, vec![Activity::message("oops")]);
    assert_eq!(
        stored_state(&*store, "conv").await.last_issued_token,
        Some(issued.clone())
    );

    // The client never saw a newer token, so its retry must still be accepted.
    store.set_user_saves_failing(false);
    let retried = adapter
        .gatekeeper()
        .process(
            turn_with_token("conv", "two", issued.as_str()).with_user("alice"),
            &cancel,
        )
        .await
        .unwrap();
    let TurnOutcome::Completed { issued_token, .. } = retried else {
        panic!("retry was discarded");
    };
    assert_ne!(issued_token, Some(issued.clone()));
    assert_eq!(
        stored_state(&*store, "conv").await.last_issued_token,
        issued_token
    );
}

#[tokio::test]
async fn user_state_is_saved_separately() {
    let store = Arc::new(MemoryStore::new());
    let gate = gatekeeper(Arc::clone(&store), EchoHandler::default());

    gate.process(turn("conv", "hi").with_user("alice"), &CancellationToken::new())
        .await
        .unwrap();

    let user = store.load("users/alice").await.unwrap();
    assert_eq!(user["seen"], true);
    assert_eq!(
        store.keys().await,
        vec!["conversations/conv".to_string(), "users/alice".to_string()]
    );
}

#[tokio::test]
async fn adapter_apologises_and_resets_on_failure() {
    let store = Arc::new(MemoryStore::new());
    seed_token(&*store, "conv", "abc").await;
    let adapter = Adapter::new(
        gatekeeper(Arc::clone(&store), FailingHandler),
        ApologyNotifier::new("oops", true),
    );

    let replies = adapter
        .handle(turn("conv", "hi"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(replies, vec![Activity::message("oops")]);
    assert!(store.keys().await.is_empty());
    assert!(adapter.gatekeeper().locks().is_empty());
}

#[tokio::test]
async fn adapter_keeps_state_without_reset() {
    let store = Arc::new(MemoryStore::new());
    seed_token(&*store, "conv", "abc").await;
    let adapter = Adapter::new(
        gatekeeper(Arc::clone(&store), FailingHandler),
        ApologyNotifier::new("oops", false),
    );

    adapter
        .handle(turn("conv", "hi"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        stored_state(&*store, "conv").await.last_issued_token,
        Some(CorrelationToken::from("abc"))
    );
}

#[tokio::test]
async fn adapter_returns_empty_batch_for_stale_replay() {
    let store = Arc::new(MemoryStore::new());
    seed_token(&*store, "conv", "abc").await;
    let adapter = Adapter::new(
        gatekeeper(Arc::clone(&store), EchoHandler::default()),
        ApologyNotifier::default(),
    );

    let replies = adapter
        .handle(turn_with_token("conv", "hi", "xyz"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(replies.is_empty());
}
