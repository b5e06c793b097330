//! Demo dialog that echoes messages and counts turns.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use turnstile_core::{Activity, ActivityType, TurnContext, TurnHandler, TurnState};

const TURN_COUNT: &str = "turnCount";
const MESSAGE_COUNT: &str = "messageCount";

fn bump(values: &mut turnstile_core::StateBlob, key: &str) -> u64 {
    let next = values.get(key).and_then(Value::as_u64).unwrap_or(0) + 1;
    values.insert(key.to_string(), json!(next));
    next
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoDialog;

#[async_trait]
impl TurnHandler for EchoDialog {
    async fn process(
        &self,
        ctx: &TurnContext,
        payload: &Activity,
        state: &mut TurnState,
    ) -> anyhow::Result<Vec<Activity>> {
        if payload.activity_type != ActivityType::Message {
            debug!("Ignoring {:?} activity", payload.activity_type);
            return Ok(Vec::new());
        }

        let turn = bump(&mut state.conversation.values, TURN_COUNT);
        if ctx.user_id.is_some() {
            bump(&mut state.user, MESSAGE_COUNT);
        }

        let text = payload.text.as_deref().unwrap_or_default();
        Ok(vec![
            Activity::typing(),
            Activity::message(format!("[{turn}] {text}")),
        ])
    }
}
