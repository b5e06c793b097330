//! A simulated polling relay client.
//!
//! Real relay clients echo the channel metadata of the last reply they
//! received on their next message. This client does the same, carrying the
//! metadata as raw JSON the way it would travel on the wire.

use serde_json::Value;
use turnstile_core::{Activity, ConversationKey, InboundTurn, TurnCorrelation};

pub struct RelayClient {
    conversation: ConversationKey,
    user_id: Option<String>,
    last_metadata: Option<Value>,
    last_sent: Option<InboundTurn>,
}

impl RelayClient {
    pub const fn new(conversation: ConversationKey, user_id: Option<String>) -> Self {
        Self {
            conversation,
            user_id,
            last_metadata: None,
            last_sent: None,
        }
    }

    pub const fn conversation(&self) -> &ConversationKey {
        &self.conversation
    }

    /// Build the next inbound turn, echoing the last seen metadata.
    pub fn send(&mut self, text: &str) -> InboundTurn {
        let mut turn = InboundTurn::new(self.conversation.clone(), Activity::message(text));
        turn.user_id.clone_from(&self.user_id);
        turn.correlation = self
            .last_metadata
            .as_ref()
            .and_then(TurnCorrelation::from_metadata);

        self.last_sent = Some(turn.clone());
        turn
    }

    /// Retransmit the previous turn verbatim.
    pub fn replay(&self) -> Option<InboundTurn> {
        self.last_sent.clone()
    }

    /// Record metadata from a delivered batch.
    pub fn receive(&mut self, replies: &[Activity]) {
        if let Some(correlation) = replies.iter().rev().find_map(|a| a.correlation.as_ref()) {
            self.last_metadata = Some(correlation.to_metadata());
        }
    }

    /// Forget everything, as after a conversation reset.
    pub fn reset(&mut self) {
        self.last_metadata = None;
        self.last_sent = None;
    }
}
