//! Conversation keys and the per-turn persisted state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CorrelationToken;

/// Opaque key/value data as held by the state store.
pub type StateBlob = serde_json::Map<String, serde_json::Value>;

const CONVERSATION_PREFIX: &str = "conversations/";
const USER_PREFIX: &str = "users/";

/// Stable identifier of a conversation; the sole lock key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which this conversation's state is stored.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{CONVERSATION_PREFIX}{}", self.0)
    }

    /// Reverse of [`Self::storage_key`], for listing stored conversations.
    #[must_use]
    pub fn from_storage_key(key: &str) -> Option<Self> {
        key.strip_prefix(CONVERSATION_PREFIX).map(Self::new)
    }
}

impl From<String> for ConversationKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ConversationKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage key for a user's cross-conversation state.
#[must_use]
pub fn user_storage_key(user_id: &str) -> String {
    format!("{USER_PREFIX}{user_id}")
}

/// Conversation-scoped state: dialog values plus the last issued turn token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    #[serde(default)]
    pub values: StateBlob,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_issued_token: Option<CorrelationToken>,
}

impl ConversationState {
    /// Decode a stored blob. An empty blob is the default state.
    pub fn from_blob(blob: StateBlob) -> anyhow::Result<Self> {
        if blob.is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(serde_json::Value::Object(blob))?)
    }

    pub fn into_blob(self) -> anyhow::Result<StateBlob> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => anyhow::bail!("conversation state serialized to non-object: {other}"),
        }
    }
}

/// Everything the downstream handler may read and mutate during a turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnState {
    pub conversation: ConversationState,
    /// User-scoped values; always empty for anonymous turns.
    pub user: StateBlob,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_storage_key_round_trip() {
        let key = ConversationKey::new("webchat:42");
        assert_eq!(key.storage_key(), "conversations/webchat:42");
        assert_eq!(
            ConversationKey::from_storage_key(&key.storage_key()),
            Some(key)
        );
        assert_eq!(ConversationKey::from_storage_key("users/alice"), None);
    }

    #[test]
    fn test_empty_blob_is_default_state() {
        let state = ConversationState::from_blob(StateBlob::new()).unwrap();
        assert_eq!(state, ConversationState::default());
        assert!(state.last_issued_token.is_none());
    }

    #[test]
    fn test_blob_layout() {
        let mut state = ConversationState::default();
        state.values.insert("turnCount".into(), json!(3));
        state.last_issued_token = Some("abc".into());

        let blob = state.clone().into_blob().unwrap();
        assert_eq!(blob["lastIssuedToken"], "abc");
        assert_eq!(blob["values"]["turnCount"], 3);
        assert_eq!(ConversationState::from_blob(blob).unwrap(), state);
    }

    #[test]
    fn test_user_storage_key() {
        assert_eq!(user_storage_key("alice"), "users/alice");
    }
}
