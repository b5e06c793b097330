//! Activities exchanged with the chat transport.

use serde::{Deserialize, Serialize};

use crate::{ConversationKey, TurnCorrelation};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ActivityType {
    Message,
    Typing,
    Event,
    EndOfConversation,
}

/// A single inbound or outbound activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Transport-level metadata carrying the turn token.
    #[serde(
        default,
        rename = "channelData",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::correlation::deserialize_lenient"
    )]
    pub correlation: Option<TurnCorrelation>,
}

impl Activity {
    #[must_use]
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            activity_type: ActivityType::Message,
            text: Some(text.into()),
            correlation: None,
        }
    }

    #[must_use]
    pub const fn typing() -> Self {
        Self {
            activity_type: ActivityType::Typing,
            text: None,
            correlation: None,
        }
    }

    /// An event activity; `name` travels in the text field.
    #[must_use]
    pub fn event(name: impl Into<String>) -> Self {
        Self {
            activity_type: ActivityType::Event,
            text: Some(name.into()),
            correlation: None,
        }
    }

    #[must_use]
    pub fn is_message(&self) -> bool {
        self.activity_type == ActivityType::Message
    }
}

/// An inbound turn as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTurn {
    pub conversation: ConversationKey,
    pub user_id: Option<String>,
    /// Correlation metadata echoed back from the previous reply, if any.
    pub correlation: Option<TurnCorrelation>,
    pub payload: Activity,
}

impl InboundTurn {
    #[must_use]
    pub fn new(conversation: impl Into<ConversationKey>, payload: Activity) -> Self {
        Self {
            conversation: conversation.into(),
            user_id: None,
            correlation: None,
            payload,
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_correlation(mut self, correlation: TurnCorrelation) -> Self {
        self.correlation = Some(correlation);
        self
    }
}
