//! Turn correlation tokens and the versioned metadata field that carries them.
//!
//! A token is issued with every reply and echoed back by the relay client on
//! the next inbound turn. The gatekeeper compares the two to detect stale
//! retransmissions.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use tracing::warn;
use uuid::Uuid;

/// Current version of the correlation metadata layout.
pub const CORRELATION_VERSION: u32 = 1;

/// Opaque value round-tripped between a reply and the next inbound turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    /// Generate a fresh, unique token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for CorrelationToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Typed channel metadata attached to activities: `{"v":1,"turnToken":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCorrelation {
    #[serde(rename = "v")]
    version: u32,
    turn_token: CorrelationToken,
}

impl TurnCorrelation {
    #[must_use]
    pub const fn new(turn_token: CorrelationToken) -> Self {
        Self {
            version: CORRELATION_VERSION,
            turn_token,
        }
    }

    #[must_use]
    pub const fn token(&self) -> &CorrelationToken {
        &self.turn_token
    }

    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Parse raw transport metadata.
    ///
    /// Malformed blobs and unknown versions yield `None`, which the
    /// gatekeeper treats as "no correlation metadata".
    #[must_use]
    pub fn from_metadata(value: &serde_json::Value) -> Option<Self> {
        if value.is_null() {
            return None;
        }

        match Self::deserialize(value) {
            Ok(parsed) if parsed.version == CORRELATION_VERSION => Some(parsed),
            Ok(parsed) => {
                warn!(
                    "Ignoring correlation metadata with unsupported version {}",
                    parsed.version
                );
                None
            }
            Err(e) => {
                warn!("Ignoring malformed correlation metadata: {e}");
                None
            }
        }
    }

    #[must_use]
    pub fn to_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "v": self.version,
            "turnToken": self.turn_token,
        })
    }
}

/// Serde adapter for metadata fields that must never fail the whole payload.
pub(crate) fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Option<TurnCorrelation>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(TurnCorrelation::from_metadata))
}
