use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of an inbound chat event, decided at the webhook boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    UserText,
    PlatformSystem,
    OwnEcho,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserText => "user_text",
            Self::PlatformSystem => "platform_system",
            Self::OwnEcho => "own_echo",
        }
    }

    pub fn is_answerable(&self) -> bool {
        matches!(self, Self::UserText)
    }
}

/// One deduplication unit handed to the responder. Immutable; only the
/// `event_id` outlives the cycle (as a ledger entry).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub event_id: String,
    pub conversation_id: String,
    pub external_message_id: String,
    pub sender_id: String,
    pub kind: MessageKind,
    pub text: String,
    pub product_id: Option<String>,
    pub received_at: DateTime<Utc>,
}
