//! Avito messenger webhook payloads and their classification into
//! inbound events.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

use otvet_core::domain::event::{InboundEvent, MessageKind};

/// Top-level webhook body. `id` is the platform's delivery id and doubles
/// as the deduplication key for the whole cycle.
#[derive(Clone, Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: MessagePayload,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MessagePayload {
    #[serde(deserialize_with = "id_string")]
    pub chat_id: String,
    #[serde(deserialize_with = "id_string")]
    pub user_id: String,
    pub message: Option<MessageContent>,
    #[serde(default)]
    pub context: Option<ChatContext>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MessageContent {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    /// Unix seconds on the wire.
    #[serde(deserialize_with = "unix_timestamp")]
    pub created: DateTime<Utc>,
    #[serde(deserialize_with = "id_string")]
    pub author_id: String,
}

/// Listing the chat is attached to, when Avito includes one.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChatContext {
    /// Avito sends the listing id under the wire key `value`.
    #[serde(default, alias = "value", deserialize_with = "optional_id_string")]
    pub item_id: Option<String>,
    #[serde(default)]
    pub item_title: Option<String>,
}

impl WebhookEnvelope {
    /// Turns the raw payload into a classified event. Returns `None` when
    /// the payload carries no message at all (webhook confirmations and
    /// similar non-chat deliveries).
    pub fn into_inbound_event(self, bot_user_id: &str) -> Option<InboundEvent> {
        let message = self.payload.message?;

        let kind = if self.kind != "message" || message.kind == "system" {
            MessageKind::PlatformSystem
        } else if message.author_id == bot_user_id {
            MessageKind::OwnEcho
        } else {
            MessageKind::UserText
        };

        let product_id = self.payload.context.and_then(|c| c.item_id);

        Some(InboundEvent {
            event_id: self.id,
            conversation_id: self.payload.chat_id,
            external_message_id: message.id,
            sender_id: message.author_id,
            kind,
            text: message.text.unwrap_or_default(),
            product_id,
            received_at: message.created,
        })
    }
}

/// Avito mixes numeric and string ids across API versions.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n.to_string(),
        Raw::Text(s) => s,
    })
}

fn optional_id_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }
    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Number(n) => n.to_string(),
        Raw::Text(s) => s,
    }))
}

fn unix_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let seconds = i64::deserialize(deserializer)?;
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| serde::de::Error::custom(format!("timestamp {seconds} out of range")))
}
