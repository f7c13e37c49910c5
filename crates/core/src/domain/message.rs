use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only fact in the conversation log. Once written it is never
/// mutated or deleted; ordering is `created_at`, insertion order on ties.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub conversation_id: String,
    /// Platform message id. Absent for self-authored replies.
    pub external_message_id: Option<String>,
    pub sender_id: String,
    pub text: String,
    pub is_self_authored: bool,
    pub product_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn inbound(event: &crate::domain::event::InboundEvent) -> Self {
        Self {
            conversation_id: event.conversation_id.clone(),
            external_message_id: Some(event.external_message_id.clone()),
            sender_id: event.sender_id.clone(),
            text: event.text.clone(),
            is_self_authored: false,
            product_id: event.product_id.clone(),
            created_at: event.received_at,
        }
    }

    pub fn outbound(
        conversation_id: &str,
        sender_id: &str,
        text: &str,
        product_id: Option<&str>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            external_message_id: None,
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            is_self_authored: true,
            product_id: product_id.map(str::to_string),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::event::{InboundEvent, MessageKind};

    use super::StoredMessage;

    #[test]
    fn inbound_messages_keep_the_platform_message_id() {
        let event = InboundEvent {
            event_id: "evt-1".to_string(),
            conversation_id: "chat-1".to_string(),
            external_message_id: "msg-1".to_string(),
            sender_id: "buyer-1".to_string(),
            kind: MessageKind::UserText,
            text: "Какая цена?".to_string(),
            product_id: Some("12345".to_string()),
            received_at: Utc::now(),
        };

        let message = StoredMessage::inbound(&event);
        assert_eq!(message.external_message_id.as_deref(), Some("msg-1"));
        assert!(!message.is_self_authored);
        assert_eq!(message.created_at, event.received_at);
    }

    #[test]
    fn outbound_messages_are_self_authored_without_external_id() {
        let message = StoredMessage::outbound("chat-1", "seller-9", "Ответ", None);
        assert!(message.is_self_authored);
        assert!(message.external_message_id.is_none());
        assert!(message.product_id.is_none());
    }
}
