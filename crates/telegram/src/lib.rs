//! Owner-facing audit notifications over the Telegram Bot API.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::debug;

use otvet_core::config::TelegramConfig;
use otvet_core::ports::{AuditNotifier, EscalationAlert, NotifierError, ReplyRecord};

const API_BASE: &str = "https://api.telegram.org/bot";
const EMPTY_FIELD: &str = "—";

pub struct TelegramNotifier {
    http: reqwest::Client,
    bot_token: SecretString,
    owner_chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self, NotifierError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NotifierError(e.to_string()))?;
        Ok(Self {
            http,
            bot_token: config.bot_token.clone(),
            owner_chat_id: config.owner_chat_id.clone(),
        })
    }

    async fn send(&self, text: &str) -> Result<(), NotifierError> {
        let url = format!("{API_BASE}{}/sendMessage", self.bot_token.expose_secret());
        let payload = json!({
            "chat_id": self.owner_chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifierError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifierError(format!("telegram api answered {status}: {body}")));
        }
        debug!(event_name = "telegram.notify.sent", chat_id = %self.owner_chat_id);
        Ok(())
    }
}

fn format_reply(record: &ReplyRecord) -> String {
    let sources = if record.sources.is_empty() {
        EMPTY_FIELD.to_string()
    } else {
        record.sources.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    let item = record.product_id.as_deref().unwrap_or(EMPTY_FIELD);

    format!(
        "📨 Новый ответ бота\n\n\
         Chat: {}\n\
         Item: {}\n\
         Status: {}\n\n\
         ❓ Вопрос:\n{}\n\n\
         🤖 Ответ:\n{}\n\n\
         📚 Источники: {}",
        record.conversation_id,
        item,
        record.status.as_str(),
        record.question,
        record.answer,
        sources,
    )
}

fn format_escalation(alert: &EscalationAlert) -> String {
    let item = alert.product_id.as_deref().unwrap_or(EMPTY_FIELD);
    let last_reply = alert.last_bot_reply.as_deref().unwrap_or(EMPTY_FIELD);

    format!(
        "🚨 Запрос на эскалацию!\n\n\
         Chat: {}\n\
         Item: {}\n\n\
         💬 Сообщение клиента:\n{}\n\n\
         🤖 Последний ответ бота:\n{}",
        alert.conversation_id, item, alert.customer_message, last_reply,
    )
}

#[async_trait]
impl AuditNotifier for TelegramNotifier {
    async fn publish_reply(&self, record: &ReplyRecord) -> Result<(), NotifierError> {
        self.send(&format_reply(record)).await
    }

    async fn publish_escalation(&self, alert: &EscalationAlert) -> Result<(), NotifierError> {
        self.send(&format_escalation(alert)).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use otvet_core::domain::dialog::ReplyStatus;
    use otvet_core::ports::{EscalationAlert, ReplyRecord};

    use super::{format_escalation, format_reply};

    #[test]
    fn reply_log_lists_status_and_sources() {
        let record = ReplyRecord {
            conversation_id: "chat-1".to_string(),
            product_id: Some("12345".to_string()),
            question: "Какая цена?".to_string(),
            answer: "Цена 120000 руб".to_string(),
            status: ReplyStatus::Answered,
            sources: BTreeSet::from(["item_12345.txt".to_string(), "price.txt".to_string()]),
        };

        let text = format_reply(&record);
        assert!(text.starts_with("📨 Новый ответ бота"));
        assert!(text.contains("Status: ANSWERED"));
        assert!(text.contains("Item: 12345"));
        assert!(text.contains("📚 Источники: item_12345.txt, price.txt"));
    }

    #[test]
    fn missing_fields_render_as_dashes() {
        let record = ReplyRecord {
            conversation_id: "chat-1".to_string(),
            product_id: None,
            question: "Что насчет гарантии?".to_string(),
            answer: "ответ".to_string(),
            status: ReplyStatus::NoMatch,
            sources: BTreeSet::new(),
        };

        let text = format_reply(&record);
        assert!(text.contains("Item: —"));
        assert!(text.contains("📚 Источники: —"));
    }

    #[test]
    fn escalation_alert_carries_the_last_bot_reply() {
        let alert = EscalationAlert {
            conversation_id: "chat-1".to_string(),
            product_id: Some("12345".to_string()),
            customer_message: "позови менеджера".to_string(),
            last_bot_reply: Some("Цена 120000 руб".to_string()),
        };

        let text = format_escalation(&alert);
        assert!(text.starts_with("🚨 Запрос на эскалацию!"));
        assert!(text.contains("💬 Сообщение клиента:\nпозови менеджера"));
        assert!(text.contains("🤖 Последний ответ бота:\nЦена 120000 руб"));
    }

    #[test]
    fn escalation_without_history_renders_a_dash() {
        let alert = EscalationAlert {
            conversation_id: "chat-1".to_string(),
            product_id: None,
            customer_message: "оператор".to_string(),
            last_bot_reply: None,
        };

        let text = format_escalation(&alert);
        assert!(text.contains("🤖 Последний ответ бота:\n—"));
    }
}
