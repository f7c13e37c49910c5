//! Delivery pipeline: exactly one send, one mark-read, durable outcome,
//! best-effort audit notification.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::context::ConversationContext;
use crate::domain::dialog::{DialogRecord, ReplyOutcome, ReplyStatus};
use crate::domain::event::InboundEvent;
use crate::domain::message::StoredMessage;
use crate::ports::{
    AuditNotifier, ConversationStore, EscalationAlert, MessengerApi, MessengerError, ReplyRecord,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 500, max_delay_ms: 5_000 }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("sending reply failed after {attempts} attempt(s): {source}")]
    SendFailed { attempts: u32, source: MessengerError },
    #[error("marking conversation read failed after {attempts} attempt(s): {source}")]
    MarkReadFailed { attempts: u32, source: MessengerError },
}

/// Runs the five delivery steps for one cycle. Steps 1-2 (send, mark read)
/// are retried on transient transport failure and are fatal when
/// exhausted. Steps 3-4 (persist outbound message, persist dialog record)
/// run after a customer-visible send has happened, so their failures are
/// logged as inconsistencies instead of failing the cycle. Step 5 (audit
/// notification) is best-effort and never affects the outcome.
pub struct DeliveryPipeline {
    messenger: Arc<dyn MessengerApi>,
    store: Arc<dyn ConversationStore>,
    notifier: Arc<dyn AuditNotifier>,
    retry: RetryPolicy,
    self_sender_id: String,
}

impl DeliveryPipeline {
    pub fn new(
        messenger: Arc<dyn MessengerApi>,
        store: Arc<dyn ConversationStore>,
        notifier: Arc<dyn AuditNotifier>,
        retry: RetryPolicy,
        self_sender_id: impl Into<String>,
    ) -> Self {
        Self { messenger, store, notifier, retry, self_sender_id: self_sender_id.into() }
    }

    pub async fn deliver(
        &self,
        event: &InboundEvent,
        outcome: &ReplyOutcome,
        context: &ConversationContext,
    ) -> Result<(), DeliveryError> {
        let conversation_id = event.conversation_id.as_str();

        self.with_retry("send", || self.messenger.send_message(conversation_id, &outcome.text))
            .await
            .map_err(|(attempts, source)| DeliveryError::SendFailed { attempts, source })?;

        self.with_retry("mark_read", || self.messenger.mark_read(conversation_id))
            .await
            .map_err(|(attempts, source)| DeliveryError::MarkReadFailed { attempts, source })?;

        let reply = StoredMessage::outbound(
            conversation_id,
            &self.self_sender_id,
            &outcome.text,
            event.product_id.as_deref(),
        );
        if let Err(error) = self.store.append(reply).await {
            // The customer already saw the reply; losing the log entry is an
            // inconsistency to surface, not a reason to retry the send.
            error!(
                event_name = "delivery.persist.reply_lost",
                conversation_id,
                error = %error,
                "outbound message not persisted after send"
            );
        }

        let record = DialogRecord {
            conversation_id: conversation_id.to_string(),
            product_id: event.product_id.clone(),
            question: event.text.clone(),
            answer: outcome.text.clone(),
            status: outcome.status,
            sources: outcome.sources.clone(),
            created_at: chrono::Utc::now(),
        };
        if let Err(error) = self.store.append_dialog_record(record).await {
            error!(
                event_name = "delivery.persist.dialog_record_lost",
                conversation_id,
                error = %error,
                "dialog record not persisted after send"
            );
        }

        self.notify(event, outcome, context).await;

        info!(
            event_name = "delivery.cycle.completed",
            conversation_id,
            status = outcome.status.as_str(),
            "reply delivered"
        );
        Ok(())
    }

    async fn with_retry<F, Fut>(
        &self,
        step: &'static str,
        mut call: F,
    ) -> Result<(), (u32, MessengerError)>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<(), MessengerError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    attempt += 1;
                    if !error.is_transient() || attempt >= self.retry.max_attempts {
                        return Err((attempt, error));
                    }
                    let delay = self.retry.backoff(attempt - 1);
                    warn!(
                        event_name = "delivery.send.retry",
                        step,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient transport failure, backing off"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn notify(&self, event: &InboundEvent, outcome: &ReplyOutcome, context: &ConversationContext) {
        if outcome.status == ReplyStatus::Escalated {
            let alert = EscalationAlert {
                conversation_id: event.conversation_id.clone(),
                product_id: event.product_id.clone(),
                customer_message: event.text.clone(),
                last_bot_reply: context.last_bot_reply().map(str::to_string),
            };
            if let Err(error) = self.notifier.publish_escalation(&alert).await {
                warn!(
                    event_name = "delivery.notify.escalation_failed",
                    conversation_id = %event.conversation_id,
                    error = %error,
                    "escalation alert dropped"
                );
            }
        }

        let record = ReplyRecord {
            conversation_id: event.conversation_id.clone(),
            product_id: event.product_id.clone(),
            question: event.text.clone(),
            answer: outcome.text.clone(),
            status: outcome.status,
            sources: outcome.sources.clone(),
        };
        if let Err(error) = self.notifier.publish_reply(&record).await {
            warn!(
                event_name = "delivery.notify.reply_log_failed",
                conversation_id = %event.conversation_id,
                error = %error,
                "audit reply log dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use chrono::Utc;

    use crate::context::ConversationContext;
    use crate::domain::dialog::{ReplyOutcome, ReplyStatus};
    use crate::domain::event::{InboundEvent, MessageKind};
    use crate::testing::{InMemoryConversationStore, RecordingMessenger, RecordingNotifier};

    use super::{DeliveryError, DeliveryPipeline, RetryPolicy};

    fn event() -> InboundEvent {
        InboundEvent {
            event_id: "evt-1".to_string(),
            conversation_id: "chat-1".to_string(),
            external_message_id: "msg-1".to_string(),
            sender_id: "buyer-1".to_string(),
            kind: MessageKind::UserText,
            text: "Какая цена?".to_string(),
            product_id: Some("12345".to_string()),
            received_at: Utc::now(),
        }
    }

    fn answered() -> ReplyOutcome {
        ReplyOutcome {
            text: "Цена 120000 руб".to_string(),
            status: ReplyStatus::Answered,
            sources: BTreeSet::from(["item_12345.txt".to_string()]),
            escalation_triggered: false,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy { max_attempts: 3, base_delay_ms: 0, max_delay_ms: 0 }
    }

    fn pipeline(
        messenger: Arc<RecordingMessenger>,
        store: Arc<InMemoryConversationStore>,
        notifier: Arc<RecordingNotifier>,
    ) -> DeliveryPipeline {
        DeliveryPipeline::new(messenger, store, notifier, fast_retry(), "seller-9")
    }

    #[tokio::test]
    async fn delivers_one_send_then_one_mark_read() {
        let messenger = Arc::new(RecordingMessenger::default());
        let store = Arc::new(InMemoryConversationStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = pipeline(messenger.clone(), store.clone(), notifier.clone());

        pipeline.deliver(&event(), &answered(), &ConversationContext::default()).await.expect("deliver");

        assert_eq!(messenger.operations().await, vec!["send:chat-1", "mark_read:chat-1"]);
        assert_eq!(store.messages().await.len(), 1);
        assert!(store.messages().await[0].is_self_authored);
        assert_eq!(store.dialog_records().await.len(), 1);
        assert_eq!(notifier.replies().await.len(), 1);
    }

    #[tokio::test]
    async fn transient_send_failures_are_retried() {
        let messenger = Arc::new(RecordingMessenger::failing_sends(2));
        let store = Arc::new(InMemoryConversationStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = pipeline(messenger.clone(), store.clone(), notifier.clone());

        pipeline.deliver(&event(), &answered(), &ConversationContext::default()).await.expect("deliver");

        assert_eq!(messenger.send_attempts(), 3);
        assert_eq!(store.dialog_records().await.len(), 1);
    }

    #[tokio::test]
    async fn persistence_failures_after_the_send_do_not_fail_the_cycle() {
        let messenger = Arc::new(RecordingMessenger::default());
        let store = Arc::new(InMemoryConversationStore::failing_writes());
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = pipeline(messenger.clone(), store.clone(), notifier.clone());

        // The customer already saw the reply, so lost log writes must not
        // surface as a cycle error.
        pipeline
            .deliver(&event(), &answered(), &ConversationContext::default())
            .await
            .expect("deliver");

        assert_eq!(messenger.operations().await, vec!["send:chat-1", "mark_read:chat-1"]);
        assert!(store.messages().await.is_empty());
        assert!(store.dialog_records().await.is_empty());
        assert_eq!(notifier.replies().await.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_cycle_before_any_persistence() {
        let messenger = Arc::new(RecordingMessenger::failing_sends(5));
        let store = Arc::new(InMemoryConversationStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = pipeline(messenger.clone(), store.clone(), notifier.clone());

        let result = pipeline.deliver(&event(), &answered(), &ConversationContext::default()).await;

        assert!(matches!(result, Err(DeliveryError::SendFailed { attempts: 3, .. })));
        assert!(store.messages().await.is_empty());
        assert!(store.dialog_records().await.is_empty());
        assert!(notifier.replies().await.is_empty());
    }

    #[tokio::test]
    async fn notifier_failure_never_fails_the_cycle() {
        let messenger = Arc::new(RecordingMessenger::default());
        let store = Arc::new(InMemoryConversationStore::default());
        let notifier = Arc::new(RecordingNotifier::failing());
        let pipeline = pipeline(messenger.clone(), store.clone(), notifier.clone());

        pipeline
            .deliver(&event(), &answered(), &ConversationContext::default())
            .await
            .expect("notification failure must be swallowed");

        assert_eq!(store.dialog_records().await.len(), 1);
    }

    #[tokio::test]
    async fn escalation_outcome_raises_an_alert_with_the_last_bot_reply() {
        let messenger = Arc::new(RecordingMessenger::default());
        let store = Arc::new(InMemoryConversationStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = pipeline(messenger, store, notifier.clone());

        let outcome = ReplyOutcome {
            text: crate::policy::ESCALATION_REPLY.to_string(),
            status: ReplyStatus::Escalated,
            sources: BTreeSet::new(),
            escalation_triggered: true,
        };
        let context = ConversationContext::new(vec![crate::domain::message::StoredMessage::outbound(
            "chat-1", "seller-9", "Прошлый ответ", None,
        )]);

        pipeline.deliver(&event(), &outcome, &context).await.expect("deliver");

        let alerts = notifier.escalations().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].last_bot_reply.as_deref(), Some("Прошлый ответ"));
    }
}
