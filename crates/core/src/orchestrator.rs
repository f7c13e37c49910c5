//! Response cycle orchestration. One inbound event is marked exactly once,
//! filtered, persisted, answered against retrieved knowledge, and delivered.

use std::sync::Arc;

use tracing::{debug, info};

use crate::context::ConversationContext;
use crate::delivery::DeliveryPipeline;
use crate::domain::dialog::ReplyStatus;
use crate::domain::event::{InboundEvent, MessageKind};
use crate::domain::message::StoredMessage;
use crate::errors::CycleError;
use crate::policy::ReplyPolicy;
use crate::ports::{ConversationStore, EventLedger, MarkOutcome};

/// Why a cycle ended without sending a reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// The event id was already claimed by an earlier cycle.
    DuplicateEvent,
    /// The message kind never gets an automated answer.
    FilteredKind(MessageKind),
    /// The message carried no text. It is persisted but not answered.
    EmptyText,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed { status: ReplyStatus },
    Aborted(AbortReason),
}

/// The auto-responder. Owns the full cycle for a single inbound event;
/// concurrent cycles for different events are independent, and duplicate
/// event ids are resolved by the ledger's atomic claim.
pub struct Responder {
    ledger: Arc<dyn EventLedger>,
    store: Arc<dyn ConversationStore>,
    policy: ReplyPolicy,
    delivery: DeliveryPipeline,
    context_limit: usize,
}

impl Responder {
    pub fn new(
        ledger: Arc<dyn EventLedger>,
        store: Arc<dyn ConversationStore>,
        policy: ReplyPolicy,
        delivery: DeliveryPipeline,
        context_limit: usize,
    ) -> Self {
        Self { ledger, store, policy, delivery, context_limit }
    }

    pub async fn process(&self, event: InboundEvent) -> Result<CycleOutcome, CycleError> {
        let event_id = event.event_id.as_str();
        let conversation_id = event.conversation_id.as_str();
        debug!(event_name = "cycle.received", event_id, conversation_id);

        // Claim before any side effect: losers of a concurrent race see
        // AlreadyMarked and stop here.
        match self.ledger.mark_processed(event_id).await? {
            MarkOutcome::Marked => {}
            MarkOutcome::AlreadyMarked => {
                info!(event_name = "cycle.duplicate", event_id, conversation_id);
                return Ok(CycleOutcome::Aborted(AbortReason::DuplicateEvent));
            }
        }

        if !event.kind.is_answerable() {
            debug!(event_name = "cycle.filtered", event_id, kind = ?event.kind);
            return Ok(CycleOutcome::Aborted(AbortReason::FilteredKind(event.kind)));
        }

        self.store.append(StoredMessage::inbound(&event)).await?;

        if event.text.trim().is_empty() {
            debug!(event_name = "cycle.empty_text", event_id, conversation_id);
            return Ok(CycleOutcome::Aborted(AbortReason::EmptyText));
        }

        // A failed context read aborts here, before anything customer-visible.
        let messages = self.store.recent_context(conversation_id, self.context_limit).await?;
        let context = ConversationContext::new(messages);

        let outcome = self.policy.evaluate(&event, &context).await;
        info!(
            event_name = "cycle.evaluated",
            event_id,
            conversation_id,
            status = outcome.status.as_str(),
            sources = outcome.sources.len(),
        );

        self.delivery.deliver(&event, &outcome, &context).await?;
        Ok(CycleOutcome::Completed { status: outcome.status })
    }
}
