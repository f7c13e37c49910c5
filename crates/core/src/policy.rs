//! Reply policy: escalation precedence plus the grounded-answer contract.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::context::ConversationContext;
use crate::domain::dialog::{ReplyOutcome, ReplyStatus};
use crate::domain::event::InboundEvent;
use crate::domain::retrieval::RetrievalOutcome;
use crate::retrieval::RetrievalCascade;

/// Normalized phrases that hand the conversation to a human. Matching is
/// case-insensitive substring containment over the lowercased text.
pub const ESCALATION_PHRASES: &[&str] =
    &["вызови менеджера", "позови менеджера", "позови человека", "оператор"];

pub const FALLBACK_REPLY: &str = "🤖: в моей базе нет нужной информации по твоему вопросу, \
     можешь задать уточнение или мне вызвать менеджера?";

pub const ESCALATION_REPLY: &str =
    "Понял, сейчас подключу менеджера. Он свяжется с вами в ближайшее время.";

pub fn needs_escalation(text: &str) -> bool {
    let lowered = text.to_lowercase();
    ESCALATION_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("answer generation failed: {0}")]
pub struct GenerateError(pub String);

/// Capability: produce text grounded in the supplied fragments. The policy
/// treats any error or empty completion as "no answer" and falls back, so
/// implementations never need to invent a reply.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        context: &ConversationContext,
        retrieval: &RetrievalOutcome,
    ) -> Result<String, GenerateError>;
}

/// Decides the one reply for a cycle.
///
/// The escalation check runs first and short-circuits retrieval entirely;
/// a hand-off request never also receives a product answer. On the
/// grounded branch, `Answered` is only produced together with a non-empty
/// source set -- the anti-hallucination contract.
pub struct ReplyPolicy {
    cascade: RetrievalCascade,
    generator: Arc<dyn AnswerGenerator>,
}

impl ReplyPolicy {
    pub fn new(cascade: RetrievalCascade, generator: Arc<dyn AnswerGenerator>) -> Self {
        Self { cascade, generator }
    }

    pub async fn evaluate(
        &self,
        event: &InboundEvent,
        context: &ConversationContext,
    ) -> ReplyOutcome {
        if needs_escalation(&event.text) {
            info!(
                event_name = "policy.escalation.requested",
                conversation_id = %event.conversation_id,
                "escalation phrase detected, bypassing retrieval"
            );
            return ReplyOutcome {
                text: ESCALATION_REPLY.to_string(),
                status: ReplyStatus::Escalated,
                sources: BTreeSet::new(),
                escalation_triggered: true,
            };
        }

        let retrieval = self.cascade.retrieve(&event.text, event.product_id.as_deref()).await;
        if !retrieval.found {
            info!(
                event_name = "policy.answer.no_match",
                conversation_id = %event.conversation_id,
                strategy = retrieval.strategy_used.as_str(),
                "no retrieval evidence, returning fallback"
            );
            return Self::no_match();
        }

        match self.generator.generate(&event.text, context, &retrieval).await {
            Ok(answer) if !answer.trim().is_empty() => {
                let sources: BTreeSet<String> = retrieval
                    .fragments
                    .iter()
                    .map(|fragment| fragment.source_identifier.clone())
                    .collect();
                info!(
                    event_name = "policy.answer.grounded",
                    conversation_id = %event.conversation_id,
                    strategy = retrieval.strategy_used.as_str(),
                    sources = sources.len(),
                    "composed grounded answer"
                );
                ReplyOutcome {
                    text: answer.trim().to_string(),
                    status: ReplyStatus::Answered,
                    sources,
                    escalation_triggered: false,
                }
            }
            Ok(_) => {
                warn!(
                    event_name = "policy.answer.empty_completion",
                    conversation_id = %event.conversation_id,
                    "generator returned empty text, falling back"
                );
                Self::no_match()
            }
            Err(error) => {
                warn!(
                    event_name = "policy.answer.generation_failed",
                    conversation_id = %event.conversation_id,
                    error = %error,
                    "generation failed, falling back rather than hallucinating"
                );
                Self::no_match()
            }
        }
    }

    fn no_match() -> ReplyOutcome {
        ReplyOutcome {
            text: FALLBACK_REPLY.to_string(),
            status: ReplyStatus::NoMatch,
            sources: BTreeSet::new(),
            escalation_triggered: false,
        }
    }
}
