//! Full response cycles against in-memory ports: dedup, filtering,
//! retrieval cascade, escalation, fallback, and delivery side effects.

use std::sync::Arc;

use chrono::{Duration, Utc};

use otvet_core::domain::dialog::ReplyStatus;
use otvet_core::domain::event::{InboundEvent, MessageKind};
use otvet_core::domain::message::StoredMessage;
use otvet_core::orchestrator::{AbortReason, CycleOutcome, Responder};
use otvet_core::policy::{ESCALATION_REPLY, FALLBACK_REPLY, ReplyPolicy};
use otvet_core::retrieval::{RetrievalCascade, SearchHit};
use otvet_core::testing::{
    FragmentEchoGenerator, InMemoryConversationStore, InMemoryEventLedger, RecordingMessenger,
    RecordingNotifier, StaticSearchBackend,
};
use otvet_core::{ConversationStore, DeliveryPipeline, EventLedger, RetryPolicy};

const BOT_SENDER: &str = "seller-9";
const CONTEXT_LIMIT: usize = 20;

struct Harness {
    responder: Responder,
    ledger: Arc<InMemoryEventLedger>,
    store: Arc<InMemoryConversationStore>,
    messenger: Arc<RecordingMessenger>,
    notifier: Arc<RecordingNotifier>,
    backend: Arc<StaticSearchBackend>,
}

fn harness(backend: StaticSearchBackend) -> Harness {
    let ledger = Arc::new(InMemoryEventLedger::default());
    let store = Arc::new(InMemoryConversationStore::default());
    let messenger = Arc::new(RecordingMessenger::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let backend = Arc::new(backend);

    let policy = ReplyPolicy::new(
        RetrievalCascade::new(backend.clone()),
        Arc::new(FragmentEchoGenerator),
    );
    let delivery = DeliveryPipeline::new(
        messenger.clone(),
        store.clone(),
        notifier.clone(),
        RetryPolicy { max_attempts: 3, base_delay_ms: 0, max_delay_ms: 0 },
        BOT_SENDER,
    );
    let responder =
        Responder::new(ledger.clone(), store.clone(), policy, delivery, CONTEXT_LIMIT);

    Harness { responder, ledger, store, messenger, notifier, backend }
}

fn user_event(event_id: &str, text: &str, product_id: Option<&str>) -> InboundEvent {
    InboundEvent {
        event_id: event_id.to_string(),
        conversation_id: "chat-1".to_string(),
        external_message_id: format!("ext-{event_id}"),
        sender_id: "buyer-1".to_string(),
        kind: MessageKind::UserText,
        text: text.to_string(),
        product_id: product_id.map(str::to_string),
        received_at: Utc::now(),
    }
}

#[tokio::test]
async fn product_question_is_answered_from_scoped_evidence() {
    let backend = StaticSearchBackend::with_product_hits(
        "12345",
        vec![SearchHit {
            text: "Цена 120000 руб".to_string(),
            source: "item_12345.txt".to_string(),
            score: 0.92,
        }],
    );
    let h = harness(backend);

    let outcome = h
        .responder
        .process(user_event("evt-a", "Какая цена?", Some("12345")))
        .await
        .expect("cycle");

    assert_eq!(outcome, CycleOutcome::Completed { status: ReplyStatus::Answered });
    // One product-scoped query was enough.
    assert_eq!(h.backend.call_count(), 1);

    let sent = h.messenger.sent_texts().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("120000"));

    let records = h.store.dialog_records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ReplyStatus::Answered);
    assert!(records[0].sources.contains("item_12345.txt"));

    // Inbound question plus the outbound reply are both in the log.
    let messages = h.store.messages().await;
    assert_eq!(messages.len(), 2);
    assert!(!messages[0].is_self_authored);
    assert!(messages[1].is_self_authored);

    assert_eq!(h.notifier.replies().await.len(), 1);
    assert!(h.notifier.escalations().await.is_empty());
}

#[tokio::test]
async fn escalation_request_skips_retrieval_and_alerts() {
    let h = harness(StaticSearchBackend::default());

    let outcome = h
        .responder
        .process(user_event("evt-b", "Позови менеджера, пожалуйста", None))
        .await
        .expect("cycle");

    assert_eq!(outcome, CycleOutcome::Completed { status: ReplyStatus::Escalated });
    assert_eq!(h.backend.call_count(), 0);
    assert_eq!(h.messenger.sent_texts().await, vec![ESCALATION_REPLY.to_string()]);
    assert_eq!(h.notifier.escalations().await.len(), 1);
    assert_eq!(h.notifier.replies().await.len(), 1);
}

#[tokio::test]
async fn question_without_evidence_gets_the_fixed_fallback() {
    let h = harness(StaticSearchBackend::default());

    let outcome = h
        .responder
        .process(user_event("evt-c", "Что насчет гарантии?", None))
        .await
        .expect("cycle");

    assert_eq!(outcome, CycleOutcome::Completed { status: ReplyStatus::NoMatch });
    assert_eq!(h.messenger.sent_texts().await, vec![FALLBACK_REPLY.to_string()]);

    let records = h.store.dialog_records().await;
    assert_eq!(records[0].status, ReplyStatus::NoMatch);
    assert!(records[0].sources.is_empty());
}

#[tokio::test]
async fn scoped_miss_cascades_to_general_evidence() {
    let backend = StaticSearchBackend::with_general_hits(vec![SearchHit {
        text: "Доставка по всей России".to_string(),
        source: "faq.txt".to_string(),
        score: 0.7,
    }]);
    let h = harness(backend);

    let outcome = h
        .responder
        .process(user_event("evt-g", "Есть доставка?", Some("777")))
        .await
        .expect("cycle");

    assert_eq!(outcome, CycleOutcome::Completed { status: ReplyStatus::Answered });
    // Product scope first, then the general fallback.
    assert_eq!(h.backend.call_count(), 2);
    assert!(h.messenger.sent_texts().await[0].contains("Доставка"));
}

#[tokio::test]
async fn duplicate_event_id_produces_no_second_send() {
    let backend = StaticSearchBackend::with_product_hits(
        "12345",
        vec![SearchHit {
            text: "Цена 120000 руб".to_string(),
            source: "item_12345.txt".to_string(),
            score: 0.92,
        }],
    );
    let h = harness(backend);

    let first = h
        .responder
        .process(user_event("evt-d", "Какая цена?", Some("12345")))
        .await
        .expect("first cycle");
    let second = h
        .responder
        .process(user_event("evt-d", "Какая цена?", Some("12345")))
        .await
        .expect("second cycle");

    assert!(matches!(first, CycleOutcome::Completed { .. }));
    assert_eq!(second, CycleOutcome::Aborted(AbortReason::DuplicateEvent));
    assert_eq!(h.messenger.sent_texts().await.len(), 1);
    assert_eq!(h.store.dialog_records().await.len(), 1);
}

#[tokio::test]
async fn non_user_messages_are_dropped_before_persistence() {
    let h = harness(StaticSearchBackend::default());

    for (event_id, kind) in
        [("evt-sys", MessageKind::PlatformSystem), ("evt-echo", MessageKind::OwnEcho)]
    {
        let mut event = user_event(event_id, "whatever", None);
        event.kind = kind;
        let outcome = h.responder.process(event).await.expect("cycle");
        assert_eq!(outcome, CycleOutcome::Aborted(AbortReason::FilteredKind(kind)));
    }

    assert!(h.store.messages().await.is_empty());
    assert!(h.messenger.sent_texts().await.is_empty());
}

#[tokio::test]
async fn blank_text_is_persisted_but_never_answered() {
    let h = harness(StaticSearchBackend::default());

    let outcome = h
        .responder
        .process(user_event("evt-blank", "   ", None))
        .await
        .expect("cycle");

    assert_eq!(outcome, CycleOutcome::Aborted(AbortReason::EmptyText));
    assert_eq!(h.store.messages().await.len(), 1);
    assert!(h.messenger.sent_texts().await.is_empty());
    assert!(h.notifier.replies().await.is_empty());
}

#[tokio::test]
async fn context_is_bounded_to_the_most_recent_messages() {
    let h = harness(StaticSearchBackend::default());

    let start = Utc::now() - Duration::minutes(60);
    for i in 0..30 {
        let mut message = StoredMessage::outbound("chat-1", "buyer-1", &format!("сообщение {i}"), None);
        message.is_self_authored = false;
        message.created_at = start + Duration::minutes(i);
        h.store.append(message).await.expect("append");
    }

    let context = h
        .store
        .recent_context("chat-1", CONTEXT_LIMIT)
        .await
        .expect("recent context");

    assert_eq!(context.len(), CONTEXT_LIMIT);
    // Oldest first within the window: messages 10..=29 survive.
    assert_eq!(context.first().map(|m| m.text.as_str()), Some("сообщение 10"));
    assert_eq!(context.last().map(|m| m.text.as_str()), Some("сообщение 29"));
}

#[tokio::test]
async fn ledger_remembers_processed_events() {
    let h = harness(StaticSearchBackend::default());

    h.responder
        .process(user_event("evt-seen", "Что насчет гарантии?", None))
        .await
        .expect("cycle");

    assert!(h.ledger.has_been_processed("evt-seen").await.expect("lookup"));
    assert!(!h.ledger.has_been_processed("evt-unseen").await.expect("lookup"));
}
