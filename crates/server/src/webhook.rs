use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use otvet_avito::WebhookEnvelope;
use otvet_core::orchestrator::Responder;

#[derive(Clone)]
pub struct WebhookState {
    pub responder: Arc<Responder>,
    pub bot_user_id: String,
}

pub fn router(responder: Arc<Responder>, bot_user_id: String) -> Router {
    Router::new()
        .route("/avito/webhook", post(receive))
        .with_state(WebhookState { responder, bot_user_id })
}

/// Acknowledges the delivery immediately and runs the response cycle in
/// the background. Avito retries non-2xx deliveries, so only undecodable
/// bodies are rejected.
pub async fn receive(
    State(state): State<WebhookState>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!(event_name = "webhook.rejected", error = %error, "undecodable webhook body");
            return (StatusCode::BAD_REQUEST, Json(json!({"ok": false, "error": "invalid payload"})));
        }
    };

    match envelope.into_inbound_event(&state.bot_user_id) {
        Some(event) => {
            let responder = state.responder.clone();
            tokio::spawn(async move {
                let event_id = event.event_id.clone();
                if let Err(error) = responder.process(event).await {
                    error!(event_name = "webhook.cycle_failed", event_id, error = %error);
                }
            });
        }
        None => debug!(event_name = "webhook.no_message", "delivery without a chat message"),
    }

    (StatusCode::OK, Json(json!({"ok": true})))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    use otvet_core::orchestrator::Responder;
    use otvet_core::policy::ReplyPolicy;
    use otvet_core::retrieval::{RetrievalCascade, SearchHit};
    use otvet_core::testing::{
        FragmentEchoGenerator, InMemoryConversationStore, InMemoryEventLedger, RecordingMessenger,
        RecordingNotifier, StaticSearchBackend,
    };
    use otvet_core::{DeliveryPipeline, RetryPolicy};

    struct TestApp {
        router: axum::Router,
        messenger: Arc<RecordingMessenger>,
        store: Arc<InMemoryConversationStore>,
    }

    fn test_app() -> TestApp {
        let backend = Arc::new(StaticSearchBackend::with_product_hits(
            "12345",
            vec![SearchHit {
                text: "Цена 120000 руб".to_string(),
                source: "item_12345.txt".to_string(),
                score: 0.9,
            }],
        ));
        let store = Arc::new(InMemoryConversationStore::default());
        let messenger = Arc::new(RecordingMessenger::default());

        let policy =
            ReplyPolicy::new(RetrievalCascade::new(backend), Arc::new(FragmentEchoGenerator));
        let delivery = DeliveryPipeline::new(
            messenger.clone(),
            store.clone(),
            Arc::new(RecordingNotifier::default()),
            RetryPolicy { max_attempts: 1, base_delay_ms: 0, max_delay_ms: 0 },
            "900",
        );
        let responder = Arc::new(Responder::new(
            Arc::new(InMemoryEventLedger::default()),
            store.clone(),
            policy,
            delivery,
            20,
        ));

        TestApp { router: super::router(responder, "900".to_string()), messenger, store }
    }

    fn webhook_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/avito/webhook")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    const VALID_BODY: &str = r#"{
        "id": "evt-1",
        "type": "message",
        "payload": {
            "chat_id": "chat-1",
            "user_id": 900,
            "message": {
                "id": "msg-1",
                "type": "text",
                "text": "Какая цена?",
                "created": 1719830000,
                "author_id": 101
            },
            "context": {"item_id": 12345}
        }
    }"#;

    #[tokio::test]
    async fn valid_deliveries_are_acknowledged_and_processed() {
        let app = test_app();

        let response = app
            .router
            .clone()
            .oneshot(webhook_request(VALID_BODY))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        // The cycle runs detached from the HTTP response.
        let mut sent = Vec::new();
        for _ in 0..50 {
            sent = app.messenger.sent_texts().await;
            if !sent.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("120000"));
        assert_eq!(app.store.dialog_records().await.len(), 1);
    }

    #[tokio::test]
    async fn undecodable_bodies_are_rejected_with_bad_request() {
        let app = test_app();

        let response = app
            .router
            .clone()
            .oneshot(webhook_request("{not json"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(app.messenger.sent_texts().await.is_empty());
    }

    #[tokio::test]
    async fn deliveries_without_a_message_are_acknowledged_silently() {
        let app = test_app();

        let body = r#"{"id": "evt-2", "type": "webhook_subscription",
                       "payload": {"chat_id": "chat-1", "user_id": 900}}"#;
        let response =
            app.router.clone().oneshot(webhook_request(body)).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(app.messenger.sent_texts().await.is_empty());
    }
}
