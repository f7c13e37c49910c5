//! In-memory implementations of the port traits for tests.
//!
//! These back the unit tests here and the cycle tests of downstream crates,
//! so they live in the library rather than under `#[cfg(test)]`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::dialog::DialogRecord;
use crate::domain::message::StoredMessage;
use crate::policy::{AnswerGenerator, GenerateError};
use crate::ports::{
    AuditNotifier, ConversationStore, EscalationAlert, EventLedger, MarkOutcome, MessengerApi,
    MessengerError, NotifierError, ReplyRecord, StorageError,
};
use crate::retrieval::{SearchBackend, SearchError, SearchHit};

#[derive(Default)]
pub struct InMemoryEventLedger {
    seen: RwLock<HashSet<String>>,
}

#[async_trait]
impl EventLedger for InMemoryEventLedger {
    async fn has_been_processed(&self, event_id: &str) -> Result<bool, StorageError> {
        Ok(self.seen.read().await.contains(event_id))
    }

    async fn mark_processed(&self, event_id: &str) -> Result<MarkOutcome, StorageError> {
        if self.seen.write().await.insert(event_id.to_string()) {
            Ok(MarkOutcome::Marked)
        } else {
            Ok(MarkOutcome::AlreadyMarked)
        }
    }
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    messages: RwLock<Vec<StoredMessage>>,
    records: RwLock<Vec<DialogRecord>>,
    failing_writes: bool,
}

impl InMemoryConversationStore {
    /// A store whose writes all fail while reads keep working.
    pub fn failing_writes() -> Self {
        Self { failing_writes: true, ..Self::default() }
    }

    pub async fn messages(&self) -> Vec<StoredMessage> {
        self.messages.read().await.clone()
    }

    pub async fn dialog_records(&self) -> Vec<DialogRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(&self, message: StoredMessage) -> Result<(), StorageError> {
        if self.failing_writes {
            return Err(StorageError("append rejected".to_string()));
        }
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn recent_context(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let guard = self.messages.read().await;
        let mut matching: Vec<(usize, &StoredMessage)> = guard
            .iter()
            .enumerate()
            .filter(|(_, m)| m.conversation_id == conversation_id)
            .collect();
        // created_at first, insertion order on ties, same as the SQL store.
        matching.sort_by(|(ia, a), (ib, b)| a.created_at.cmp(&b.created_at).then(ia.cmp(ib)));
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).map(|(_, m)| m.clone()).collect())
    }

    async fn append_dialog_record(&self, record: DialogRecord) -> Result<(), StorageError> {
        if self.failing_writes {
            return Err(StorageError("append rejected".to_string()));
        }
        self.records.write().await.push(record);
        Ok(())
    }
}

/// Records every messenger call in order and can fail the first N sends
/// with a transient error.
#[derive(Default)]
pub struct RecordingMessenger {
    operations: RwLock<Vec<String>>,
    sent_texts: RwLock<Vec<String>>,
    send_attempts: AtomicU32,
    failing_sends: u32,
    permanent_failure: bool,
}

impl RecordingMessenger {
    pub fn failing_sends(count: u32) -> Self {
        Self { failing_sends: count, ..Self::default() }
    }

    pub fn permanently_failing() -> Self {
        Self { permanent_failure: true, ..Self::default() }
    }

    pub async fn operations(&self) -> Vec<String> {
        self.operations.read().await.clone()
    }

    pub async fn sent_texts(&self) -> Vec<String> {
        self.sent_texts.read().await.clone()
    }

    pub fn send_attempts(&self) -> u32 {
        self.send_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessengerApi for RecordingMessenger {
    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<(), MessengerError> {
        let attempt = self.send_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.permanent_failure {
            return Err(MessengerError::Permanent("rejected".to_string()));
        }
        if attempt <= self.failing_sends {
            return Err(MessengerError::Transient("connection reset".to_string()));
        }
        self.operations.write().await.push(format!("send:{conversation_id}"));
        self.sent_texts.write().await.push(text.to_string());
        Ok(())
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<(), MessengerError> {
        self.operations.write().await.push(format!("mark_read:{conversation_id}"));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    replies: RwLock<Vec<ReplyRecord>>,
    escalations: RwLock<Vec<EscalationAlert>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self { failing: true, ..Self::default() }
    }

    pub async fn replies(&self) -> Vec<ReplyRecord> {
        self.replies.read().await.clone()
    }

    pub async fn escalations(&self) -> Vec<EscalationAlert> {
        self.escalations.read().await.clone()
    }
}

#[async_trait]
impl AuditNotifier for RecordingNotifier {
    async fn publish_reply(&self, record: &ReplyRecord) -> Result<(), NotifierError> {
        if self.failing {
            return Err(NotifierError("telegram unavailable".to_string()));
        }
        self.replies.write().await.push(record.clone());
        Ok(())
    }

    async fn publish_escalation(&self, alert: &EscalationAlert) -> Result<(), NotifierError> {
        if self.failing {
            return Err(NotifierError("telegram unavailable".to_string()));
        }
        self.escalations.write().await.push(alert.clone());
        Ok(())
    }
}

/// Serves canned hits per product id plus a general-scope list, and counts
/// calls so tests can assert which scopes were queried.
#[derive(Default)]
pub struct StaticSearchBackend {
    product_hits: HashMap<String, Vec<SearchHit>>,
    general_hits: Vec<SearchHit>,
    calls: AtomicUsize,
}

impl StaticSearchBackend {
    pub fn with_product_hits(product_id: &str, hits: Vec<SearchHit>) -> Self {
        Self {
            product_hits: HashMap::from([(product_id.to_string(), hits)]),
            ..Self::default()
        }
    }

    pub fn with_general_hits(hits: Vec<SearchHit>) -> Self {
        Self { general_hits: hits, ..Self::default() }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchBackend for StaticSearchBackend {
    async fn search(
        &self,
        _query: &str,
        product_id: Option<&str>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match product_id {
            Some(id) => Ok(self.product_hits.get(id).cloned().unwrap_or_default()),
            None => Ok(self.general_hits.clone()),
        }
    }
}

/// Answers with the retrieved fragment texts joined together, which lets
/// tests assert that evidence flowed into the reply.
#[derive(Default)]
pub struct FragmentEchoGenerator;

#[async_trait]
impl AnswerGenerator for FragmentEchoGenerator {
    async fn generate(
        &self,
        _question: &str,
        _context: &crate::context::ConversationContext,
        retrieval: &crate::domain::retrieval::RetrievalOutcome,
    ) -> Result<String, GenerateError> {
        if retrieval.fragments.is_empty() {
            return Err(GenerateError("no evidence to answer from".to_string()));
        }
        let texts: Vec<&str> = retrieval.fragments.iter().map(|f| f.text.as_str()).collect();
        Ok(texts.join(" "))
    }
}
