pub mod config;
pub mod context;
pub mod delivery;
pub mod domain;
pub mod errors;
pub mod orchestrator;
pub mod policy;
pub mod ports;
pub mod retrieval;
pub mod testing;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use context::ConversationContext;
pub use delivery::{DeliveryError, DeliveryPipeline, RetryPolicy};
pub use domain::dialog::{DialogRecord, ReplyOutcome, ReplyStatus};
pub use domain::event::{InboundEvent, MessageKind};
pub use domain::message::StoredMessage;
pub use domain::retrieval::{
    FragmentScope, RetrievalFragment, RetrievalOutcome, RetrievalStrategy,
};
pub use errors::CycleError;
pub use orchestrator::{AbortReason, CycleOutcome, Responder};
pub use policy::{AnswerGenerator, GenerateError, ReplyPolicy};
pub use ports::{
    AuditNotifier, ConversationStore, EscalationAlert, EventLedger, MarkOutcome, MessengerApi,
    MessengerError, NotifierError, ReplyRecord, StorageError,
};
pub use retrieval::{RetrievalCascade, SearchBackend, SearchError, SearchHit};
