use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    Answered,
    NoMatch,
    Escalated,
}

impl ReplyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answered => "ANSWERED",
            Self::NoMatch => "NO_MATCH",
            Self::Escalated => "ESCALATED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "ANSWERED" => Some(Self::Answered),
            "NO_MATCH" => Some(Self::NoMatch),
            "ESCALATED" => Some(Self::Escalated),
            _ => None,
        }
    }
}

/// What the reply policy decided for one cycle.
///
/// `sources` is non-empty exactly when `status` is `Answered`; the policy
/// refuses to claim an answer without at least one backing fragment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyOutcome {
    pub text: String,
    pub status: ReplyStatus,
    pub sources: BTreeSet<String>,
    pub escalation_triggered: bool,
}

/// Write-once record of one completed question/answer exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogRecord {
    pub conversation_id: String,
    pub product_id: Option<String>,
    pub question: String,
    pub answer: String,
    pub status: ReplyStatus,
    pub sources: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}
