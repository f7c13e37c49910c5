use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::retrieval::{
    FragmentScope, RetrievalFragment, RetrievalOutcome, RetrievalStrategy,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("search backend failure: {0}")]
pub struct SearchError(pub String);

/// One relevance-ranked hit from the external retrieval backend. The
/// cascade tags it with a scope when it assembles the outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    pub text: String,
    pub source: String,
    pub score: f64,
}

/// Black-box document search. `product_id` narrows the query to the
/// documents attached to one listing.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(
        &self,
        query: &str,
        product_id: Option<&str>,
    ) -> Result<Vec<SearchHit>, SearchError>;
}

/// Product-specific-then-general retrieval. A cascade, never a union:
/// product-scoped evidence is returned alone when it exists, and an empty
/// scoped step falls back silently to the general scope. Backend errors
/// count as an empty step so a retrieval outage degrades to the no-match
/// path instead of failing the cycle.
pub struct RetrievalCascade {
    backend: Arc<dyn SearchBackend>,
}

impl RetrievalCascade {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }

    pub async fn retrieve(&self, query: &str, product_id: Option<&str>) -> RetrievalOutcome {
        if let Some(product_id) = product_id {
            let scoped = self.step(query, Some(product_id), FragmentScope::ProductSpecific).await;
            if !scoped.is_empty() {
                debug!(
                    event_name = "retrieval.cascade.product_hit",
                    product_id,
                    fragments = scoped.len(),
                    "product-scoped retrieval satisfied the query"
                );
                return RetrievalOutcome {
                    found: true,
                    fragments: scoped,
                    strategy_used: RetrievalStrategy::ProductSpecific,
                };
            }

            let general = self.step(query, None, FragmentScope::General).await;
            if general.is_empty() {
                return RetrievalOutcome::empty(RetrievalStrategy::None);
            }
            debug!(
                event_name = "retrieval.cascade.fallback_hit",
                product_id,
                fragments = general.len(),
                "scoped step was empty, general scope answered"
            );
            return RetrievalOutcome {
                found: true,
                fragments: general,
                strategy_used: RetrievalStrategy::CascadedToGeneral,
            };
        }

        let general = self.step(query, None, FragmentScope::General).await;
        if general.is_empty() {
            return RetrievalOutcome::empty(RetrievalStrategy::None);
        }
        RetrievalOutcome {
            found: true,
            fragments: general,
            strategy_used: RetrievalStrategy::General,
        }
    }

    async fn step(
        &self,
        query: &str,
        product_id: Option<&str>,
        scope: FragmentScope,
    ) -> Vec<RetrievalFragment> {
        match self.backend.search(query, product_id).await {
            Ok(hits) => hits
                .into_iter()
                .map(|hit| RetrievalFragment {
                    text: hit.text,
                    source_identifier: hit.source,
                    relevance_score: hit.score,
                    scope,
                })
                .collect(),
            Err(error) => {
                warn!(
                    event_name = "retrieval.cascade.step_failed",
                    scoped = product_id.is_some(),
                    error = %error,
                    "search backend failed, treating step as empty"
                );
                Vec::new()
            }
        }
    }
}
