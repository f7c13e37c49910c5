use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FragmentScope {
    ProductSpecific,
    General,
}

/// One relevance-ranked text fragment from the retrieval backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalFragment {
    pub text: String,
    pub source_identifier: String,
    pub relevance_score: f64,
    pub scope: FragmentScope,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalStrategy {
    ProductSpecific,
    General,
    CascadedToGeneral,
    None,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductSpecific => "product-specific",
            Self::General => "general",
            Self::CascadedToGeneral => "cascaded-to-general",
            Self::None => "none",
        }
    }
}

/// Exactly one of these per reply cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    pub found: bool,
    pub fragments: Vec<RetrievalFragment>,
    pub strategy_used: RetrievalStrategy,
}

impl RetrievalOutcome {
    pub fn empty(strategy_used: RetrievalStrategy) -> Self {
        Self { found: false, fragments: Vec::new(), strategy_used }
    }
}
