//! Semantic retrieval over a Gemini File Search corpus.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use otvet_core::config::GeminiConfig;
use otvet_core::retrieval::{SearchBackend, SearchError, SearchHit};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const RESULTS_COUNT: u32 = 5;

#[derive(Debug, Error)]
pub enum FileSearchError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("corpus api answered {status}: {body}")]
    Api { status: u16, body: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    results_count: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    metadata_filters: Vec<MetadataFilter<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetadataFilter<'a> {
    key: &'a str,
    conditions: Vec<Condition<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Condition<'a> {
    operation: &'a str,
    string_value: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    relevant_chunks: Vec<RelevantChunk>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelevantChunk {
    #[serde(default)]
    chunk_relevance_score: f64,
    chunk: Option<Chunk>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Chunk {
    #[serde(default)]
    name: String,
    data: Option<ChunkData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkData {
    #[serde(default)]
    string_value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CorporaList {
    #[serde(default)]
    corpora: Vec<Corpus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Corpus {
    name: String,
    #[serde(default)]
    display_name: String,
}

/// Client for one File Search corpus, resolved lazily by display name and
/// created when absent. The resolved corpus resource name is cached for
/// the process lifetime.
pub struct FileSearchClient {
    http: reqwest::Client,
    api_key: SecretString,
    store_name: String,
    corpus: Mutex<Option<String>>,
}

impl FileSearchClient {
    pub fn new(config: &GeminiConfig) -> Result<Self, FileSearchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FileSearchError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            store_name: config.store_name.clone(),
            corpus: Mutex::new(None),
        })
    }

    pub async fn query(
        &self,
        query: &str,
        item_id: Option<&str>,
    ) -> Result<Vec<SearchHit>, FileSearchError> {
        let corpus = self.ensure_corpus().await?;
        let url = format!("{API_BASE}/{corpus}:query");

        let metadata_filters = match item_id {
            Some(item_id) => vec![MetadataFilter {
                key: "document.custom_metadata.item_id",
                conditions: vec![Condition { operation: "EQUAL", string_value: item_id }],
            }],
            None => Vec::new(),
        };
        let request = QueryRequest { query, results_count: RESULTS_COUNT, metadata_filters };

        let response: QueryResponse = self.post_json(&url, &request).await?;
        let hits: Vec<SearchHit> = response
            .relevant_chunks
            .into_iter()
            .filter_map(|relevant| {
                let chunk = relevant.chunk?;
                let text = chunk.data.map(|d| d.string_value).unwrap_or_default();
                if text.is_empty() {
                    return None;
                }
                Some(SearchHit {
                    text,
                    source: source_from_chunk_name(&chunk.name),
                    score: relevant.chunk_relevance_score,
                })
            })
            .collect();

        debug!(
            event_name = "rag.search.completed",
            item_id = item_id.unwrap_or("-"),
            hits = hits.len(),
        );
        Ok(hits)
    }

    async fn ensure_corpus(&self) -> Result<String, FileSearchError> {
        let mut cached = self.corpus.lock().await;
        if let Some(name) = cached.as_ref() {
            return Ok(name.clone());
        }

        let listed: CorporaList = self.get_json(&format!("{API_BASE}/corpora")).await?;
        if let Some(existing) =
            listed.corpora.into_iter().find(|c| c.display_name == self.store_name)
        {
            info!(event_name = "rag.corpus.found", corpus = %existing.name);
            *cached = Some(existing.name.clone());
            return Ok(existing.name);
        }

        let created: Corpus = self
            .post_json(
                &format!("{API_BASE}/corpora"),
                &serde_json::json!({"displayName": self.store_name}),
            )
            .await?;
        info!(event_name = "rag.corpus.created", corpus = %created.name);
        *cached = Some(created.name.clone());
        Ok(created.name)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, FileSearchError> {
        let response = self
            .http
            .get(url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| FileSearchError::Transport(e.to_string()))?;
        decode_response(response).await
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &impl Serialize,
    ) -> Result<T, FileSearchError> {
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| FileSearchError::Transport(e.to_string()))?;
        decode_response(response).await
    }
}

async fn decode_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, FileSearchError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FileSearchError::Api { status: status.as_u16(), body });
    }
    response.json().await.map_err(|e| FileSearchError::Transport(e.to_string()))
}

/// Chunk names look like `corpora/<c>/documents/<doc>/chunks/<n>`; the
/// document segment is the uploaded file's identifier.
fn source_from_chunk_name(name: &str) -> String {
    name.split('/').nth(3).filter(|s| !s.is_empty()).unwrap_or("unknown").to_string()
}

#[async_trait]
impl SearchBackend for FileSearchClient {
    async fn search(
        &self,
        query: &str,
        product_id: Option<&str>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        self.query(query, product_id).await.map_err(|e| SearchError(e.to_string()))
    }
}
