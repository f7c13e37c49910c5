//! Grounded answer generation via Gemini `generateContent`.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use otvet_core::config::GeminiConfig;
use otvet_core::context::{render_dialog, render_knowledge, ConversationContext};
use otvet_core::domain::retrieval::RetrievalOutcome;
use otvet_core::policy::{AnswerGenerator, GenerateError};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const TEMPERATURE: f64 = 0.3;
const MAX_OUTPUT_TOKENS: u32 = 500;

const PROMPT_TEMPLATE: &str = "Ты — вежливый помощник продавца на Avito.
Отвечай на вопросы покупателей ТОЛЬКО на основе предоставленной информации из базы знаний.

ВАЖНЫЕ ПРАВИЛА:
1. Используй ТОЛЬКО информацию из предоставленных фрагментов базы знаний
2. НЕ выдумывай цены, характеристики, наличие или условия
3. Если информации недостаточно для ответа — так и скажи
4. Отвечай кратко и по делу
5. Будь дружелюбным и профессиональным

Контекст диалога (последние сообщения):
{context}

Информация из базы знаний:
{knowledge}

Вопрос покупателя: {question}

Ответ:";

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

pub struct GeminiGenerator {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl GeminiGenerator {
    pub fn new(config: &GeminiConfig) -> Result<Self, GenerateError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerateError(e.to_string()))?;
        Ok(Self { http, api_key: config.api_key.clone(), model: config.model.clone() })
    }
}

fn render_prompt(question: &str, context: &ConversationContext, retrieval: &RetrievalOutcome) -> String {
    PROMPT_TEMPLATE
        .replace("{context}", &render_dialog(context))
        .replace("{knowledge}", &render_knowledge(retrieval))
        .replace("{question}", question)
}

fn first_candidate_text(response: GenerateResponse) -> String {
    response
        .candidates
        .into_iter()
        .find_map(|c| c.content)
        .map(|content| {
            content.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join("")
        })
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[async_trait]
impl AnswerGenerator for GeminiGenerator {
    async fn generate(
        &self,
        question: &str,
        context: &ConversationContext,
        retrieval: &RetrievalOutcome,
    ) -> Result<String, GenerateError> {
        let url = format!("{API_BASE}/models/{}:generateContent", self.model);
        let body = json!({
            "contents": [{"parts": [{"text": render_prompt(question, context, retrieval)}]}],
            "generationConfig": {
                "temperature": TEMPERATURE,
                "maxOutputTokens": MAX_OUTPUT_TOKENS
            }
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerateError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerateError(format!("generation api answered {status}: {body}")));
        }

        let decoded: GenerateResponse =
            response.json().await.map_err(|e| GenerateError(e.to_string()))?;
        let answer = first_candidate_text(decoded);
        if answer.is_empty() {
            return Err(GenerateError("model returned an empty completion".to_string()));
        }

        debug!(event_name = "rag.generate.completed", chars = answer.chars().count());
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use otvet_core::context::ConversationContext;
    use otvet_core::domain::message::StoredMessage;
    use otvet_core::domain::retrieval::{
        FragmentScope, RetrievalFragment, RetrievalOutcome, RetrievalStrategy,
    };

    use super::{first_candidate_text, render_prompt, GenerateResponse};

    #[test]
    fn prompt_includes_dialog_knowledge_and_question() {
        let context = ConversationContext::new(vec![StoredMessage::outbound(
            "chat-1", "seller-9", "Здравствуйте!", None,
        )]);
        let retrieval = RetrievalOutcome {
            found: true,
            fragments: vec![RetrievalFragment {
                text: "Цена 120000 руб".to_string(),
                source_identifier: "item_12345.txt".to_string(),
                relevance_score: 0.9,
                scope: FragmentScope::ProductSpecific,
            }],
            strategy_used: RetrievalStrategy::ProductSpecific,
        };

        let prompt = render_prompt("Какая цена?", &context, &retrieval);
        assert!(prompt.contains("Бот: Здравствуйте!"));
        assert!(prompt.contains("[1] Источник: item_12345.txt"));
        assert!(prompt.contains("Вопрос покупателя: Какая цена?"));
    }

    #[test]
    fn candidate_parts_are_joined_and_trimmed() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "  Цена — "}, {"text": "120000 руб.  "}]}}]}"#,
        )
        .expect("decode");
        assert_eq!(first_candidate_text(response), "Цена — 120000 руб.");
    }

    #[test]
    fn missing_candidates_collapse_to_empty() {
        let response: GenerateResponse = serde_json::from_str("{}").expect("decode");
        assert!(first_candidate_text(response).is_empty());
    }
}
