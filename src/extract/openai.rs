//! Chat-completions client used as the structured-extraction capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{ExtractionInput, StructuredExtractor, Target};
use crate::config::Settings;
use crate::error::ExtractError;

#[derive(Clone)]
pub struct OpenAiExtractor {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    response_format: Value,
    messages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiExtractor {
    pub fn new(api_key: impl Into<String>, settings: &Settings) -> Result<Self, ExtractError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.extraction_timeout())
            .build()
            .map_err(|e| ExtractError::Network(e.to_string()))?;
        Ok(Self {
            http_client,
            api_key: api_key.into(),
            base_url: settings.openai_base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
        })
    }

    fn request<'a>(&'a self, input: &ExtractionInput<'_>, target: &Target) -> ChatRequest<'a> {
        let schema = serde_json::to_string_pretty(&target.schema).unwrap_or_default();
        let mut system = target.instruction.to_string();
        if let ExtractionInput::Image(_) = input {
            system.push_str(
                "\n\nYou are looking at an IMAGE of a pricing page (cennik) from a yoga/wellness studio. \
                 Extract the data visible in the image.",
            );
        }
        system.push_str(&format!(
            "\n\nRespond with a single JSON object matching this schema:\n```json\n{}\n```\n\
             Return ONLY valid JSON. No markdown fences, no extra text.",
            schema
        ));

        let user = match input {
            ExtractionInput::Text(text) => json!({
                "role": "user",
                "content": format!("Extract data from this page content:\n\n{}", text),
            }),
            ExtractionInput::Image(data_uri) => json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": "Extract data from this image:" },
                    { "type": "image_url", "image_url": { "url": data_uri, "detail": "high" } },
                ],
            }),
        };

        ChatRequest {
            model: &self.model,
            temperature: 0.0,
            max_tokens: target.max_tokens,
            response_format: json!({ "type": "json_object" }),
            messages: vec![json!({ "role": "system", "content": system }), user],
        }
    }
}

#[async_trait]
impl StructuredExtractor for OpenAiExtractor {
    async fn extract(
        &self,
        input: ExtractionInput<'_>,
        target: &Target,
    ) -> Result<Value, ExtractError> {
        let start = std::time::Instant::now();
        let request = self.request(&input, target);

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Api {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }

        let raw: ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| ExtractError::Malformed(e.to_string()))?;

        debug!(
            category = %target.category,
            duration_ms = start.elapsed().as_millis() as u64,
            "chat completion"
        );

        let content = raw
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ExtractError::Empty)?;

        Ok(serde_json::from_str(strip_fences(&content))?)
    }
}

/// Tolerate a ```json fenced reply despite the instruction.
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
