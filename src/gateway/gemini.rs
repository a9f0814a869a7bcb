//! Gemini `generateContent` adapter.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::http::{
    check_input_size, extract_request_id, extract_retry_after, read_limited_body,
};
use super::openai::ChatProvider;
use super::types::*;

const PROVIDER: &str = "gemini";

/// Google Generative Language API adapter.
#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiAdapter {
    /// Create with custom configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let key_value = HeaderValue::from_str(&api_key)
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert("x-goog-api-key", key_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/models/{model}:generateContent", self.base_url)
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct ApiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<ApiPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum ApiPart {
    #[serde(rename = "text")]
    Text(String),
    InlineData(InlineData),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

fn api_parts(message: &Message) -> Vec<ApiPart> {
    message
        .parts
        .iter()
        .map(|p| match p {
            ContentPart::Text(text) => ApiPart::Text(text.clone()),
            ContentPart::Image(img) => ApiPart::InlineData(InlineData {
                mime_type: img.mime_type(),
                data: img.to_base64(),
            }),
        })
        .collect()
}

impl From<&ChatRequest> for GenerateRequest {
    fn from(req: &ChatRequest) -> Self {
        let mut contents = Vec::new();
        let mut system_parts = Vec::new();

        for m in &req.messages {
            match m.role {
                Role::System => system_parts.extend(api_parts(m)),
                Role::User => contents.push(ApiContent {
                    role: Some("user"),
                    parts: api_parts(m),
                }),
                Role::Assistant => contents.push(ApiContent {
                    role: Some("model"),
                    parts: api_parts(m),
                }),
            }
        }

        let generation_config = if req.temperature.is_some() || req.max_tokens.is_some() {
            Some(GenerationConfig {
                temperature: req.temperature,
                max_output_tokens: req.max_tokens,
            })
        } else {
            None
        };

        Self {
            contents,
            system_instruction: (!system_parts.is_empty()).then(|| ApiContent {
                role: None,
                parts: system_parts,
            }),
            generation_config,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    usage_metadata: Option<UsageMetadata>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    status: Option<String>,
}

// =============================================================================
// CHAT PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ChatProvider for GeminiAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        check_input_size(req)?;

        let start = Instant::now();
        let api_req = GenerateRequest::from(req);

        let mut response = self
            .client
            .post(self.generate_url(req.model.model_id()))
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let request_id = extract_request_id(response.headers());
        let retry_after = extract_retry_after(response.headers());

        let body = read_limited_body(PROVIDER, &mut response).await?;

        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = if let Some(id) = &request_id {
            ctx.with_request_id(id)
        } else {
            ctx
        };

        if !status.is_success() {
            let parsed_error = serde_json::from_str::<GenerateResponse>(&body)
                .ok()
                .and_then(|p| p.error);
            let (message, ctx, exhausted) = match parsed_error {
                Some(error) => {
                    let exhausted = error.status.as_deref() == Some("RESOURCE_EXHAUSTED");
                    let ctx = match error.status {
                        Some(code) => ctx.with_code(code),
                        None => ctx,
                    };
                    (error.message.unwrap_or_default(), ctx, exhausted)
                }
                None => (format!("HTTP {}", status.as_u16()), ctx, false),
            };

            if status.as_u16() == 429 || exhausted {
                return Err(ProviderError::rate_limited(PROVIDER, retry_after, ctx));
            }
            let retryable = status.is_server_error() || status.as_u16() == 408;
            return Err(ProviderError::provider_with_context(
                PROVIDER, message, retryable, ctx,
            ));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::provider(PROVIDER, format!("Invalid JSON: {e}"), false))?;

        if let Some(error) = parsed.error {
            return Err(ProviderError::provider(
                PROVIDER,
                error.message.unwrap_or_default(),
                false,
            ));
        }

        let Some(candidate) = parsed.candidates.and_then(|c| c.into_iter().next()) else {
            let reason = parsed
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .map(|r| format!("Prompt blocked: {r}"))
                .unwrap_or_else(|| "No candidates in response".to_string());
            return Err(ProviderError::provider(PROVIDER, reason, false));
        };

        let content: String = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let (input_tokens, output_tokens) = parsed
            .usage_metadata
            .map(|u| {
                (
                    u.prompt_token_count.unwrap_or(0),
                    u.candidates_token_count.unwrap_or(0),
                )
            })
            .unwrap_or((0, 0));

        Ok(ChatResponse {
            content,
            input_tokens,
            output_tokens,
            latency: start.elapsed(),
            finish_reason: FinishReason::from(candidate.finish_reason),
        })
    }
}
