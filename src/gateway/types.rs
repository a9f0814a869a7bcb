//! Core types for the provider gateway.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::images::ImagePayload;

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Attribution for usage records and log correlation.
///
/// Every request through the gateway carries attribution so we know:
/// - Which run it belongs to (run_id)
/// - Which subject it was made for (subject_id)
/// - Which code path triggered it (caller)
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    /// Batch run this request is part of.
    pub run_id: Option<Uuid>,
    /// Subject key the request was made for.
    pub subject_id: Option<String>,
    /// Which code path made this call, for debugging.
    pub caller: &'static str,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self {
            caller,
            ..Default::default()
        }
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }
}

// =============================================================================
// PROVIDERS
// =============================================================================

/// Remote multimodal endpoints the harness can query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions (GPT-4o).
    OpenAi,
    /// Google Generative Language API (Gemini).
    Gemini,
    /// xAI chat completions (Grok), OpenAI-compatible.
    Grok,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Grok => "xai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o",
            ProviderKind::Gemini => "gemini-1.5-pro",
            ProviderKind::Grok => "grok-4-fast-reasoning",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            ProviderKind::Grok => "https://api.x.ai/v1",
        }
    }

    /// Environment variable holding the API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::Grok => "XAI_API_KEY",
        }
    }

    pub fn default_max_tokens(&self) -> Option<u32> {
        match self {
            ProviderKind::OpenAi => Some(1000),
            ProviderKind::Gemini => None,
            ProviderKind::Grok => Some(2000),
        }
    }

    pub fn default_temperature(&self) -> Option<f32> {
        match self {
            ProviderKind::OpenAi => None,
            ProviderKind::Gemini | ProviderKind::Grok => Some(0.3),
        }
    }

    /// Output column holding the raw response text.
    pub fn response_column(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "Combined GPT Response",
            ProviderKind::Gemini => "Combined Gemini Response",
            ProviderKind::Grok => "Grok Response",
        }
    }

    pub fn default_output_file(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "diagnosis_results.csv",
            ProviderKind::Gemini => "diagnosis_gemini_results.csv",
            ProviderKind::Grok => "diagnosis_grok_results.csv",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "gpt" | "gpt4o" | "gpt-4o" => Ok(ProviderKind::OpenAi),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "grok" | "xai" => Ok(ProviderKind::Grok),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

// =============================================================================
// CHAT TYPES
// =============================================================================

/// Chat message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One piece of a multimodal message.
#[derive(Debug, Clone)]
pub enum ContentPart {
    Text(String),
    Image(ImagePayload),
}

/// A chat message made of text and image parts.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            parts: vec![ContentPart::Text(content.into())],
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![ContentPart::Text(content.into())],
        }
    }

    /// User turn with the prompt first, then every image in order.
    pub fn user_with_images(content: impl Into<String>, images: &[ImagePayload]) -> Self {
        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(ContentPart::Text(content.into()));
        parts.extend(images.iter().cloned().map(ContentPart::Image));
        Self {
            role: Role::User,
            parts,
        }
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.as_str()),
                ContentPart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, ContentPart::Image(_)))
            .count()
    }
}

/// Provider plus model id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatModel {
    pub provider: ProviderKind,
    pub model_id: String,
}

impl ChatModel {
    pub fn new(provider: ProviderKind, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
        }
    }

    /// Provider default model, e.g. "gpt-4o".
    pub fn default_for(provider: ProviderKind) -> Self {
        Self::new(provider, provider.default_model())
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn provider(&self) -> &'static str {
        self.provider.as_str()
    }
}

/// Request for chat completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model to use.
    pub model: ChatModel,
    /// Messages in the conversation.
    pub messages: Vec<Message>,
    /// Sampling temperature; provider default when unset.
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Attribution for usage records.
    pub attribution: Attribution,
}

impl ChatRequest {
    pub fn new(model: ChatModel, messages: Vec<Message>, attribution: Attribution) -> Self {
        Self {
            model,
            messages,
            temperature: None,
            max_tokens: None,
            attribution,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Apply the provider's default sampling settings where none are set.
    pub fn with_provider_defaults(mut self) -> Self {
        let provider = self.model.provider;
        if self.temperature.is_none() {
            self.temperature = provider.default_temperature();
        }
        if self.max_tokens.is_none() {
            self.max_tokens = provider.default_max_tokens();
        }
        self
    }

    pub fn text_chars(&self) -> usize {
        self.messages.iter().map(|m| m.text().len()).sum()
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown(String),
}

impl From<Option<String>> for FinishReason {
    fn from(s: Option<String>) -> Self {
        match s.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") | Some("max_tokens") => FinishReason::Length,
            Some("content_filter") | Some("safety") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Unknown(other.to_string()),
            None => FinishReason::Unknown("none".to_string()),
        }
    }
}

/// Response from chat completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Generated content.
    pub content: String,
    /// Input tokens consumed.
    pub input_tokens: u32,
    /// Output tokens generated.
    pub output_tokens: u32,
    /// Time taken for the request.
    pub latency: Duration,
    /// Why the model stopped.
    pub finish_reason: FinishReason,
}

impl ChatResponse {
    pub(crate) fn empty() -> Self {
        Self {
            content: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            latency: Duration::from_millis(0),
            finish_reason: FinishReason::Unknown("error".to_string()),
        }
    }
}
