//! Provider gateway for multimodal chat completions.

pub mod error;
pub mod gemini;
mod http;
pub mod openai;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use crate::retry::{retry_with_backoff, Retried, RetryDecision, RetryPolicy};

use gemini::GeminiAdapter;
use openai::{ChatProvider, OpenAiCompatAdapter};
use usage::{ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use error::{ErrorContext, ProviderError};
pub use http::DEFAULT_TIMEOUT;
pub use types::*;
pub use usage::{NoopUsageSink, TracingUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    /// Send a request under the gateway's retry policy.
    async fn chat_with_retries(&self, req: &ChatRequest) -> Retried<ChatResponse, ProviderError>;
}

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub retry: RetryPolicy,
}

/// Rate limits, timeouts, connection failures and 5xx are retried; anything
/// else ends the attempt loop.
pub fn classify_provider_error(err: &ProviderError) -> RetryDecision {
    if err.is_retryable() {
        RetryDecision::Retry
    } else {
        RetryDecision::Abort
    }
}

/// Build the adapter for a provider.
pub fn build_provider(
    kind: ProviderKind,
    api_key: &str,
    base_url: Option<&str>,
    timeout: Duration,
) -> Result<Arc<dyn ChatProvider>, ProviderError> {
    let base_url = base_url.unwrap_or(kind.default_base_url());
    Ok(match kind {
        ProviderKind::OpenAi | ProviderKind::Grok => Arc::new(OpenAiCompatAdapter::with_config(
            kind, api_key, base_url, timeout,
        )?),
        ProviderKind::Gemini => Arc::new(GeminiAdapter::with_config(api_key, base_url, timeout)?),
    })
}

pub struct ProviderGateway<U: UsageSinkTrait> {
    provider: Arc<dyn ChatProvider>,
    usage_sink: Arc<U>,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> ChatGateway for ProviderGateway<U> {
    async fn chat_with_retries(&self, req: &ChatRequest) -> Retried<ChatResponse, ProviderError> {
        ProviderGateway::chat_with_retries(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    pub fn with_config(
        provider: Arc<dyn ChatProvider>,
        usage_sink: Arc<U>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            provider,
            usage_sink,
            config,
        }
    }

    pub async fn chat_with_retries(
        &self,
        req: &ChatRequest,
    ) -> Retried<ChatResponse, ProviderError> {
        retry_with_backoff(&self.config.retry, classify_provider_error, |attempt| async move {
            let result = self.provider.chat(req).await;
            match &result {
                Ok(resp) => self.record_usage(req, attempt, resp, None).await,
                Err(err) => {
                    self.record_usage(req, attempt, &ChatResponse::empty(), Some(err))
                        .await
                }
            }
            result
        })
        .await
    }

    async fn record_usage(
        &self,
        req: &ChatRequest,
        attempt: u32,
        resp: &ChatResponse,
        error: Option<&ProviderError>,
    ) {
        let record = ProviderCallRecord::new(
            req.model.provider(),
            req.model.model_id(),
            req.attribution.caller,
        )
        .attempt(attempt)
        .tokens(resp.input_tokens, resp.output_tokens)
        .latency(resp.latency.as_millis() as u64)
        .run(req.attribution.run_id)
        .subject(req.attribution.subject_id.clone());

        let record = match error {
            Some(err) => record
                .error(err.code())
                .request_id(err.request_id().map(str::to_string)),
            None => record,
        };

        self.usage_sink.record(record).await;
    }
}
