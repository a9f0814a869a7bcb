#![forbid(unsafe_code)]

//! # ct-rater-harness
//!
//! Ask multimodal LLMs to classify head CT scans the way a radiologist would,
//! and measure how they compare.
//!
//! For every subject in a spreadsheet the harness sends all of the subject's
//! CT images together with one fixed prompt. The prompt asks for two
//! hypothetical classifications: one without the clinical history and one
//! with it. Each must carry a Likert confidence (1–5). The two confidences
//! are pulled out of the free-text answer and written next to the raw
//! response.
//!
//! The result sheets can then be scored: Cohen's Kappa against a reference
//! reading (`agreement`) and confidence distributions split by history
//! condition (`confidence`).
//!
//! Requests go out one at a time. Rate limits and transient failures are
//! retried a bounded number of times with a fixed pause.

pub mod agreement;
pub mod confidence;
pub mod config;
pub mod gateway;
pub mod images;
pub mod likert;
pub mod prompts;
pub mod retry;
pub mod runner;
pub mod sheet;

pub use config::{ConfigError, ProviderSettings, RunConfig};
pub use gateway::{
    Attribution, ChatGateway, GatewayConfig, ProviderError, ProviderGateway, ProviderKind,
    UsageSink,
};
pub use likert::{extract_scores, ExtractionPolicy, LikertScore, ScorePair};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use runner::{
    run_batch, run_classification, BatchReport, ClassificationRunner, NoImagesPolicy,
    RequestOutcome, ResultRow,
};
