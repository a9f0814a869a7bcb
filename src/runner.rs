//! Classification request runner and batch driver.
//!
//! The runner turns one subject's images and history into a single multimodal
//! request and never fails on remote errors: exhausted or aborted retries come
//! back as `RequestOutcome::Failed`. The batch driver walks subjects strictly
//! in order and collects rows that are written once at the end.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, RunConfig};
use crate::gateway::{
    Attribution, ChatGateway, ChatModel, ChatRequest, ChatResponse, ProviderError,
};
use crate::images::{ImageLibrary, ImagePayload};
use crate::likert::{extract_scores, ExtractionPolicy, ScorePair};
use crate::prompts::classification_prompt;
use crate::sheet::{self, Record, SheetError, Subject};

/// Characters of history kept in the output row.
pub const HISTORY_EXCERPT_CHARS: usize = 200;

pub const ID_COLUMN: &str = "Patient ID";
pub const SCORE_WITHOUT_HISTORY_COLUMN: &str = "Likert-Skala ohne Anamnese";
pub const SCORE_WITH_HISTORY_COLUMN: &str = "Likert-Skala mit Anamnese";
pub const IMAGE_COUNT_COLUMN: &str = "Number of Images";
pub const HISTORY_COLUMN: &str = "Medical History";
pub const ERROR_COLUMN: &str = "Error";

pub const NO_IMAGES_MARKER: &str = "No images found";

const CALLER: &str = "runner::classify";

// =============================================================================
// OUTCOMES
// =============================================================================

/// Result of one classification request.
#[derive(Debug)]
pub enum RequestOutcome {
    Response(ChatResponse),
    /// Retries exhausted or a permanent error.
    Failed { attempts: u32, error: ProviderError },
}

impl RequestOutcome {
    pub fn response(&self) -> Option<&ChatResponse> {
        match self {
            RequestOutcome::Response(resp) => Some(resp),
            RequestOutcome::Failed { .. } => None,
        }
    }
}

/// What to do with a subject that has no matching images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoImagesPolicy {
    /// Log and move on; no row.
    #[default]
    Skip,
    /// Emit a placeholder row with an error marker.
    Record,
}

impl FromStr for NoImagesPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(NoImagesPolicy::Skip),
            "record" => Ok(NoImagesPolicy::Record),
            other => Err(format!("unknown no-images policy: {other}")),
        }
    }
}

impl fmt::Display for NoImagesPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NoImagesPolicy::Skip => "skip",
            NoImagesPolicy::Record => "record",
        })
    }
}

/// One output row.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub subject_id: String,
    pub response: String,
    pub scores: ScorePair,
    pub image_count: usize,
    pub history_excerpt: String,
    pub error: Option<String>,
}

impl ResultRow {
    /// Placeholder for a subject without images.
    pub fn no_images(subject: &Subject) -> Self {
        Self {
            subject_id: subject.id.clone(),
            response: String::new(),
            scores: ScorePair::unknown(),
            image_count: 0,
            history_excerpt: history_excerpt(subject.history.as_deref()),
            error: Some(NO_IMAGES_MARKER.to_string()),
        }
    }

    pub fn to_record(&self, response_column: &str) -> Record {
        let mut record = vec![
            (ID_COLUMN.to_string(), self.subject_id.clone()),
            (response_column.to_string(), self.response.clone()),
            (
                SCORE_WITHOUT_HISTORY_COLUMN.to_string(),
                self.scores.without_history.to_string(),
            ),
            (
                SCORE_WITH_HISTORY_COLUMN.to_string(),
                self.scores.with_history.to_string(),
            ),
            (IMAGE_COUNT_COLUMN.to_string(), self.image_count.to_string()),
            (HISTORY_COLUMN.to_string(), self.history_excerpt.clone()),
        ];
        if let Some(error) = &self.error {
            record.push((ERROR_COLUMN.to_string(), error.clone()));
        }
        record
    }
}

/// First `HISTORY_EXCERPT_CHARS` characters, with `...` when cut.
pub fn history_excerpt(history: Option<&str>) -> String {
    let Some(history) = history.map(str::trim).filter(|h| !h.is_empty()) else {
        return String::new();
    };
    if history.chars().count() <= HISTORY_EXCERPT_CHARS {
        return history.to_string();
    }
    let mut excerpt: String = history.chars().take(HISTORY_EXCERPT_CHARS).collect();
    excerpt.push_str("...");
    excerpt
}

/// Rows plus per-category counts for the run summary.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub rows: Vec<ResultRow>,
    /// Subjects that produced a scored row.
    pub processed: usize,
    pub skipped_no_images: usize,
    pub skipped_encoding: usize,
    pub failed_requests: usize,
}

// =============================================================================
// RUNNER
// =============================================================================

pub struct ClassificationRunner {
    gateway: Arc<dyn ChatGateway>,
    model: ChatModel,
    extraction: ExtractionPolicy,
    run_id: Uuid,
}

impl ClassificationRunner {
    pub fn new(gateway: Arc<dyn ChatGateway>, model: ChatModel) -> Self {
        Self {
            gateway,
            model,
            extraction: ExtractionPolicy::default(),
            run_id: Uuid::new_v4(),
        }
    }

    pub fn with_extraction(mut self, extraction: ExtractionPolicy) -> Self {
        self.extraction = extraction;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Send one subject's images and history; remote failures become `Failed`.
    pub async fn classify(
        &self,
        subject_id: &str,
        images: &[ImagePayload],
        history: Option<&str>,
    ) -> RequestOutcome {
        let prompt = classification_prompt(history);
        let req = ChatRequest::new(
            self.model.clone(),
            vec![prompt.to_message(images)],
            Attribution::new(CALLER)
                .with_run(self.run_id)
                .with_subject(subject_id),
        )
        .with_provider_defaults();

        let retried = self.gateway.chat_with_retries(&req).await;
        match retried.result {
            Ok(resp) => RequestOutcome::Response(resp),
            Err(err) => {
                error!(
                    subject = subject_id,
                    attempts = retried.attempts,
                    code = err.code(),
                    error = %err,
                    "request failed"
                );
                RequestOutcome::Failed {
                    attempts: retried.attempts,
                    error: err,
                }
            }
        }
    }

    pub fn extract(&self, response: &ChatResponse) -> ScorePair {
        extract_scores(&response.content, self.extraction)
    }
}

// =============================================================================
// BATCH
// =============================================================================

/// Process subjects one after another.
pub async fn run_batch(
    runner: &ClassificationRunner,
    library: &ImageLibrary,
    subjects: &[Subject],
    no_images: NoImagesPolicy,
) -> BatchReport {
    let mut report = BatchReport::default();
    let total = subjects.len();

    for (idx, subject) in subjects.iter().enumerate() {
        info!(
            subject = %subject.id,
            index = idx + 1,
            total,
            "processing subject"
        );

        let paths = match library.find(&subject.id) {
            Ok(paths) => paths,
            Err(err) => {
                warn!(subject = %subject.id, error = %err, "image lookup failed");
                Vec::new()
            }
        };

        if paths.is_empty() {
            warn!(
                subject = %subject.id,
                dir = %library.dir().display(),
                "no images found"
            );
            report.skipped_no_images += 1;
            if no_images == NoImagesPolicy::Record {
                report.rows.push(ResultRow::no_images(subject));
            }
            continue;
        }

        let images = match library.encode_all(&paths) {
            Ok(images) => images,
            Err(err) => {
                warn!(subject = %subject.id, error = %err, "image encoding failed, skipping");
                report.skipped_encoding += 1;
                continue;
            }
        };

        let response = match runner
            .classify(&subject.id, &images, subject.history.as_deref())
            .await
        {
            RequestOutcome::Response(resp) => resp,
            RequestOutcome::Failed { .. } => {
                report.failed_requests += 1;
                continue;
            }
        };

        let scores = runner.extract(&response);
        info!(
            subject = %subject.id,
            images = images.len(),
            without_history = %scores.without_history,
            with_history = %scores.with_history,
            "subject classified"
        );

        report.rows.push(ResultRow {
            subject_id: subject.id.clone(),
            response: response.content,
            scores,
            image_count: images.len(),
            history_excerpt: history_excerpt(subject.history.as_deref()),
            error: None,
        });
        report.processed += 1;
    }

    report
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sheet(#[from] SheetError),
}

/// Validate, read subjects, run the batch, write the results once.
pub async fn run_classification(
    config: &RunConfig,
    gateway: Arc<dyn ChatGateway>,
) -> Result<BatchReport, RunError> {
    config.validate()?;

    let table = sheet::read_table(&config.input_path)?;
    let subjects = sheet::read_subjects(&table, &config.id_column, &config.history_column)?;
    info!(
        subjects = subjects.len(),
        input = %config.input_path.display(),
        provider = %config.provider.kind,
        model = config.provider.model.model_id(),
        "starting batch"
    );

    let runner = ClassificationRunner::new(gateway, config.provider.model.clone())
        .with_extraction(config.extraction);
    let library = ImageLibrary::new(&config.images_dir, &config.image_prefix);

    let report = run_batch(&runner, &library, &subjects, config.no_images).await;

    let response_column = config.provider.kind.response_column();
    let records: Vec<Record> = report
        .rows
        .iter()
        .map(|row| row.to_record(response_column))
        .collect();
    sheet::write_records(config.output_path(), &records)?;

    info!(
        run_id = %runner.run_id(),
        processed = report.processed,
        skipped_no_images = report.skipped_no_images,
        skipped_encoding = report.skipped_encoding,
        failed_requests = report.failed_requests,
        output = %config.output_path().display(),
        "batch finished"
    );

    Ok(report)
}
