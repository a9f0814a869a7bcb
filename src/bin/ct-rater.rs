#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ct_rater_harness::agreement::{self, DEFAULT_LABELS, DEFAULT_REFERENCE_COLUMN};
use ct_rater_harness::config::{
    ProviderSettings, RunConfig, DEFAULT_HISTORY_COLUMN, DEFAULT_ID_COLUMN, DEFAULT_IMAGES_DIR,
    DEFAULT_IMAGE_PREFIX, DEFAULT_INPUT_PATH,
};
use ct_rater_harness::confidence;
use ct_rater_harness::gateway::{
    build_provider, GatewayConfig, ProviderGateway, ProviderKind, TracingUsageSink,
};
use ct_rater_harness::likert::ExtractionPolicy;
use ct_rater_harness::retry::RetryPolicy;
use ct_rater_harness::runner::{run_classification, NoImagesPolicy};
use ct_rater_harness::sheet;

#[derive(Parser)]
#[command(name = "ct-rater", version, about = "CT classification harness for multimodal LLMs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify every subject in a spreadsheet with one provider
    Classify {
        #[arg(long, value_enum)]
        provider: CliProvider,
        /// Subject spreadsheet (.xlsx, .xls, .ods or .csv)
        #[arg(long, env = "EXCEL_PATH", default_value = DEFAULT_INPUT_PATH)]
        input: PathBuf,
        /// Directory holding `{prefix}{id}_*.jpg|jpeg|png`
        #[arg(long, env = "IMAGES_FOLDER", default_value = DEFAULT_IMAGES_DIR)]
        images: PathBuf,
        /// Result CSV (default depends on provider)
        #[arg(long, env = "OUTPUT_FILE")]
        output: Option<PathBuf>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,
        /// Pause before each retry
        #[arg(long, default_value_t = 10)]
        backoff_secs: u64,
        #[arg(long, default_value = DEFAULT_ID_COLUMN)]
        id_column: String,
        #[arg(long, default_value = DEFAULT_HISTORY_COLUMN)]
        history_column: String,
        #[arg(long, default_value = DEFAULT_IMAGE_PREFIX)]
        image_prefix: String,
        #[arg(long, value_enum, default_value_t = CliNoImages::Skip)]
        on_missing_images: CliNoImages,
        #[arg(long, value_enum, default_value_t = CliExtraction::Tolerant)]
        extraction: CliExtraction,
    },
    /// Per-category Cohen's Kappa of rater columns against a reference
    Kappa {
        #[arg(long, env = "EXCEL_PATH", default_value = DEFAULT_INPUT_PATH)]
        input: PathBuf,
        #[arg(long, default_value = DEFAULT_REFERENCE_COLUMN)]
        reference: String,
        /// Rater columns (comma separated); default: every diagnosis column read with or without history
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        #[arg(long)]
        out: PathBuf,
        /// Markdown report
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Confidence distributions per rater and history condition
    Confidence {
        #[arg(long, env = "EXCEL_PATH", default_value = DEFAULT_INPUT_PATH)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Markdown report
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

/// CLI-facing provider enum (clap::ValueEnum).
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliProvider {
    Gpt4o,
    Gemini,
    Grok,
}

impl From<CliProvider> for ProviderKind {
    fn from(p: CliProvider) -> Self {
        match p {
            CliProvider::Gpt4o => ProviderKind::OpenAi,
            CliProvider::Gemini => ProviderKind::Gemini,
            CliProvider::Grok => ProviderKind::Grok,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliNoImages {
    Skip,
    Record,
}

impl From<CliNoImages> for NoImagesPolicy {
    fn from(p: CliNoImages) -> Self {
        match p {
            CliNoImages::Skip => NoImagesPolicy::Skip,
            CliNoImages::Record => NoImagesPolicy::Record,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliExtraction {
    Tolerant,
    LikertOnly,
}

impl From<CliExtraction> for ExtractionPolicy {
    fn from(p: CliExtraction) -> Self {
        match p {
            CliExtraction::Tolerant => ExtractionPolicy::Tolerant,
            CliExtraction::LikertOnly => ExtractionPolicy::LikertOnly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Classify {
            provider,
            input,
            images,
            output,
            model,
            base_url,
            timeout_secs,
            max_attempts,
            backoff_secs,
            id_column,
            history_column,
            image_prefix,
            on_missing_images,
            extraction,
        } => {
            if max_attempts == 0 {
                return Err("--max-attempts must be >= 1".into());
            }
            let kind = ProviderKind::from(provider);

            let mut settings =
                ProviderSettings::from_env(kind)?.with_timeout(Duration::from_secs(timeout_secs));
            if let Some(model) = model {
                settings = settings.with_model(model);
            }
            if let Some(base_url) = base_url {
                settings = settings.with_base_url(base_url);
            }

            let mut config = RunConfig::new(settings)
                .with_input(input)
                .with_images_dir(images)
                .with_retry(RetryPolicy::new(
                    max_attempts,
                    Duration::from_secs(backoff_secs),
                ));
            if let Some(output) = output {
                config = config.with_output(output);
            }
            config.id_column = id_column;
            config.history_column = history_column;
            config.image_prefix = image_prefix;
            config.no_images = on_missing_images.into();
            config.extraction = extraction.into();
            config.validate()?;

            let provider = build_provider(
                kind,
                &config.provider.api_key,
                config.provider.base_url.as_deref(),
                config.provider.timeout,
            )?;
            let gateway = Arc::new(ProviderGateway::with_config(
                provider,
                Arc::new(TracingUsageSink),
                GatewayConfig {
                    retry: config.retry.clone(),
                },
            ));

            let report = run_classification(&config, gateway).await?;
            println!(
                "classified {} subjects ({} without images, {} unreadable images, {} failed requests); wrote {}",
                report.processed,
                report.skipped_no_images,
                report.skipped_encoding,
                report.failed_requests,
                config.output_path().display()
            );
        }
        Commands::Kappa {
            input,
            reference,
            columns,
            out,
            report,
        } => {
            let table = sheet::read_table(&input)?;
            let raters = if columns.is_empty() {
                agreement::detect_rater_columns(&table, &reference)
            } else {
                columns
            };
            if raters.is_empty() {
                return Err("no diagnosis columns found; pass --columns".into());
            }

            let comparisons =
                agreement::compare_columns(&table, &raters, &reference, &DEFAULT_LABELS)?;
            sheet::write_records(&out, &agreement::to_records(&comparisons))?;
            if let Some(report) = report {
                let source = input.display().to_string();
                write_report(&report, &agreement::render_markdown(&comparisons, &source))?;
            }

            for c in &comparisons {
                match (c.stats.mean, c.stats.std) {
                    (Some(mean), Some(std)) => println!("{}: {mean:.3} ± {std:.3}", c.name()),
                    _ => println!("{}: undefined", c.name()),
                }
            }
        }
        Commands::Confidence { input, out, report } => {
            let table = sheet::read_table(&input)?;
            let summaries = confidence::summarize(&table);
            if summaries.is_empty() {
                return Err("no with/without columns with numeric values found".into());
            }

            sheet::write_records(&out, &confidence::to_records(&summaries))?;
            if let Some(report) = report {
                let source = input.display().to_string();
                write_report(&report, &confidence::render_markdown(&summaries, &source))?;
            }
            println!("summarised {} rater/condition groups", summaries.len());
        }
    }

    Ok(())
}

fn write_report(path: &Path, contents: &str) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}
