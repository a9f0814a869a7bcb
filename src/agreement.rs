//! Rater agreement via Cohen's Kappa.
//!
//! Diagnoses are multi-label (`"2+4"` means categories 2 and 4), so each
//! column is expanded into one binary indicator per category and kappa is
//! computed per category. A comparison reports the mean and population
//! standard deviation of those per-category kappas.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::sheet::{Cell, Record, SheetError, Table};

/// Diagnostic categories as encoded in the spreadsheets.
pub const DEFAULT_LABELS: [u8; 5] = [1, 2, 3, 4, 5];

pub const DEFAULT_REFERENCE_COLUMN: &str = "Radiologist Prediction";

static DIAGNOSIS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^(.+?)[ _-](?:with|without)[ _-]medical[ _-]history$",
        r"|^(.+?) (?:mit|ohne) Anamnese$",
    ))
    .expect("Invalid diagnosis column regex")
});

const BAR_WIDTH: usize = 20;

#[derive(Debug, Error)]
pub enum AgreementError {
    #[error("row {row}: cannot parse label {value:?} in column {column:?}")]
    InvalidLabel {
        column: String,
        row: usize,
        value: String,
    },
    #[error(transparent)]
    Sheet(#[from] SheetError),
}

/// Disagreement weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KappaWeights {
    /// Every disagreement costs the same.
    #[default]
    None,
    /// Cost grows with the distance between label ranks.
    Linear,
    /// Cost grows with the squared distance between label ranks.
    Quadratic,
}

impl KappaWeights {
    fn weight(&self, i: usize, j: usize) -> f64 {
        let d = i.abs_diff(j) as f64;
        match self {
            KappaWeights::None => {
                if i == j {
                    0.0
                } else {
                    1.0
                }
            }
            KappaWeights::Linear => d,
            KappaWeights::Quadratic => d * d,
        }
    }
}

/// Cohen's Kappa between two label sequences.
///
/// Labels are ranked over the sorted union of both sequences; weights use
/// rank distance. `None` when the sequences differ in length, are empty, or
/// the expected disagreement is zero (for example a single shared label).
pub fn cohen_kappa<T: Ord + Copy>(a: &[T], b: &[T], weights: KappaWeights) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let labels: Vec<T> = a
        .iter()
        .chain(b.iter())
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let k = labels.len();
    let rank = |v: &T| labels.binary_search(v).ok();

    let mut observed = vec![vec![0.0_f64; k]; k];
    for (x, y) in a.iter().zip(b) {
        observed[rank(x)?][rank(y)?] += 1.0;
    }

    let total = a.len() as f64;
    let row_sums: Vec<f64> = observed.iter().map(|r| r.iter().sum()).collect();
    let col_sums: Vec<f64> = (0..k).map(|j| observed.iter().map(|r| r[j]).sum()).collect();

    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..k {
        for j in 0..k {
            let w = weights.weight(i, j);
            num += w * observed[i][j];
            den += w * row_sums[i] * col_sums[j] / total;
        }
    }

    if den == 0.0 {
        None
    } else {
        Some(1.0 - num / den)
    }
}

/// Parse a label cell. `Ok(None)` for empty cells.
pub fn parse_labels(cell: &Cell) -> Result<Option<BTreeSet<u8>>, String> {
    let parse_one = |s: &str| -> Result<u8, String> {
        let s = s.trim();
        let n: f64 = s.parse().map_err(|_| s.to_string())?;
        if n.fract() != 0.0 || !(0.0..=255.0).contains(&n) {
            return Err(s.to_string());
        }
        Ok(n as u8)
    };

    match cell {
        Cell::Empty => Ok(None),
        Cell::Number(n) => parse_one(&n.to_string()).map(|v| Some(BTreeSet::from([v]))),
        Cell::Text(t) if t.trim().is_empty() => Ok(None),
        Cell::Text(t) => t
            .split('+')
            .map(parse_one)
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Some),
    }
}

/// Indicator vector of `labels` over `label_set`.
pub fn to_binary_vector(labels: &BTreeSet<u8>, label_set: &[u8]) -> Vec<u8> {
    label_set
        .iter()
        .map(|l| u8::from(labels.contains(l)))
        .collect()
}

/// Per-category quadratic-weighted kappa summary.
#[derive(Debug, Clone, PartialEq)]
pub struct KappaStats {
    /// Mean over categories with a defined kappa; `None` if there are none.
    pub mean: Option<f64>,
    /// Population standard deviation over the same categories.
    pub std: Option<f64>,
    pub labels_used: usize,
    pub rows_used: usize,
}

/// Compare two label columns. Rows where either side is empty are skipped.
pub fn weighted_kappa_stats(
    truth: &[Option<BTreeSet<u8>>],
    pred: &[Option<BTreeSet<u8>>],
    label_set: &[u8],
) -> KappaStats {
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = truth
        .iter()
        .zip(pred)
        .filter_map(|(t, p)| match (t, p) {
            (Some(t), Some(p)) => Some((
                to_binary_vector(t, label_set),
                to_binary_vector(p, label_set),
            )),
            _ => None,
        })
        .collect();

    let kappas: Vec<f64> = (0..label_set.len())
        .filter_map(|j| {
            let t: Vec<u8> = pairs.iter().map(|(t, _)| t[j]).collect();
            let p: Vec<u8> = pairs.iter().map(|(_, p)| p[j]).collect();
            cohen_kappa(&t, &p, KappaWeights::Quadratic)
        })
        .collect();

    let (mean, std) = if kappas.is_empty() {
        (None, None)
    } else {
        let n = kappas.len() as f64;
        let mean = kappas.iter().sum::<f64>() / n;
        let var = kappas.iter().map(|k| (k - mean).powi(2)).sum::<f64>() / n;
        (Some(mean), Some(var.sqrt()))
    };

    KappaStats {
        mean,
        std,
        labels_used: kappas.len(),
        rows_used: pairs.len(),
    }
}

/// One rater column scored against the reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub rater: String,
    pub reference: String,
    pub stats: KappaStats,
}

impl Comparison {
    pub fn name(&self) -> String {
        format!("{} vs {}", self.rater, self.reference)
    }
}

/// Whether a header names a diagnosis column read with or without history:
/// `Expert-with-medical history` or `Befund ... ohne Anamnese`. Likert
/// columns carry confidence, not categories, and are excluded.
pub fn is_diagnosis_column(header: &str) -> bool {
    let header = header.trim();
    let Some(caps) = DIAGNOSIS_PATTERN.captures(header) else {
        return false;
    };
    caps.get(1)
        .or_else(|| caps.get(2))
        .is_some_and(|rater| !rater.as_str().to_ascii_lowercase().contains("likert"))
}

/// Headers other than `reference` that name a diagnosis column.
pub fn detect_rater_columns(table: &Table, reference: &str) -> Vec<String> {
    table
        .headers
        .iter()
        .filter(|h| h.trim() != reference.trim())
        .filter(|h| is_diagnosis_column(h))
        .cloned()
        .collect()
}

fn label_column(table: &Table, name: &str) -> Result<Vec<Option<BTreeSet<u8>>>, AgreementError> {
    table
        .column(name)?
        .into_iter()
        .enumerate()
        .map(|(row, cell)| {
            parse_labels(cell).map_err(|value| AgreementError::InvalidLabel {
                column: name.to_string(),
                row: row + 1,
                value,
            })
        })
        .collect()
}

/// Score every rater column against `reference`.
pub fn compare_columns(
    table: &Table,
    raters: &[String],
    reference: &str,
    label_set: &[u8],
) -> Result<Vec<Comparison>, AgreementError> {
    let truth = label_column(table, reference)?;
    raters
        .iter()
        .map(|rater| {
            let pred = label_column(table, rater)?;
            Ok(Comparison {
                rater: rater.clone(),
                reference: reference.to_string(),
                stats: weighted_kappa_stats(&truth, &pred, label_set),
            })
        })
        .collect()
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.4}")).unwrap_or_default()
}

pub fn to_records(comparisons: &[Comparison]) -> Vec<Record> {
    comparisons
        .iter()
        .map(|c| {
            vec![
                ("comparison".to_string(), c.name()),
                ("mean_kappa".to_string(), fmt_opt(c.stats.mean)),
                ("std_kappa".to_string(), fmt_opt(c.stats.std)),
                ("labels_used".to_string(), c.stats.labels_used.to_string()),
                ("rows_used".to_string(), c.stats.rows_used.to_string()),
            ]
        })
        .collect()
}

/// Bar for a kappa on a 0..1 axis; negative agreement renders empty.
pub fn text_bar(kappa: f64) -> String {
    let filled = (kappa.clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize;
    format!("{}{}", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

pub fn render_markdown(comparisons: &[Comparison], source: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Cohen's Kappa agreement\n");
    let _ = writeln!(
        out,
        "Source: `{source}`. Quadratic-weighted kappa per category, mean ± population std.\n"
    );

    if comparisons.is_empty() {
        let _ = writeln!(out, "No rater columns to compare.");
        return out;
    }

    let _ = writeln!(out, "| Comparison | Mean κ | Std | Categories | Rows | |");
    let _ = writeln!(out, "|---|---:|---:|---:|---:|---|");
    for c in comparisons {
        let bar = c.stats.mean.map(text_bar).unwrap_or_default();
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | `{}` |",
            c.name(),
            c.stats.mean.map(|v| format!("{v:.2}")).unwrap_or_else(|| "n/a".into()),
            c.stats.std.map(|v| format!("{v:.2}")).unwrap_or_else(|| "n/a".into()),
            c.stats.labels_used,
            c.stats.rows_used,
            bar
        );
    }
    out
}
