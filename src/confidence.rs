//! Confidence score distributions per rater, split by history condition.
//!
//! Confidence columns are picked by name: `Gemini Without` and `GPT_With`
//! name a rater and a condition. Only the capitalised English keywords count;
//! diagnosis columns (`GPT-4o-with-medical history`, `Befund ... mit Anamnese`)
//! hold category codes, not confidence, and never match. Values from every
//! matching column are pooled per (rater, condition) and summarised with the
//! five-number summary plus mean.

use std::fmt;
use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::sheet::{Record, Table};

static CONDITION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?)[ _](Without|With)\b")
        .expect("Invalid condition regex")
});

/// Whether the rater saw the clinical history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Condition {
    Without,
    With,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Condition::Without => "Without",
            Condition::With => "With",
        })
    }
}

/// Split a confidence column header into rater name and condition.
pub fn split_condition(header: &str) -> Option<(String, Condition)> {
    let caps = CONDITION_PATTERN.captures(header.trim())?;
    let rater = caps.get(1)?.as_str().trim().to_string();
    let condition = match caps.get(2)?.as_str() {
        "Without" => Condition::Without,
        _ => Condition::With,
    };
    Some((rater, condition))
}

/// Distribution of one (rater, condition) group.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub rater: String,
    pub condition: Condition,
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub mean: f64,
}

/// Quantile of sorted data with linear interpolation between closest ranks.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

fn summarize_values(rater: String, condition: Condition, mut values: Vec<f64>) -> Option<Summary> {
    values.sort_by(|a, b| a.total_cmp(b));
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count.max(1) as f64;
    Some(Summary {
        rater,
        condition,
        count,
        min: *values.first()?,
        q1: quantile(&values, 0.25)?,
        median: quantile(&values, 0.5)?,
        q3: quantile(&values, 0.75)?,
        max: *values.last()?,
        mean,
    })
}

/// Summaries in first-seen column order. Empty and non-numeric cells
/// (`N/A`) are dropped; groups left without values are omitted.
pub fn summarize(table: &Table) -> Vec<Summary> {
    let mut groups: Vec<(String, Condition, Vec<f64>)> = Vec::new();

    for (col, header) in table.headers.iter().enumerate() {
        let Some((rater, condition)) = split_condition(header) else {
            continue;
        };
        let values = (0..table.rows.len()).filter_map(|row| table.cell(row, col).as_number());

        match groups
            .iter_mut()
            .find(|(r, c, _)| *r == rater && *c == condition)
        {
            Some((_, _, existing)) => existing.extend(values),
            None => groups.push((rater, condition, values.collect())),
        }
    }

    groups
        .into_iter()
        .filter_map(|(rater, condition, values)| summarize_values(rater, condition, values))
        .collect()
}

pub fn to_records(summaries: &[Summary]) -> Vec<Record> {
    summaries
        .iter()
        .map(|s| {
            vec![
                ("rater".to_string(), s.rater.clone()),
                ("condition".to_string(), s.condition.to_string()),
                ("count".to_string(), s.count.to_string()),
                ("min".to_string(), format!("{:.2}", s.min)),
                ("q1".to_string(), format!("{:.2}", s.q1)),
                ("median".to_string(), format!("{:.2}", s.median)),
                ("q3".to_string(), format!("{:.2}", s.q3)),
                ("max".to_string(), format!("{:.2}", s.max)),
                ("mean".to_string(), format!("{:.2}", s.mean)),
            ]
        })
        .collect()
}

const PLOT_WIDTH: usize = 41;

/// One-line box plot on a fixed `lo..=hi` axis: whiskers `-`, box `=`,
/// quartiles `[` `]`, median `|`.
pub fn text_boxplot(s: &Summary, lo: f64, hi: f64) -> String {
    let span = (hi - lo).max(f64::EPSILON);
    let at = |v: f64| -> usize {
        let frac = ((v - lo) / span).clamp(0.0, 1.0);
        (frac * (PLOT_WIDTH - 1) as f64).round() as usize
    };

    let mut line = vec![' '; PLOT_WIDTH];
    for c in &mut line[at(s.min)..=at(s.max)] {
        *c = '-';
    }
    for c in &mut line[at(s.q1)..=at(s.q3)] {
        *c = '=';
    }
    line[at(s.q1)] = '[';
    line[at(s.q3)] = ']';
    line[at(s.median)] = '|';
    line.into_iter().collect()
}

/// Markdown report with a table and a text box plot per group.
pub fn render_markdown(summaries: &[Summary], source: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Confidence ratings by rater\n");
    let _ = writeln!(out, "Source: `{source}`\n");

    if summaries.is_empty() {
        let _ = writeln!(out, "No with/without columns with numeric values found.");
        return out;
    }

    let _ = writeln!(
        out,
        "| Rater | Condition | n | Min | Q1 | Median | Q3 | Max | Mean |"
    );
    let _ = writeln!(out, "|---|---|---:|---:|---:|---:|---:|---:|---:|");
    for s in summaries {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} |",
            s.rater, s.condition, s.count, s.min, s.q1, s.median, s.q3, s.max, s.mean
        );
    }

    let lo = summaries.iter().map(|s| s.min).fold(1.0, f64::min);
    let hi = summaries.iter().map(|s| s.max).fold(5.0, f64::max);
    let label_width = summaries
        .iter()
        .map(|s| s.rater.chars().count() + s.condition.to_string().len() + 1)
        .max()
        .unwrap_or(0);

    let _ = writeln!(out, "\n```text");
    for s in summaries {
        let label = format!("{} {}", s.rater, s.condition);
        let _ = writeln!(
            out,
            "{label:<label_width$}  {lo:>4.1} {} {hi:.1}",
            text_boxplot(s, lo, hi)
        );
    }
    let _ = writeln!(out, "```");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::parse_csv;

    #[test]
    fn headers_split_into_rater_and_condition() {
        assert_eq!(
            split_condition("Gemini_Without"),
            Some(("Gemini".to_string(), Condition::Without))
        );
        assert_eq!(
            split_condition("Expert With"),
            Some(("Expert".to_string(), Condition::With))
        );
        assert_eq!(split_condition("Radiologist Prediction"), None);
        assert_eq!(split_condition("Without"), None);
        assert_eq!(split_condition("Rater Withheld"), None);
    }

    #[test]
    fn diagnosis_columns_are_not_confidence_columns() {
        assert_eq!(split_condition("GPT-4o-with-medical history"), None);
        assert_eq!(split_condition("Likert-Skala ohne Anamnese"), None);
        assert_eq!(
            split_condition("Befund der erfahr. Radiologen/Neuroradiologe mit Anamnese"),
            None
        );
    }

    #[test]
    fn mixed_sheet_summarises_only_confidence_columns() {
        let table = parse_csv(
            "Radiologist Prediction,\
             Befund der erfahr. Radiologen/Neuroradiologe ohne Anamnese,\
             Befund der erfahr. Radiologen/Neuroradiologe mit Anamnese,\
             GPT-4o-without-medical history,GPT_Without,GPT_With\n\
             1,1,1,2,3,4\n\
             2+4,2,2+4,2,4,5\n\
             3,3,,3,5,5\n"
                .as_bytes(),
        )
        .unwrap();

        let groups: Vec<_> = summarize(&table)
            .into_iter()
            .map(|s| (s.rater, s.condition, s.count))
            .collect();
        assert_eq!(
            groups,
            vec![
                ("GPT".to_string(), Condition::Without, 3),
                ("GPT".to_string(), Condition::With, 3),
            ]
        );
    }

    #[test]
    fn quantiles_interpolate_linearly() {
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&data, 0.0), Some(1.0));
        assert_eq!(quantile(&data, 0.25), Some(1.75));
        assert_eq!(quantile(&data, 0.5), Some(2.5));
        assert_eq!(quantile(&data, 0.75), Some(3.25));
        assert_eq!(quantile(&data, 1.0), Some(4.0));
        assert_eq!(quantile(&[3.0], 0.25), Some(3.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn summaries_pool_columns_and_drop_missing_values() {
        let table = parse_csv(
            "Patient ID,GPT_Without,GPT_With,Grok Without,Radiologist Prediction\n\
             1,3,4,N/A,2\n\
             2,5,,2,1\n\
             3,4,5,4,3\n"
                .as_bytes(),
        )
        .unwrap();

        let summaries = summarize(&table);
        assert_eq!(summaries.len(), 3);

        let gpt_without = &summaries[0];
        assert_eq!((gpt_without.rater.as_str(), gpt_without.condition), ("GPT", Condition::Without));
        assert_eq!(gpt_without.count, 3);
        assert_eq!(gpt_without.median, 4.0);
        assert_eq!(gpt_without.mean, 4.0);

        let gpt_with = &summaries[1];
        assert_eq!(gpt_with.count, 2);
        assert_eq!((gpt_with.min, gpt_with.max), (4.0, 5.0));

        let grok = &summaries[2];
        assert_eq!(grok.rater, "Grok");
        assert_eq!(grok.count, 2, "N/A is dropped");
        assert_eq!(grok.q1, 2.5);
    }

    #[test]
    fn boxplot_marks_quartiles_and_median() {
        let s = Summary {
            rater: "r".into(),
            condition: Condition::With,
            count: 5,
            min: 1.0,
            q1: 2.0,
            median: 3.0,
            q3: 4.0,
            max: 5.0,
            mean: 3.0,
        };
        let line = text_boxplot(&s, 1.0, 5.0);
        assert_eq!(line.chars().count(), PLOT_WIDTH);
        assert_eq!(line.chars().nth(10), Some('['));
        assert_eq!(line.chars().nth(20), Some('|'));
        assert_eq!(line.chars().nth(30), Some(']'));
        assert!(line.starts_with('-') && line.ends_with('-'));
    }

    #[test]
    fn report_mentions_every_group() {
        let table = parse_csv("A With,A Without\n1,2\n".as_bytes()).unwrap();
        let md = render_markdown(&summarize(&table), "in.csv");
        assert!(md.contains("| A | With | 1 |"));
        assert!(md.contains("| A | Without | 1 |"));
        assert!(md.contains("```text"));
    }
}
