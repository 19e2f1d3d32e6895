//! Quality evaluators applied to every researcher output.
//!
//! Each evaluator scores one dimension of the final report in `[0, 1]`. The
//! scoring is heuristic and deterministic so experiments are reproducible
//! without a judge model.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::Example;

/// Reports shorter than this many words are penalised for completeness.
const ADEQUATE_REPORT_WORDS: f64 = 300.0;

static WORD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-z0-9]+").expect("invalid word regex"));
static CITATION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\d+\]|https?://\S+").expect("invalid citation regex"));

const STOP_WORDS: &[&str] = &[
    "about", "also", "been", "being", "could", "does", "each", "from", "have", "into", "more",
    "most", "only", "other", "over", "please", "should", "some", "such", "than", "that", "their",
    "them", "then", "there", "these", "they", "this", "those", "were", "what", "when", "where",
    "which", "while", "will", "with", "would", "your",
];

/// Score produced by one evaluator for one example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub key: String,
    pub score: Option<f64>,
    pub comment: Option<String>,
}

impl EvaluationResult {
    pub fn scored(key: impl Into<String>, score: f64, comment: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            score: Some(score.clamp(0.0, 1.0)),
            comment: Some(comment.into()),
        }
    }

    pub fn unscored(key: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            score: None,
            comment: Some(comment.into()),
        }
    }
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    fn key(&self) -> &str;

    async fn evaluate(&self, example: &Example, outputs: &Value) -> Result<EvaluationResult>;
}

/// Keys of the evaluators attached to every experiment, in submission order.
pub const EVALUATOR_KEYS: [&str; 6] = [
    "overall_quality",
    "relevance",
    "structure",
    "correctness",
    "groundedness",
    "completeness",
];

/// The fixed evaluator list submitted with every batch.
pub fn default_evaluators() -> Vec<Arc<dyn Evaluator>> {
    vec![
        Arc::new(OverallQuality),
        Arc::new(Relevance),
        Arc::new(Structure),
        Arc::new(Correctness),
        Arc::new(Groundedness),
        Arc::new(Completeness),
    ]
}

/// Report text from a final state: `final_report`, else the last message.
pub fn report_text(outputs: &Value) -> &str {
    outputs
        .get("final_report")
        .and_then(Value::as_str)
        .or_else(|| {
            outputs
                .get("messages")
                .and_then(Value::as_array)
                .and_then(|messages| messages.last())
                .and_then(|message| message.get("content"))
                .and_then(Value::as_str)
        })
        .unwrap_or_default()
}

fn keywords(text: &str) -> BTreeSet<String> {
    let lowered = text.to_lowercase();
    WORD_PATTERN
        .find_iter(&lowered)
        .map(|token| token.as_str())
        .filter(|token| token.len() >= 4 && !STOP_WORDS.contains(token))
        .map(str::to_string)
        .collect()
}

/// Share of `expected` keywords that appear in `report`; `None` when nothing is expected.
fn keyword_recall(expected: &str, report: &str) -> Option<(f64, usize, usize)> {
    let wanted = keywords(expected);
    if wanted.is_empty() {
        return None;
    }
    let present = keywords(report);
    let hits = wanted.intersection(&present).count();
    Some((hits as f64 / wanted.len() as f64, hits, wanted.len()))
}

/// Markdown layout facts used by the structural evaluators.
#[derive(Debug, Clone, Default, PartialEq)]
struct ReportShape {
    has_title: bool,
    sections: usize,
    has_sources: bool,
    paragraphs: usize,
    cited_paragraphs: usize,
    words: usize,
}

impl ReportShape {
    fn analyze(report: &str) -> Self {
        let mut shape = Self {
            words: report.split_whitespace().count(),
            ..Self::default()
        };
        let mut in_sources = false;

        for block in report.split("\n\n").map(str::trim).filter(|b| !b.is_empty()) {
            if block.starts_with('#') {
                let heading = block.lines().next().unwrap_or_default();
                if heading.starts_with("# ") {
                    shape.has_title = true;
                } else if heading.starts_with("## ") {
                    shape.sections += 1;
                    let lowered = heading.to_lowercase();
                    in_sources = lowered.contains("source") || lowered.contains("reference");
                    shape.has_sources |= in_sources;
                }
                continue;
            }
            if in_sources {
                continue;
            }
            shape.paragraphs += 1;
            if CITATION_PATTERN.is_match(block) {
                shape.cited_paragraphs += 1;
            }
        }

        shape
    }

    fn structure_score(&self) -> f64 {
        let checks = [
            self.has_title,
            self.sections >= 2,
            self.has_sources,
            self.paragraphs >= 3,
        ];
        checks.iter().filter(|passed| **passed).count() as f64 / checks.len() as f64
    }

    fn groundedness_score(&self) -> f64 {
        if !self.has_sources || self.paragraphs == 0 {
            return 0.0;
        }
        self.cited_paragraphs as f64 / self.paragraphs as f64
    }

    fn length_score(&self) -> f64 {
        (self.words as f64 / ADEQUATE_REPORT_WORDS).min(1.0)
    }
}

fn relevance_score(example: &Example, report: &str) -> f64 {
    if report.trim().is_empty() {
        return 0.0;
    }
    keyword_recall(example.question().unwrap_or_default(), report)
        .map(|(score, _, _)| score)
        .unwrap_or(1.0)
}

fn completeness_score(example: &Example, shape: &ReportShape, report: &str) -> f64 {
    (relevance_score(example, report) + shape.length_score()) / 2.0
}

pub struct Relevance;

#[async_trait]
impl Evaluator for Relevance {
    fn key(&self) -> &str {
        "relevance"
    }

    async fn evaluate(&self, example: &Example, outputs: &Value) -> Result<EvaluationResult> {
        let report = report_text(outputs);
        let comment = match keyword_recall(example.question().unwrap_or_default(), report) {
            Some((_, hits, total)) => format!("{hits}/{total} question keywords covered"),
            None => "question has no scorable keywords".to_string(),
        };
        Ok(EvaluationResult::scored(
            self.key(),
            relevance_score(example, report),
            comment,
        ))
    }
}

pub struct Structure;

#[async_trait]
impl Evaluator for Structure {
    fn key(&self) -> &str {
        "structure"
    }

    async fn evaluate(&self, _example: &Example, outputs: &Value) -> Result<EvaluationResult> {
        let shape = ReportShape::analyze(report_text(outputs));
        Ok(EvaluationResult::scored(
            self.key(),
            shape.structure_score(),
            format!(
                "title: {}, sections: {}, sources: {}, paragraphs: {}",
                shape.has_title, shape.sections, shape.has_sources, shape.paragraphs
            ),
        ))
    }
}

pub struct Correctness;

#[async_trait]
impl Evaluator for Correctness {
    fn key(&self) -> &str {
        "correctness"
    }

    async fn evaluate(&self, example: &Example, outputs: &Value) -> Result<EvaluationResult> {
        let Some(reference) = example.reference_answer() else {
            return Ok(EvaluationResult::unscored(
                self.key(),
                "example has no reference answer",
            ));
        };
        let report = report_text(outputs);
        Ok(match keyword_recall(reference, report) {
            Some((score, hits, total)) => EvaluationResult::scored(
                self.key(),
                score,
                format!("{hits}/{total} reference keywords matched"),
            ),
            None => EvaluationResult::unscored(self.key(), "reference answer has no keywords"),
        })
    }
}

pub struct Groundedness;

#[async_trait]
impl Evaluator for Groundedness {
    fn key(&self) -> &str {
        "groundedness"
    }

    async fn evaluate(&self, _example: &Example, outputs: &Value) -> Result<EvaluationResult> {
        let shape = ReportShape::analyze(report_text(outputs));
        Ok(EvaluationResult::scored(
            self.key(),
            shape.groundedness_score(),
            format!(
                "{}/{} paragraphs cite a source",
                shape.cited_paragraphs, shape.paragraphs
            ),
        ))
    }
}

pub struct Completeness;

#[async_trait]
impl Evaluator for Completeness {
    fn key(&self) -> &str {
        "completeness"
    }

    async fn evaluate(&self, example: &Example, outputs: &Value) -> Result<EvaluationResult> {
        let report = report_text(outputs);
        let shape = ReportShape::analyze(report);
        Ok(EvaluationResult::scored(
            self.key(),
            completeness_score(example, &shape, report),
            format!("{} words", shape.words),
        ))
    }
}

pub struct OverallQuality;

#[async_trait]
impl Evaluator for OverallQuality {
    fn key(&self) -> &str {
        "overall_quality"
    }

    async fn evaluate(&self, example: &Example, outputs: &Value) -> Result<EvaluationResult> {
        let report = report_text(outputs);
        let shape = ReportShape::analyze(report);
        let parts = [
            relevance_score(example, report),
            shape.structure_score(),
            shape.groundedness_score(),
            completeness_score(example, &shape, report),
        ];
        let score = parts.iter().sum::<f64>() / parts.len() as f64;
        Ok(EvaluationResult::scored(
            self.key(),
            score,
            format!(
                "relevance {:.2}, structure {:.2}, groundedness {:.2}, completeness {:.2}",
                parts[0], parts[1], parts[2], parts[3]
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REPORT: &str = "# Lithium Battery Recycling\n\n## Summary\n\nLithium battery recycling policy is evolving quickly as capacity expands [1].\n\n## Findings\n\nRecycling policy in Europe mandates recovery targets [2].\n\nBattery makers invest in closed-loop supply chains [1].\n\n## Sources\n\n[1] https://example.com/a\n[2] https://example.com/b\n";

    fn example() -> Example {
        Example::new(
            "q",
            json!({"messages": [{
                "role": "user",
                "content": "How is lithium battery recycling policy evolving?"
            }]}),
        )
    }

    async fn score(evaluator: &dyn Evaluator, example: &Example, report: &str) -> Option<f64> {
        evaluator
            .evaluate(example, &json!({ "final_report": report }))
            .await
            .unwrap()
            .score
    }

    #[test]
    fn default_list_matches_keys() {
        let keys: Vec<String> = default_evaluators()
            .iter()
            .map(|evaluator| evaluator.key().to_string())
            .collect();
        assert_eq!(keys, EVALUATOR_KEYS);
    }

    #[test]
    fn shape_ignores_source_listing() {
        let shape = ReportShape::analyze(REPORT);
        assert!(shape.has_title);
        assert_eq!(shape.sections, 3);
        assert!(shape.has_sources);
        assert_eq!(shape.paragraphs, 3);
        assert_eq!(shape.cited_paragraphs, 3);
    }

    #[tokio::test]
    async fn well_formed_report_scores_high() {
        let example = example();
        assert_eq!(score(&Relevance, &example, REPORT).await, Some(1.0));
        assert_eq!(score(&Structure, &example, REPORT).await, Some(1.0));
        assert_eq!(score(&Groundedness, &example, REPORT).await, Some(1.0));
        let completeness = score(&Completeness, &example, REPORT).await.unwrap();
        assert!(completeness > 0.5 && completeness < 1.0);
    }

    #[tokio::test]
    async fn empty_report_scores_zero_everywhere() {
        let example = example().with_outputs(json!({"answer": "Recycling mandates"}));
        for evaluator in default_evaluators() {
            let result = evaluator.evaluate(&example, &json!({})).await.unwrap();
            assert_eq!(result.score, Some(0.0), "{}", evaluator.key());
        }
    }

    #[tokio::test]
    async fn correctness_needs_a_reference() {
        let example = example();
        let result = Correctness
            .evaluate(&example, &json!({ "final_report": REPORT }))
            .await
            .unwrap();
        assert_eq!(result.score, None);

        let with_reference = example.with_outputs(json!({
            "answer": "Europe mandates recovery targets for recycling"
        }));
        assert_eq!(score(&Correctness, &with_reference, REPORT).await, Some(1.0));
    }

    #[test]
    fn report_text_falls_back_to_last_message() {
        let outputs = json!({
            "messages": [
                {"role": "user", "content": "question"},
                {"role": "assistant", "content": "answer"}
            ]
        });
        assert_eq!(report_text(&outputs), "answer");
        assert_eq!(report_text(&json!({"final_report": null})), "");
    }
}
