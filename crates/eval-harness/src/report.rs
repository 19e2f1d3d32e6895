use std::fmt;
use std::fs::{create_dir_all, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use statrs::statistics::Statistics;
use uuid::Uuid;

use crate::error::{EvalError, Result};
use crate::evaluators::EvaluationResult;

/// Outcome of running and scoring a single dataset example.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleResult {
    pub index: usize,
    pub example_id: String,
    pub run_id: Uuid,
    pub inputs: Value,
    pub outputs: Option<Value>,
    pub error: Option<String>,
    pub evaluations: Vec<EvaluationResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: u64,
}

impl ExampleResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn score(&self, key: &str) -> Option<f64> {
        self.evaluations
            .iter()
            .find(|evaluation| evaluation.key == key)
            .and_then(|evaluation| evaluation.score)
    }
}

/// Aggregate statistics of one evaluator across the experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorSummary {
    pub key: String,
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl EvaluatorSummary {
    fn from_scores(key: &str, scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let std_dev = if scores.len() > 1 {
            Statistics::std_dev(scores)
        } else {
            0.0
        };
        Some(Self {
            key: key.to_string(),
            count: scores.len(),
            mean: Statistics::mean(scores),
            std_dev,
            min: Statistics::min(scores),
            max: Statistics::max(scores),
        })
    }
}

/// Aggregate report returned by an evaluation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub experiment_name: String,
    pub experiment_id: Option<String>,
    pub dataset: String,
    pub metadata: Map<String, Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<ExampleResult>,
    pub summaries: Vec<EvaluatorSummary>,
    pub failures: usize,
}

impl ExperimentReport {
    pub fn new(
        experiment_name: impl Into<String>,
        dataset: impl Into<String>,
        metadata: Map<String, Value>,
        started_at: DateTime<Utc>,
        results: Vec<ExampleResult>,
    ) -> Self {
        let mut keys: Vec<&str> = Vec::new();
        for evaluation in results.iter().flat_map(|result| result.evaluations.iter()) {
            if !keys.contains(&evaluation.key.as_str()) {
                keys.push(&evaluation.key);
            }
        }

        let summaries = keys
            .iter()
            .filter_map(|key| {
                let scores: Vec<f64> = results
                    .iter()
                    .filter_map(|result| result.score(key))
                    .collect();
                EvaluatorSummary::from_scores(key, &scores)
            })
            .collect();
        let failures = results.iter().filter(|result| !result.succeeded()).count();

        Self {
            experiment_name: experiment_name.into(),
            experiment_id: None,
            dataset: dataset.into(),
            metadata,
            started_at,
            finished_at: Utc::now(),
            results,
            summaries,
            failures,
        }
    }

    pub fn with_experiment_id(mut self, id: impl Into<String>) -> Self {
        self.experiment_id = Some(id.into());
        self
    }

    pub fn summary(&self, key: &str) -> Option<&EvaluatorSummary> {
        self.summaries.iter().find(|summary| summary.key == key)
    }
}

impl fmt::Display for ExperimentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let duration = (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        writeln!(f, "Experiment: {}", self.experiment_name)?;
        if let Some(id) = &self.experiment_id {
            writeln!(f, "Experiment ID: {id}")?;
        }
        writeln!(f, "Dataset: {}", self.dataset)?;
        writeln!(
            f,
            "Examples: {} ({} failed) in {:.1}s",
            self.results.len(),
            self.failures,
            duration
        )?;

        if self.summaries.is_empty() {
            return writeln!(f, "No feedback recorded.");
        }

        writeln!(f, "Feedback:")?;
        for summary in &self.summaries {
            writeln!(
                f,
                "  {:<16} mean {:.3} • std {:.3} • min {:.3} • max {:.3} • n={}",
                summary.key, summary.mean, summary.std_dev, summary.min, summary.max, summary.count
            )?;
        }

        for result in self.results.iter().filter(|result| !result.succeeded()) {
            writeln!(
                f,
                "  failed {}: {}",
                result.example_id,
                result.error.as_deref().unwrap_or_default()
            )?;
        }
        Ok(())
    }
}

/// Write the report as pretty JSON to `<dir>/<experiment>.json`.
pub fn persist_report<P: AsRef<Path>>(dir: P, report: &ExperimentReport) -> Result<PathBuf> {
    let dir = dir.as_ref();
    create_dir_all(dir).map_err(|err| EvalError::io(dir, err))?;
    let file_name: String = report
        .experiment_name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' { ch } else { '_' })
        .collect();
    let path = dir.join(format!("{file_name}.json"));
    let payload = serde_json::to_vec_pretty(report).map_err(anyhow::Error::from)?;
    let mut file = File::create(&path).map_err(|err| EvalError::io(&path, err))?;
    file.write_all(&payload)
        .map_err(|err| EvalError::io(&path, err))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(index: usize, scores: &[(&str, Option<f64>)], error: Option<&str>) -> ExampleResult {
        let now = Utc::now();
        ExampleResult {
            index,
            example_id: format!("ex-{index}"),
            run_id: Uuid::new_v4(),
            inputs: json!({}),
            outputs: error.is_none().then(|| json!({"final_report": "ok"})),
            error: error.map(str::to_string),
            evaluations: scores
                .iter()
                .map(|(key, score)| EvaluationResult {
                    key: key.to_string(),
                    score: *score,
                    comment: None,
                })
                .collect(),
            started_at: now,
            finished_at: now,
            latency_ms: 5,
        }
    }

    #[test]
    fn summaries_aggregate_scored_results_only() {
        let results = vec![
            result(0, &[("relevance", Some(1.0)), ("correctness", None)], None),
            result(1, &[("relevance", Some(0.5)), ("correctness", Some(0.25))], None),
            result(2, &[], Some("graph execution failure")),
        ];
        let report = ExperimentReport::new("exp", "bench", Map::new(), Utc::now(), results);

        assert_eq!(report.failures, 1);
        let relevance = report.summary("relevance").unwrap();
        assert_eq!(relevance.count, 2);
        assert!((relevance.mean - 0.75).abs() < 1e-9);
        assert_eq!(relevance.min, 0.5);
        assert_eq!(relevance.max, 1.0);
        assert!(relevance.std_dev > 0.0);

        let correctness = report.summary("correctness").unwrap();
        assert_eq!(correctness.count, 1);
        assert_eq!(correctness.std_dev, 0.0);

        let rendered = report.to_string();
        assert!(rendered.contains("Experiment: exp"));
        assert!(rendered.contains("relevance"));
        assert!(rendered.contains("failed ex-2: graph execution failure"));
    }

    #[test]
    fn persisted_report_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let report = ExperimentReport::new(
            "ODR Azure, Tavily #-1a2b3c4d",
            "bench",
            Map::new(),
            Utc::now(),
            vec![result(0, &[("structure", Some(1.0))], None)],
        );

        let path = persist_report(dir.path(), &report).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "ODR_Azure__Tavily__-1a2b3c4d.json"
        );
        let stored: ExperimentReport =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored.experiment_name, report.experiment_name);
        assert_eq!(stored.summaries, report.summaries);
    }
}
