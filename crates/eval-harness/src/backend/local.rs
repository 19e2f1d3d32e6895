use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use super::{experiment_name, EvaluateRequest, EvaluationBackend};
use crate::dataset::Dataset;
use crate::error::{EvalError, Result};
use crate::report::{persist_report, ExperimentReport};
use crate::runner::{run_examples, NoopRecorder};
use crate::target::Target;

/// Lower-case the name and collapse runs of non-alphanumerics into `-`.
pub fn dataset_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Reads datasets from JSONL files and keeps results on disk.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    datasets_dir: PathBuf,
    report_dir: Option<PathBuf>,
}

impl LocalBackend {
    pub fn new(datasets_dir: impl Into<PathBuf>) -> Self {
        Self {
            datasets_dir: datasets_dir.into(),
            report_dir: None,
        }
    }

    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    /// Path of the JSONL file backing `dataset`.
    pub fn dataset_path(&self, dataset: &str) -> PathBuf {
        let direct = Path::new(dataset);
        if direct.is_file() {
            return direct.to_path_buf();
        }
        self.datasets_dir
            .join(format!("{}.jsonl", dataset_slug(dataset)))
    }

    pub fn load_dataset(&self, dataset: &str) -> Result<Dataset> {
        let path = self.dataset_path(dataset);
        if !path.is_file() {
            return Err(EvalError::DatasetNotFound(format!(
                "{dataset} (looked for {})",
                path.display()
            )));
        }
        Dataset::from_jsonl(dataset, &path)
    }
}

#[async_trait]
impl EvaluationBackend for LocalBackend {
    async fn evaluate(
        &self,
        target: Arc<dyn Target>,
        request: EvaluateRequest,
    ) -> Result<ExperimentReport> {
        let dataset = self.load_dataset(&request.dataset)?;
        let name = experiment_name(&request.experiment_prefix);
        let started_at = Utc::now();
        info!(
            experiment = %name,
            dataset = %dataset.name,
            examples = dataset.len(),
            "starting local experiment"
        );

        let results = run_examples(
            &dataset.examples,
            target.as_ref(),
            &request.evaluators,
            request.max_concurrency,
            &NoopRecorder,
        )
        .await?;

        let report = ExperimentReport::new(
            name,
            dataset.name,
            request.metadata,
            started_at,
            results,
        );

        if let Some(dir) = &self.report_dir {
            let path = persist_report(dir, &report)?;
            info!(path = %path.display(), "experiment report written");
        }
        Ok(report)
    }
}
