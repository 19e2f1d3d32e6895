//! Evaluation backends: where datasets come from and where results go.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::evaluators::Evaluator;
use crate::report::ExperimentReport;
use crate::target::Target;

pub mod langsmith;
pub mod local;

pub use langsmith::{LangSmithBackend, LangSmithClient, LangSmithConfig};
pub use local::{dataset_slug, LocalBackend};

/// One batch-evaluation submission.
#[derive(Clone)]
pub struct EvaluateRequest {
    pub dataset: String,
    pub evaluators: Vec<Arc<dyn Evaluator>>,
    pub max_concurrency: usize,
    pub experiment_prefix: String,
    pub metadata: Map<String, Value>,
}

impl EvaluateRequest {
    pub fn evaluator_keys(&self) -> Vec<String> {
        self.evaluators
            .iter()
            .map(|evaluator| evaluator.key().to_string())
            .collect()
    }
}

#[async_trait]
pub trait EvaluationBackend: Send + Sync {
    /// Run `target` over the requested dataset and return the aggregated report.
    async fn evaluate(
        &self,
        target: Arc<dyn Target>,
        request: EvaluateRequest,
    ) -> Result<ExperimentReport>;
}

/// `<prefix>-<8 hex chars>`.
pub fn experiment_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &suffix[..8])
}
