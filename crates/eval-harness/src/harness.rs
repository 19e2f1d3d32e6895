use std::sync::Arc;

use tracing::info;

use crate::backend::{EvaluateRequest, EvaluationBackend};
use crate::error::Result;
use crate::evaluators::default_evaluators;
use crate::report::ExperimentReport;
use crate::settings::EvalSettings;
use crate::target::Target;

/// Build the batch submission: fixed evaluators, the concurrency bound and
/// the run configuration attached as metadata.
pub fn evaluate_request(settings: &EvalSettings) -> EvaluateRequest {
    EvaluateRequest {
        dataset: settings.dataset.clone(),
        evaluators: default_evaluators(),
        max_concurrency: settings.max_concurrency,
        experiment_prefix: settings.experiment_prefix.clone(),
        metadata: settings.run.to_configurable(),
    }
}

/// Submit one batch evaluation of `target` and return the backend's report.
pub async fn run_evaluation(
    settings: &EvalSettings,
    backend: &dyn EvaluationBackend,
    target: Arc<dyn Target>,
) -> Result<ExperimentReport> {
    let request = evaluate_request(settings);
    info!(
        dataset = %request.dataset,
        prefix = %request.experiment_prefix,
        evaluators = ?request.evaluator_keys(),
        max_concurrency = request.max_concurrency,
        "submitting evaluation"
    );
    backend.evaluate(target, request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluators::EVALUATOR_KEYS;
    use crate::settings::{RunConfiguration, MAX_CONCURRENCY};
    use crate::target::from_async_fn;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingBackend {
        requests: Mutex<Vec<(String, Vec<String>, usize, String, usize)>>,
    }

    #[async_trait]
    impl EvaluationBackend for CapturingBackend {
        async fn evaluate(
            &self,
            _target: Arc<dyn Target>,
            request: EvaluateRequest,
        ) -> Result<ExperimentReport> {
            self.requests.lock().unwrap().push((
                request.dataset.clone(),
                request.evaluator_keys(),
                request.max_concurrency,
                request.experiment_prefix.clone(),
                request.metadata.len(),
            ));
            Ok(ExperimentReport::new(
                "captured",
                request.dataset,
                request.metadata,
                Utc::now(),
                Vec::new(),
            ))
        }
    }

    #[tokio::test]
    async fn submission_uses_fixed_evaluators_and_bound() {
        let backend = CapturingBackend::default();
        let target: Arc<dyn Target> = Arc::new(from_async_fn(|_example| async move {
            Ok::<_, anyhow::Error>(json!({}))
        }));

        for dataset in ["tiny", "Deep Research Bench"] {
            let settings = EvalSettings {
                dataset: dataset.to_string(),
                ..EvalSettings::default()
            };
            let report = run_evaluation(&settings, &backend, target.clone())
                .await
                .unwrap();
            assert_eq!(report.metadata["search_api"], "tavily");
        }

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        for (_, keys, concurrency, prefix, metadata_len) in requests.iter() {
            assert_eq!(keys, &EVALUATOR_KEYS.map(str::to_string).to_vec());
            assert_eq!(*concurrency, MAX_CONCURRENCY);
            assert_eq!(*concurrency, 10);
            assert_eq!(prefix, "ODR Azure, Tavily #");
            assert_eq!(*metadata_len, RunConfiguration::OPTION_NAMES.len());
        }
        assert_eq!(requests[1].0, "Deep Research Bench");
    }
}
