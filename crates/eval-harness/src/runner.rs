//! Batch driver: pushes every example through the target with bounded concurrency.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dataset::Example;
use crate::error::Result;
use crate::evaluators::{EvaluationResult, Evaluator};
use crate::metrics;
use crate::report::ExampleResult;
use crate::target::Target;

/// Receives each example result as soon as it completes.
#[async_trait]
pub trait ResultRecorder: Send + Sync {
    async fn record(&self, result: &ExampleResult) -> Result<()>;
}

/// Recorder that keeps nothing; used when results are only reported locally.
pub struct NoopRecorder;

#[async_trait]
impl ResultRecorder for NoopRecorder {
    async fn record(&self, _result: &ExampleResult) -> Result<()> {
        Ok(())
    }
}

/// Run every example through `target`, at most `max_concurrency` at a time.
///
/// Failed invocations become failed results. A recorder error aborts the batch.
/// Results are returned in dataset order.
pub async fn run_examples(
    examples: &[Example],
    target: &dyn Target,
    evaluators: &[Arc<dyn Evaluator>],
    max_concurrency: usize,
    recorder: &dyn ResultRecorder,
) -> Result<Vec<ExampleResult>> {
    let limit = max_concurrency.max(1);
    info!(
        examples = examples.len(),
        evaluators = evaluators.len(),
        max_concurrency = limit,
        "starting batch evaluation"
    );

    let pending: Vec<_> = examples
        .iter()
        .enumerate()
        .map(|(index, example)| run_example(index, example, target, evaluators).boxed())
        .collect();
    let mut in_flight = stream::iter(pending).buffer_unordered(limit);

    let mut results = Vec::with_capacity(examples.len());
    while let Some(result) = in_flight.next().await {
        recorder.record(&result).await?;
        results.push(result);
    }

    results.sort_by_key(|result| result.index);

    let failed = results.iter().filter(|result| !result.succeeded()).count();
    info!(
        completed = results.len(),
        failed, "batch evaluation complete"
    );
    Ok(results)
}

async fn run_example(
    index: usize,
    example: &Example,
    target: &dyn Target,
    evaluators: &[Arc<dyn Evaluator>],
) -> ExampleResult {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let timer = Instant::now();

    let outcome = target.invoke(example).await;
    let latency_ms = timer.elapsed().as_millis() as u64;

    let (outputs, error, evaluations) = match outcome {
        Ok(outputs) => {
            metrics::record_example("success", latency_ms);
            let evaluations = evaluate(example, &outputs, evaluators).await;
            (Some(outputs), None, evaluations)
        }
        Err(err) => {
            metrics::record_example("error", latency_ms);
            warn!(
                example = %example.id,
                %run_id,
                error = %format!("{err:#}"),
                "target invocation failed"
            );
            (None, Some(format!("{err:#}")), Vec::new())
        }
    };

    debug!(example = %example.id, %run_id, latency_ms, "example finished");

    ExampleResult {
        index,
        example_id: example.id.clone(),
        run_id,
        inputs: example.inputs.clone(),
        outputs,
        error,
        evaluations,
        started_at,
        finished_at: Utc::now(),
        latency_ms,
    }
}

async fn evaluate(
    example: &Example,
    outputs: &serde_json::Value,
    evaluators: &[Arc<dyn Evaluator>],
) -> Vec<EvaluationResult> {
    let mut evaluations = Vec::with_capacity(evaluators.len());
    for evaluator in evaluators {
        let result = match evaluator.evaluate(example, outputs).await {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    example = %example.id,
                    evaluator = evaluator.key(),
                    error = %err,
                    "evaluator failed"
                );
                EvaluationResult::unscored(evaluator.key(), format!("evaluator error: {err:#}"))
            }
        };
        if let Some(score) = result.score {
            metrics::record_feedback(&result.key, score);
        }
        evaluations.push(result);
    }
    evaluations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use crate::evaluators::default_evaluators;
    use crate::target::from_async_fn;
    use anyhow::anyhow;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn examples(count: usize) -> Vec<Example> {
        (0..count)
            .map(|idx| {
                Example::new(
                    format!("ex-{idx}"),
                    json!({"messages": [{"role": "user", "content": format!("question {idx}")}]}),
                )
            })
            .collect()
    }

    #[derive(Default)]
    struct CollectingRecorder {
        seen: Mutex<Vec<String>>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl ResultRecorder for CollectingRecorder {
        async fn record(&self, result: &ExampleResult) -> Result<()> {
            let mut seen = self.seen.lock().unwrap();
            if self.fail_after.is_some_and(|limit| seen.len() >= limit) {
                return Err(EvalError::Other(anyhow!("backend unreachable")));
            }
            seen.push(result.example_id.clone());
            Ok(())
        }
    }

    struct FailingEvaluator;

    #[async_trait]
    impl Evaluator for FailingEvaluator {
        fn key(&self) -> &str {
            "flaky"
        }

        async fn evaluate(
            &self,
            _example: &Example,
            _outputs: &Value,
        ) -> anyhow::Result<EvaluationResult> {
            Err(anyhow!("judge offline"))
        }
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_bound() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let target = {
            let active = active.clone();
            let peak = peak.clone();
            from_async_fn(move |_example: Example| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(json!({"final_report": "# Title"}))
                }
            })
        };

        let results = run_examples(&examples(25), &target, &[], 10, &NoopRecorder)
            .await
            .unwrap();

        assert_eq!(results.len(), 25);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 10, "peak concurrency {peak}");
        assert!(peak > 1, "examples should overlap");
    }

    #[tokio::test]
    async fn failures_are_recorded_and_results_stay_ordered() {
        let target = from_async_fn(|example: Example| async move {
            let idx: u64 = example.id.trim_start_matches("ex-").parse().unwrap();
            tokio::time::sleep(Duration::from_millis(40 - idx * 10)).await;
            if idx == 1 {
                return Err(anyhow!("graph execution failure"));
            }
            Ok::<_, anyhow::Error>(json!({"final_report": format!("# Report {idx}")}))
        });
        let recorder = CollectingRecorder::default();
        let evaluators = default_evaluators();

        let results = run_examples(&examples(4), &target, &evaluators, 4, &recorder)
            .await
            .unwrap();

        let order: Vec<usize> = results.iter().map(|result| result.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_eq!(recorder.seen.lock().unwrap().len(), 4);

        let failed = &results[1];
        assert!(!failed.succeeded());
        assert!(failed.evaluations.is_empty());
        assert!(failed.error.as_deref().unwrap().contains("graph execution failure"));

        let ok = &results[0];
        assert!(ok.succeeded());
        assert_eq!(ok.evaluations.len(), evaluators.len());
    }

    #[tokio::test]
    async fn evaluator_errors_become_unscored_feedback() {
        let target = from_async_fn(|_example: Example| async move {
            Ok::<_, anyhow::Error>(json!({"final_report": "text"}))
        });
        let evaluators: Vec<Arc<dyn Evaluator>> = vec![Arc::new(FailingEvaluator)];

        let results = run_examples(&examples(1), &target, &evaluators, 1, &NoopRecorder)
            .await
            .unwrap();

        let feedback = &results[0].evaluations[0];
        assert_eq!(feedback.key, "flaky");
        assert_eq!(feedback.score, None);
        assert!(feedback.comment.as_deref().unwrap().contains("judge offline"));
    }

    #[tokio::test]
    async fn recorder_failure_aborts_the_batch() {
        let target = from_async_fn(|_example: Example| async move {
            Ok::<_, anyhow::Error>(json!({}))
        });
        let recorder = CollectingRecorder {
            fail_after: Some(1),
            ..Default::default()
        };

        let err = run_examples(&examples(3), &target, &[], 0, &recorder)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("backend unreachable"));
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batch_runs_inside_spawned_tasks() {
        let examples = examples(12);
        let target: Arc<dyn Target> = Arc::new(from_async_fn(|example: Example| async move {
            Ok::<_, anyhow::Error>(json!({"final_report": format!("# {}", example.id)}))
        }));
        let evaluators = default_evaluators();

        let handle = tokio::spawn(async move {
            run_examples(&examples, target.as_ref(), &evaluators, 3, &NoopRecorder).await
        });

        let results = handle.await.unwrap().unwrap();
        assert_eq!(results.len(), 12);
        assert!(results.iter().all(ExampleResult::succeeded));
    }
}
