use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use tracing::info;

struct EvaluationMetrics {
    examples: Counter<u64>,
    latency_ms: Histogram<f64>,
    feedback: Histogram<f64>,
}

static METRICS: OnceCell<EvaluationMetrics> = OnceCell::new();

fn handles() -> &'static EvaluationMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("deepresearch.eval");
        EvaluationMetrics {
            examples: meter
                .u64_counter("eval_examples_total")
                .with_description("Examples evaluated, by invocation status")
                .init(),
            latency_ms: meter
                .f64_histogram("eval_example_latency_ms")
                .with_description("Target invocation latency in milliseconds")
                .init(),
            feedback: meter
                .f64_histogram("eval_feedback_score")
                .with_description("Evaluator scores, by evaluator key")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("DEEPRESEARCH_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "DEEPRESEARCH_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export evaluation metrics."
        );
    }
}

/// Record one example invocation (no-op if no provider installed).
pub fn record_example(status: &str, latency_ms: u64) {
    let metrics = handles();
    let attrs = [KeyValue::new("status", status.to_string())];
    metrics.examples.add(1, &attrs);
    metrics.latency_ms.record(latency_ms as f64, &attrs);
}

pub fn record_feedback(key: &str, score: f64) {
    handles()
        .feedback
        .record(score, &[KeyValue::new("key", key.to_string())]);
}
