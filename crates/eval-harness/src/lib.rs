//! Evaluation harness for the deep researcher graph.
//!
//! Resolves run settings from the environment, invokes the researcher once per
//! dataset example with a fresh session, scores the outputs with a fixed
//! evaluator set and submits everything to an evaluation backend.

pub mod backend;
mod dataset;
mod error;
mod evaluators;
mod harness;
mod metrics;
mod report;
mod runner;
mod settings;
mod target;
mod telemetry;

pub use backend::{
    dataset_slug, experiment_name, EvaluateRequest, EvaluationBackend, LangSmithBackend,
    LangSmithClient, LangSmithConfig, LocalBackend,
};
pub use dataset::{first_message_content, Dataset, Example};
pub use error::{EvalError, Result};
pub use evaluators::{
    default_evaluators, report_text, Completeness, Correctness, EvaluationResult, Evaluator,
    Groundedness, OverallQuality, Relevance, Structure, EVALUATOR_KEYS,
};
pub use harness::{evaluate_request, run_evaluation};
pub use metrics::{init_metrics_from_env, record_example, record_feedback};
pub use report::{persist_report, EvaluatorSummary, ExampleResult, ExperimentReport};
pub use runner::{run_examples, NoopRecorder, ResultRecorder};
pub use settings::{
    env_file_path, load_dotenv, load_env_file, vars, EvalSettings, RunConfiguration,
    DEFAULT_DATASET, DEFAULT_EXPERIMENT_PREFIX, DEFAULT_MODEL, DEFAULT_SEARCH_API,
    MAX_CONCURRENCY,
};
pub use target::{from_async_fn, FnTarget, InvocationContext, ResearcherTarget, Target};
pub use telemetry::{init_telemetry, TelemetryOptions};
