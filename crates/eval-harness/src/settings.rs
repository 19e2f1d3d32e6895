//! Evaluation settings resolved once at start-up.
//!
//! Every option is read from the environment (or any key lookup) and falls
//! back to a literal default. Nothing downstream touches the environment again.

use std::env;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{EvalError, Result};

pub const DEFAULT_DATASET: &str = "Deep Research Bench";
pub const DEFAULT_EXPERIMENT_PREFIX: &str = "ODR Azure, Tavily #";
pub const DEFAULT_SEARCH_API: &str = "tavily";
pub const DEFAULT_MODEL: &str = "azure_openai:gpt-4.1";
/// Upper bound on examples evaluated concurrently.
pub const MAX_CONCURRENCY: usize = 10;

/// Environment variable names recognised by [`EvalSettings::from_lookup`].
pub mod vars {
    pub const EVAL_DATASET: &str = "EVAL_DATASET";
    pub const EVAL_EXPERIMENT_PREFIX: &str = "EVAL_EXPERIMENT_PREFIX";
    pub const SEARCH_API: &str = "SEARCH_API";
    pub const SUMMARIZATION_MODEL: &str = "SUMMARIZATION_MODEL";
    pub const SUMMARIZATION_MODEL_MAX_TOKENS: &str = "SUMMARIZATION_MODEL_MAX_TOKENS";
    pub const RESEARCH_MODEL: &str = "RESEARCH_MODEL";
    pub const RESEARCH_MODEL_MAX_TOKENS: &str = "RESEARCH_MODEL_MAX_TOKENS";
    pub const COMPRESSION_MODEL: &str = "COMPRESSION_MODEL";
    pub const COMPRESSION_MODEL_MAX_TOKENS: &str = "COMPRESSION_MODEL_MAX_TOKENS";
    pub const FINAL_REPORT_MODEL: &str = "FINAL_REPORT_MODEL";
    pub const FINAL_REPORT_MODEL_MAX_TOKENS: &str = "FINAL_REPORT_MODEL_MAX_TOKENS";
    pub const MAX_STRUCTURED_OUTPUT_RETRIES: &str = "MAX_STRUCTURED_OUTPUT_RETRIES";
    pub const ALLOW_CLARIFICATION: &str = "ALLOW_CLARIFICATION";
    pub const MAX_CONCURRENT_RESEARCH_UNITS: &str = "MAX_CONCURRENT_RESEARCH_UNITS";
    pub const MAX_RESEARCHER_ITERATIONS: &str = "MAX_RESEARCHER_ITERATIONS";
    pub const MAX_REACT_TOOL_CALLS: &str = "MAX_REACT_TOOL_CALLS";
    pub const ENV_FILE: &str = "DEEPRESEARCH_ENV_FILE";
}

/// Agent options passed to every invocation and logged as experiment metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfiguration {
    pub max_structured_output_retries: u32,
    pub allow_clarification: bool,
    pub max_concurrent_research_units: u32,
    pub search_api: String,
    pub max_researcher_iterations: u32,
    pub max_react_tool_calls: u32,
    pub summarization_model: String,
    pub summarization_model_max_tokens: u32,
    pub research_model: String,
    pub research_model_max_tokens: u32,
    pub compression_model: String,
    pub compression_model_max_tokens: u32,
    pub final_report_model: String,
    pub final_report_model_max_tokens: u32,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            max_structured_output_retries: 3,
            allow_clarification: false,
            max_concurrent_research_units: 10,
            search_api: DEFAULT_SEARCH_API.to_string(),
            max_researcher_iterations: 5,
            max_react_tool_calls: 10,
            summarization_model: DEFAULT_MODEL.to_string(),
            summarization_model_max_tokens: 8192,
            research_model: DEFAULT_MODEL.to_string(),
            research_model_max_tokens: 10_000,
            compression_model: DEFAULT_MODEL.to_string(),
            compression_model_max_tokens: 10_000,
            final_report_model: DEFAULT_MODEL.to_string(),
            final_report_model_max_tokens: 10_000,
        }
    }
}

impl RunConfiguration {
    /// Names of the options, in the order they are attached to invocations.
    pub const OPTION_NAMES: [&'static str; 14] = [
        "max_structured_output_retries",
        "allow_clarification",
        "max_concurrent_research_units",
        "search_api",
        "max_researcher_iterations",
        "max_react_tool_calls",
        "summarization_model",
        "summarization_model_max_tokens",
        "research_model",
        "research_model_max_tokens",
        "compression_model",
        "compression_model_max_tokens",
        "final_report_model",
        "final_report_model_max_tokens",
    ];

    /// Flatten the options into the `configurable` / metadata mapping.
    pub fn to_configurable(&self) -> Map<String, Value> {
        let values: [Value; 14] = [
            self.max_structured_output_retries.into(),
            self.allow_clarification.into(),
            self.max_concurrent_research_units.into(),
            self.search_api.clone().into(),
            self.max_researcher_iterations.into(),
            self.max_react_tool_calls.into(),
            self.summarization_model.clone().into(),
            self.summarization_model_max_tokens.into(),
            self.research_model.clone().into(),
            self.research_model_max_tokens.into(),
            self.compression_model.clone().into(),
            self.compression_model_max_tokens.into(),
            self.final_report_model.clone().into(),
            self.final_report_model_max_tokens.into(),
        ];

        Self::OPTION_NAMES
            .iter()
            .map(|name| name.to_string())
            .zip(values)
            .collect()
    }
}

/// Everything the evaluation run needs, resolved once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalSettings {
    pub dataset: String,
    pub experiment_prefix: String,
    pub max_concurrency: usize,
    pub run: RunConfiguration,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            experiment_prefix: DEFAULT_EXPERIMENT_PREFIX.to_string(),
            max_concurrency: MAX_CONCURRENCY,
            run: RunConfiguration::default(),
        }
    }
}

impl EvalSettings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve settings from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let resolver = Resolver { lookup };
        let defaults = RunConfiguration::default();

        let run = RunConfiguration {
            max_structured_output_retries: resolver.number(
                vars::MAX_STRUCTURED_OUTPUT_RETRIES,
                defaults.max_structured_output_retries,
            )?,
            allow_clarification: resolver
                .flag(vars::ALLOW_CLARIFICATION, defaults.allow_clarification)?,
            max_concurrent_research_units: resolver.number(
                vars::MAX_CONCURRENT_RESEARCH_UNITS,
                defaults.max_concurrent_research_units,
            )?,
            search_api: resolver.string(vars::SEARCH_API, &defaults.search_api),
            max_researcher_iterations: resolver.number(
                vars::MAX_RESEARCHER_ITERATIONS,
                defaults.max_researcher_iterations,
            )?,
            max_react_tool_calls: resolver
                .number(vars::MAX_REACT_TOOL_CALLS, defaults.max_react_tool_calls)?,
            summarization_model: resolver
                .string(vars::SUMMARIZATION_MODEL, &defaults.summarization_model),
            summarization_model_max_tokens: resolver.number(
                vars::SUMMARIZATION_MODEL_MAX_TOKENS,
                defaults.summarization_model_max_tokens,
            )?,
            research_model: resolver.string(vars::RESEARCH_MODEL, &defaults.research_model),
            research_model_max_tokens: resolver.number(
                vars::RESEARCH_MODEL_MAX_TOKENS,
                defaults.research_model_max_tokens,
            )?,
            compression_model: resolver
                .string(vars::COMPRESSION_MODEL, &defaults.compression_model),
            compression_model_max_tokens: resolver.number(
                vars::COMPRESSION_MODEL_MAX_TOKENS,
                defaults.compression_model_max_tokens,
            )?,
            final_report_model: resolver
                .string(vars::FINAL_REPORT_MODEL, &defaults.final_report_model),
            final_report_model_max_tokens: resolver.number(
                vars::FINAL_REPORT_MODEL_MAX_TOKENS,
                defaults.final_report_model_max_tokens,
            )?,
        };

        Ok(Self {
            dataset: resolver.string(vars::EVAL_DATASET, DEFAULT_DATASET),
            experiment_prefix: resolver
                .string(vars::EVAL_EXPERIMENT_PREFIX, DEFAULT_EXPERIMENT_PREFIX),
            max_concurrency: MAX_CONCURRENCY,
            run,
        })
    }
}

struct Resolver<F> {
    lookup: F,
}

impl<F> Resolver<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    fn number(&self, key: &str, default: u32) -> Result<u32> {
        match self.raw(key) {
            Some(value) => value.parse::<u32>().map_err(|err| {
                EvalError::invalid_setting(key, value.clone(), err.to_string())
            }),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.raw(key) {
            Some(value) => parse_bool(&value).ok_or_else(|| {
                EvalError::invalid_setting(key, value.clone(), "expected true or false")
            }),
            None => Ok(default),
        }
    }
}

fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn default_env_file() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join(".env")
}

/// Environment file named by `DEEPRESEARCH_ENV_FILE`, else the workspace `.env`.
pub fn env_file_path<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    lookup(vars::ENV_FILE)
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default_env_file)
}

/// Load `path` into the process environment.
///
/// Variables already present in the environment are left untouched. A missing
/// file is not an error; an unreadable or malformed one is.
pub fn load_env_file(path: &Path) -> Result<Option<PathBuf>> {
    match dotenvy::from_path(path) {
        Ok(()) => {
            debug!(path = %path.display(), "loaded environment file");
            Ok(Some(path.to_path_buf()))
        }
        Err(dotenvy::Error::Io(err)) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(EvalError::invalid_setting(
            vars::ENV_FILE,
            path.display().to_string(),
            err.to_string(),
        )),
    }
}

/// Load the workspace `.env` (or `DEEPRESEARCH_ENV_FILE`) into the process environment.
pub fn load_dotenv() -> Result<Option<PathBuf>> {
    load_env_file(&env_file_path(|key| env::var(key).ok()))
}
