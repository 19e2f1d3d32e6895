use std::sync::OnceLock;

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::EvalError;

const LOG_FILTER_VAR: &str = "RUST_LOG";
const DEFAULT_FILTER: &str = "info,eval_harness=info,deepresearch_graph=warn";

static TELEMETRY_GUARD: OnceLock<()> = OnceLock::new();

/// Configuration options when initialising telemetry.
#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    pub env_filter: Option<String>,
    pub with_ansi: bool,
    pub with_target: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            env_filter: None,
            with_ansi: true,
            with_target: false,
        }
    }
}

/// Install the global tracing subscriber for an evaluation run.
///
/// The filter comes from the options, then `RUST_LOG`, then a default that keeps
/// graph internals at `warn`. Later calls are no-ops.
pub fn init_telemetry(options: TelemetryOptions) -> Result<(), EvalError> {
    if TELEMETRY_GUARD.get().is_some() {
        return Ok(());
    }

    let directives = options
        .env_filter
        .or_else(|| std::env::var(LOG_FILTER_VAR).ok())
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());
    let filter = EnvFilter::try_new(&directives).map_err(|err| {
        EvalError::invalid_setting(LOG_FILTER_VAR, directives.clone(), err.to_string())
    })?;

    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_ansi(options.with_ansi)
        .with_target(options.with_target)
        .try_init()
        .map_err(|err| {
            EvalError::invalid_setting(
                LOG_FILTER_VAR,
                directives,
                format!("tracing subscriber already installed: {err}"),
            )
        })?;

    TELEMETRY_GUARD.get_or_init(|| ());
    Ok(())
}
