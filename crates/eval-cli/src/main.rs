use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use eval_harness::{
    EvalSettings, EvaluationBackend, LangSmithBackend, LocalBackend, ResearcherTarget, Target,
    TelemetryOptions, init_metrics_from_env, init_telemetry, load_dotenv, run_evaluation,
};
use tokio::runtime::Runtime;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "run-evaluate",
    version,
    about = "Evaluate the deep researcher against a dataset"
)]
struct Cli {
    /// Where datasets are read from and results are recorded.
    #[arg(long, value_enum, env = "EVAL_BACKEND", default_value_t = BackendKind::Langsmith)]
    backend: BackendKind,

    /// Directory holding `<dataset-slug>.jsonl` files for the local backend.
    #[arg(long, default_value = "datasets")]
    datasets_dir: PathBuf,

    /// Write the experiment report as JSON into this directory (local backend).
    #[arg(long)]
    report_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BackendKind {
    Langsmith,
    Local,
}

fn main() -> Result<()> {
    // Loaded before telemetry so a `RUST_LOG` from the file takes effect.
    let env_file = load_dotenv();
    init_telemetry(TelemetryOptions::default())?;
    init_metrics_from_env("run-evaluate");

    if let Some(path) = checked_env_file(env_file)? {
        info!(path = %path.display(), "environment file loaded");
    }
    let cli = Cli::parse();
    let settings = EvalSettings::from_env()?;

    let backend: Box<dyn EvaluationBackend> = match cli.backend {
        BackendKind::Langsmith => Box::new(LangSmithBackend::from_env()?),
        BackendKind::Local => {
            let mut local = LocalBackend::new(&cli.datasets_dir);
            if let Some(dir) = &cli.report_dir {
                local = local.with_report_dir(dir);
            }
            Box::new(local)
        }
    };
    let target: Arc<dyn Target> =
        Arc::new(ResearcherTarget::with_default_graph(settings.run.clone()));

    let rt = Runtime::new()?;
    let report = rt.block_on(async {
        info!(
            backend = ?cli.backend,
            dataset = %settings.dataset,
            "starting evaluation run"
        );
        run_evaluation(&settings, backend.as_ref(), target).await
    })?;

    println!("{report}");
    Ok(())
}

fn checked_env_file(loaded: eval_harness::Result<Option<PathBuf>>) -> Result<Option<PathBuf>> {
    loaded.map_err(|err| {
        error!(%err, "failed to load environment file");
        err.into()
    })
}
