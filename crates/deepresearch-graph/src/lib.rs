//! Deep researcher agent graph built directly on top of `graph_flow`.
//!
//! The graph runs clarify, brief, supervise, compress and report stages and
//! exposes a `compile(checkpointer)` / `invoke(input, config)` contract so
//! evaluation drivers can run it once per example.

mod config;
mod runnable;
mod tasks;
mod workflow;

pub use config::ResearcherConfig;
pub use runnable::{ChatMessage, GraphInput, RunnableConfig, THREAD_ID_KEY};
pub use tasks::{
    ClarifyTask, CompressTask, FinalReportTask, ResearchBriefTask, ResearchNote, StageRecord,
    SupervisorTask,
};
pub use workflow::{
    Checkpointer, CompiledResearcher, DeepResearcherBuilder, GraphBlueprint, InvokableGraph,
    ResearcherTasks, memory_checkpointer,
};
