use crate::config::ResearcherConfig;
use crate::runnable::{ChatMessage, GraphInput, RunnableConfig};
use crate::tasks::{
    BRIEF_KEY, CLARIFICATION_KEY, CONFIG_KEY, ClarifyTask, CompressTask, FinalReportTask,
    MESSAGES_KEY, MORE_WORK_KEY, NOTES_KEY, QUESTION_KEY, REPORT_KEY, ResearchBriefTask,
    ResearchNote, STAGES_KEY, StageRecord, SupervisorTask,
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use graph_flow::{
    ExecutionStatus, FlowRunner, GraphBuilder, InMemorySessionStorage, Session, SessionStorage,
    Task,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};

/// Session storage used to checkpoint graph state between task executions.
pub type Checkpointer = Arc<dyn SessionStorage>;

/// Fresh in-memory checkpointer, scoped to whoever holds it.
pub fn memory_checkpointer() -> Checkpointer {
    Arc::new(InMemorySessionStorage::new())
}

/// Something that can be compiled into an invocable graph.
pub trait GraphBlueprint: Send + Sync {
    type Compiled: InvokableGraph;

    fn compile(&self, checkpointer: Checkpointer) -> Self::Compiled;
}

/// A compiled graph that runs once per invocation and returns its final state.
#[async_trait]
pub trait InvokableGraph: Send + Sync {
    async fn invoke(&self, input: GraphInput, config: RunnableConfig) -> Result<Value>;
}

/// Exposes the stage tasks wired into the default researcher graph.
#[derive(Clone)]
pub struct ResearcherTasks {
    pub clarify: Arc<ClarifyTask>,
    pub brief: Arc<ResearchBriefTask>,
    pub supervisor: Arc<SupervisorTask>,
    pub compress: Arc<CompressTask>,
    pub final_report: Arc<FinalReportTask>,
}

impl ResearcherTasks {
    fn new() -> Self {
        Self {
            clarify: Arc::new(ClarifyTask),
            brief: Arc::new(ResearchBriefTask),
            supervisor: Arc::new(SupervisorTask),
            compress: Arc::new(CompressTask),
            final_report: Arc::new(FinalReportTask),
        }
    }
}

/// Builder for the default deep researcher graph.
#[derive(Debug, Clone, Default)]
pub struct DeepResearcherBuilder;

impl DeepResearcherBuilder {
    pub fn new() -> Self {
        Self
    }

    fn build_graph(&self) -> (Arc<graph_flow::Graph>, ResearcherTasks) {
        let tasks = ResearcherTasks::new();

        let graph = GraphBuilder::new("deep_researcher")
            .add_task(tasks.clarify.clone())
            .add_task(tasks.brief.clone())
            .add_task(tasks.supervisor.clone())
            .add_task(tasks.compress.clone())
            .add_task(tasks.final_report.clone())
            .add_edge(tasks.clarify.id(), tasks.brief.id())
            .add_edge(tasks.brief.id(), tasks.supervisor.id())
            .add_conditional_edge(
                tasks.supervisor.id(),
                |ctx| ctx.get_sync::<bool>(MORE_WORK_KEY).unwrap_or(false),
                tasks.supervisor.id(),
                tasks.compress.id(),
            )
            .add_edge(tasks.compress.id(), tasks.final_report.id())
            .set_start_task(tasks.clarify.id())
            .build();

        (Arc::new(graph), tasks)
    }
}

impl GraphBlueprint for DeepResearcherBuilder {
    type Compiled = CompiledResearcher;

    fn compile(&self, checkpointer: Checkpointer) -> CompiledResearcher {
        let (graph, tasks) = self.build_graph();
        CompiledResearcher {
            runner: FlowRunner::new(graph, checkpointer.clone()),
            storage: checkpointer,
            start_task: tasks.clarify.id().to_string(),
        }
    }
}

/// The researcher graph bound to a checkpointer.
pub struct CompiledResearcher {
    runner: FlowRunner,
    storage: Checkpointer,
    start_task: String,
}

#[async_trait]
impl InvokableGraph for CompiledResearcher {
    async fn invoke(&self, input: GraphInput, config: RunnableConfig) -> Result<Value> {
        let thread_id = config
            .thread_id()
            .ok_or_else(|| anyhow!("configurable.thread_id is required"))?
            .to_string();
        let researcher_config = ResearcherConfig::from_configurable(&config.configurable)
            .map_err(|err| anyhow!("invalid configurable options: {err}"))?;
        let question = input
            .messages
            .iter()
            .rev()
            .find(|message| message.role == "user")
            .map(|message| message.content.clone())
            .ok_or_else(|| anyhow!("input must contain a user message"))?;

        info!(%thread_id, "invoking deep researcher");

        let session = Session::new_from_task(thread_id.clone(), &self.start_task);
        session.context.set(QUESTION_KEY, question).await;
        session.context.set(MESSAGES_KEY, &input.messages).await;
        session.context.set(CONFIG_KEY, &researcher_config).await;

        self.storage
            .save(session)
            .await
            .map_err(|err| anyhow!("failed to persist session: {err}"))?;

        loop {
            let result = self
                .runner
                .run(&thread_id)
                .await
                .map_err(|err| anyhow!("graph execution failure: {err}"))?;

            match result.status {
                ExecutionStatus::Completed => break,
                ExecutionStatus::WaitingForInput => continue,
                ExecutionStatus::Error(message) => return Err(anyhow!(message)),
            }
        }

        let session = self
            .storage
            .get(&thread_id)
            .await
            .map_err(|err| anyhow!("failed to reload session: {err}"))?
            .ok_or_else(|| anyhow!("session missing after execution"))?;

        let context = &session.context;
        let messages: Vec<ChatMessage> = context.get(MESSAGES_KEY).await.unwrap_or_default();
        let brief: Option<String> = context.get(BRIEF_KEY).await;
        let notes: Vec<ResearchNote> = context.get(NOTES_KEY).await.unwrap_or_default();
        let report: Option<String> = context.get(REPORT_KEY).await;
        let stages: Vec<StageRecord> = context.get(STAGES_KEY).await.unwrap_or_default();
        let clarification: bool = context.get(CLARIFICATION_KEY).await.unwrap_or(false);

        debug!(%thread_id, stages = stages.len(), "deep researcher finished");

        Ok(json!({
            "thread_id": thread_id,
            "messages": messages,
            "research_brief": brief,
            "notes": notes,
            "final_report": report,
            "clarification_requested": clarification,
            "stages": stages,
        }))
    }
}
