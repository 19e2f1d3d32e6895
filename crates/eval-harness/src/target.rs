//! Per-example invocation: the function the batch driver calls once per example.

use std::future::Future;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use deepresearch_graph::{
    memory_checkpointer, DeepResearcherBuilder, GraphBlueprint, GraphInput, InvokableGraph,
    RunnableConfig,
};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::dataset::Example;
use crate::error::EvalError;
use crate::settings::RunConfiguration;

/// The system under evaluation: example in, final state out.
#[async_trait]
pub trait Target: Send + Sync {
    async fn invoke(&self, example: &Example) -> Result<Value>;
}

/// Target backed by an async closure, handy for test doubles.
pub struct FnTarget<F> {
    func: F,
}

pub fn from_async_fn<F, Fut>(func: F) -> FnTarget<F>
where
    F: Fn(Example) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    FnTarget { func }
}

#[async_trait]
impl<F, Fut> Target for FnTarget<F>
where
    F: Fn(Example) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn invoke(&self, example: &Example) -> Result<Value> {
        (self.func)(example.clone()).await
    }
}

/// Session identifier plus the run configuration for a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub session_id: String,
    pub run: RunConfiguration,
}

impl InvocationContext {
    /// A context with a freshly generated session identifier.
    pub fn new(run: &RunConfiguration) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            run: run.clone(),
        }
    }

    pub fn runnable_config(&self) -> RunnableConfig {
        RunnableConfig::new(&self.session_id).extend_configurable(self.run.to_configurable())
    }
}

/// Runs the researcher graph once per example with a fresh checkpointer.
pub struct ResearcherTarget<B = DeepResearcherBuilder> {
    blueprint: B,
    run: RunConfiguration,
}

impl ResearcherTarget<DeepResearcherBuilder> {
    pub fn with_default_graph(run: RunConfiguration) -> Self {
        Self::new(DeepResearcherBuilder::new(), run)
    }
}

impl<B: GraphBlueprint> ResearcherTarget<B> {
    pub fn new(blueprint: B, run: RunConfiguration) -> Self {
        Self { blueprint, run }
    }

}

#[async_trait]
impl<B> Target for ResearcherTarget<B>
where
    B: GraphBlueprint + 'static,
{
    async fn invoke(&self, example: &Example) -> Result<Value> {
        let question = example.question().ok_or_else(|| {
            anyhow!(EvalError::InvalidExample {
                id: example.id.clone(),
                reason: "inputs.messages[0].content is missing".to_string(),
            })
        })?;

        let context = InvocationContext::new(&self.run);
        let graph = self.blueprint.compile(memory_checkpointer());

        debug!(
            example = %example.id,
            session = %context.session_id,
            "invoking researcher graph"
        );

        graph
            .invoke(
                GraphInput::from_user_message(question),
                context.runnable_config(),
            )
            .await
    }
}
