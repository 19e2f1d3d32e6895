//! LangSmith-compatible HTTP backend.
//!
//! Datasets and examples are fetched from the service, every completed example
//! is posted as a chain run with its feedback, and the experiment session is
//! closed once the batch finishes.

use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{experiment_name, EvaluateRequest, EvaluationBackend};
use crate::dataset::{Dataset, Example};
use crate::error::{EvalError, Result};
use crate::report::{ExampleResult, ExperimentReport};
use crate::runner::{run_examples, ResultRecorder};
use crate::target::Target;

pub const DEFAULT_ENDPOINT: &str = "https://api.smith.langchain.com";
pub const ENDPOINT_VAR: &str = "LANGSMITH_ENDPOINT";
pub const API_KEY_VARS: [&str; 2] = ["LANGSMITH_API_KEY", "LANGCHAIN_API_KEY"];
const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct LangSmithConfig {
    pub endpoint: String,
    pub api_key: String,
}

impl LangSmithConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let api_key = API_KEY_VARS
            .iter()
            .find_map(|key| present(*key))
            .ok_or_else(|| EvalError::MissingSecret(API_KEY_VARS.join(" or ")))?;
        let endpoint = present(ENDPOINT_VAR).unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Ok(Self::new(endpoint, api_key))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteDataset {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct RemoteExample {
    id: String,
    #[serde(default)]
    inputs: Value,
    #[serde(default)]
    outputs: Option<Value>,
    #[serde(default)]
    metadata: Option<Value>,
}

impl From<RemoteExample> for Example {
    fn from(remote: RemoteExample) -> Self {
        Example {
            id: remote.id,
            inputs: remote.inputs,
            outputs: remote.outputs,
            metadata: remote.metadata,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSession {
    pub id: String,
}

#[derive(Debug, Serialize)]
struct RunPayload<'a> {
    id: String,
    name: &'a str,
    run_type: &'a str,
    inputs: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    outputs: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    session_id: &'a str,
    reference_example_id: &'a str,
}

/// Thin JSON client over the LangSmith REST API.
#[derive(Debug, Clone)]
pub struct LangSmithClient {
    http: Client,
    config: LangSmithConfig,
}

impl LangSmithClient {
    pub fn new(config: LangSmithConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("eval-harness/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", self.config.endpoint)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("x-api-key", &self.config.api_key)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.authorized(request).send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    async fn send_discarding(&self, request: RequestBuilder) -> Result<()> {
        self.authorized(request).send().await?.error_for_status()?;
        Ok(())
    }

    pub async fn find_dataset(&self, name: &str) -> Result<RemoteDataset> {
        let request = self.http.get(self.url("datasets")).query(&[("name", name)]);
        let datasets: Vec<RemoteDataset> = self.send(request).await?;
        datasets
            .into_iter()
            .next()
            .ok_or_else(|| EvalError::DatasetNotFound(name.to_string()))
    }

    pub async fn list_examples(&self, dataset: &RemoteDataset) -> Result<Vec<Example>> {
        let mut examples = Vec::new();
        let mut offset = 0usize;
        loop {
            let request = self.http.get(self.url("examples")).query(&[
                ("dataset", dataset.id.clone()),
                ("offset", offset.to_string()),
                ("limit", PAGE_SIZE.to_string()),
            ]);
            let page: Vec<RemoteExample> = self.send(request).await?;
            let fetched = page.len();
            examples.extend(page.into_iter().map(Example::from));
            debug!(dataset = %dataset.name, offset, fetched, "fetched example page");
            if fetched < PAGE_SIZE {
                break;
            }
            offset += fetched;
        }
        Ok(examples)
    }

    pub async fn create_session(
        &self,
        name: &str,
        dataset: &RemoteDataset,
        metadata: &Map<String, Value>,
        start_time: DateTime<Utc>,
    ) -> Result<RemoteSession> {
        let body = json!({
            "name": name,
            "reference_dataset_id": dataset.id,
            "start_time": start_time,
            "extra": { "metadata": metadata },
        });
        self.send(self.http.post(self.url("sessions")).json(&body))
            .await
    }

    pub async fn close_session(
        &self,
        session: &RemoteSession,
        end_time: DateTime<Utc>,
    ) -> Result<()> {
        let request = self
            .http
            .patch(self.url(&format!("sessions/{}", session.id)))
            .json(&json!({ "end_time": end_time }));
        self.send_discarding(request).await
    }

    pub async fn create_run(&self, session: &RemoteSession, result: &ExampleResult) -> Result<()> {
        let payload = RunPayload {
            id: result.run_id.to_string(),
            name: "deep_researcher",
            run_type: "chain",
            inputs: &result.inputs,
            outputs: result.outputs.as_ref(),
            error: result.error.as_deref(),
            start_time: result.started_at,
            end_time: result.finished_at,
            session_id: &session.id,
            reference_example_id: &result.example_id,
        };
        self.send_discarding(self.http.post(self.url("runs")).json(&payload))
            .await
    }

    pub async fn create_feedback(
        &self,
        result: &ExampleResult,
        key: &str,
        score: f64,
        comment: Option<&str>,
    ) -> Result<()> {
        let body = json!({
            "run_id": result.run_id,
            "key": key,
            "score": score,
            "comment": comment,
        });
        self.send_discarding(self.http.post(self.url("feedback")).json(&body))
            .await
    }
}

/// Posts each finished example as a run plus one feedback per scored evaluation.
struct RunUploader<'a> {
    client: &'a LangSmithClient,
    session: &'a RemoteSession,
}

#[async_trait]
impl<'a> ResultRecorder for RunUploader<'a> {
    async fn record(&self, result: &ExampleResult) -> Result<()> {
        self.client.create_run(self.session, result).await?;
        for evaluation in &result.evaluations {
            if let Some(score) = evaluation.score {
                self.client
                    .create_feedback(result, &evaluation.key, score, evaluation.comment.as_deref())
                    .await?;
            }
        }
        Ok(())
    }
}

pub struct LangSmithBackend {
    client: LangSmithClient,
}

impl LangSmithBackend {
    pub fn new(client: LangSmithClient) -> Self {
        Self { client }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(LangSmithClient::new(LangSmithConfig::from_env()?)?))
    }
}

#[async_trait]
impl EvaluationBackend for LangSmithBackend {
    async fn evaluate(
        &self,
        target: Arc<dyn Target>,
        request: EvaluateRequest,
    ) -> Result<ExperimentReport> {
        let remote = self.client.find_dataset(&request.dataset).await?;
        let dataset = Dataset::new(remote.name.clone(), self.client.list_examples(&remote).await?);

        let name = experiment_name(&request.experiment_prefix);
        let started_at = Utc::now();
        let session = self
            .client
            .create_session(&name, &remote, &request.metadata, started_at)
            .await?;
        info!(
            experiment = %name,
            session = %session.id,
            dataset = %dataset.name,
            examples = dataset.len(),
            endpoint = self.client.endpoint(),
            "starting LangSmith experiment"
        );

        let uploader = RunUploader {
            client: &self.client,
            session: &session,
        };
        let results = run_examples(
            &dataset.examples,
            target.as_ref(),
            &request.evaluators,
            request.max_concurrency,
            &uploader,
        )
        .await?;

        let report = ExperimentReport::new(
            name,
            dataset.name,
            request.metadata,
            started_at,
            results,
        )
        .with_experiment_id(session.id.clone());
        self.client.close_session(&session, report.finished_at).await?;
        Ok(report)
    }
}
