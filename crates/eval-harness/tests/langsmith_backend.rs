use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use eval_harness::{
    run_evaluation, EvalError, EvalSettings, LangSmithBackend, LangSmithClient, LangSmithConfig,
    ResearcherTarget, Target,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Default)]
struct MockLangSmith {
    runs: AtomicUsize,
    feedback: AtomicUsize,
    unauthorized: AtomicUsize,
    session_metadata: Mutex<Option<Value>>,
    closed_sessions: Mutex<Vec<String>>,
}

impl MockLangSmith {
    fn check_key(&self, headers: &HeaderMap) {
        if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
            self.unauthorized.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Deserialize)]
struct DatasetQuery {
    name: String,
}

#[derive(Deserialize)]
struct ExampleQuery {
    dataset: String,
    offset: usize,
}

async fn datasets(
    State(mock): State<Arc<MockLangSmith>>,
    headers: HeaderMap,
    Query(query): Query<DatasetQuery>,
) -> Json<Value> {
    mock.check_key(&headers);
    if query.name == "Deep Research Bench" {
        Json(json!([{"id": "ds-1", "name": query.name}]))
    } else {
        Json(json!([]))
    }
}

async fn examples(
    State(mock): State<Arc<MockLangSmith>>,
    headers: HeaderMap,
    Query(query): Query<ExampleQuery>,
) -> Json<Value> {
    mock.check_key(&headers);
    assert_eq!(query.dataset, "ds-1");
    if query.offset > 0 {
        return Json(json!([]));
    }
    Json(json!([
        {
            "id": "ex-1",
            "inputs": {"messages": [{
                "role": "user",
                "content": "Assess lithium battery recycling policy in Europe"
            }]},
            "outputs": {"answer": "Europe sets battery recycling targets."}
        },
        {
            "id": "ex-2",
            "inputs": {"messages": [{
                "role": "user",
                "content": "Compare sodium-ion and lithium-ion storage costs"
            }]}
        }
    ]))
}

async fn create_session(
    State(mock): State<Arc<MockLangSmith>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    mock.check_key(&headers);
    *mock.session_metadata.lock().unwrap() = Some(body["extra"]["metadata"].clone());
    Json(json!({"id": "sess-1", "name": body["name"]}))
}

async fn close_session(
    State(mock): State<Arc<MockLangSmith>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    assert!(body.get("end_time").is_some());
    mock.closed_sessions.lock().unwrap().push(id);
    StatusCode::OK
}

async fn create_run(
    State(mock): State<Arc<MockLangSmith>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    mock.check_key(&headers);
    assert_eq!(body["session_id"], "sess-1");
    assert_eq!(body["run_type"], "chain");
    mock.runs.fetch_add(1, Ordering::SeqCst);
    StatusCode::CREATED
}

async fn create_feedback(
    State(mock): State<Arc<MockLangSmith>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    mock.check_key(&headers);
    assert!(body["score"].is_number());
    mock.feedback.fetch_add(1, Ordering::SeqCst);
    StatusCode::CREATED
}

async fn spawn_mock(mock: Arc<MockLangSmith>) -> String {
    let app = Router::new()
        .route("/api/v1/datasets", get(datasets))
        .route("/api/v1/examples", get(examples))
        .route("/api/v1/sessions", post(create_session))
        .route("/api/v1/sessions/:id", patch(close_session))
        .route("/api/v1/runs", post(create_run))
        .route("/api/v1/feedback", post(create_feedback))
        .with_state(mock);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn backend(endpoint: &str) -> LangSmithBackend {
    let client = LangSmithClient::new(LangSmithConfig::new(endpoint, "test-key")).unwrap();
    LangSmithBackend::new(client)
}

#[tokio::test]
async fn posts_one_run_per_example_and_feedback_per_score() {
    let mock = Arc::new(MockLangSmith::default());
    let endpoint = spawn_mock(mock.clone()).await;

    let settings = EvalSettings::default();
    let target: Arc<dyn Target> =
        Arc::new(ResearcherTarget::with_default_graph(settings.run.clone()));
    let report = run_evaluation(&settings, &backend(&endpoint), target)
        .await
        .expect("evaluation against mock should succeed");

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.failures, 0);
    assert_eq!(report.experiment_id.as_deref(), Some("sess-1"));

    let scored: usize = report
        .results
        .iter()
        .flat_map(|result| result.evaluations.iter())
        .filter(|evaluation| evaluation.score.is_some())
        .count();
    // ex-2 has no reference answer, so correctness stays unscored there.
    assert_eq!(scored, 11);
    assert_eq!(mock.runs.load(Ordering::SeqCst), 2);
    assert_eq!(mock.feedback.load(Ordering::SeqCst), scored);
    assert_eq!(mock.unauthorized.load(Ordering::SeqCst), 0);

    let metadata = mock.session_metadata.lock().unwrap().clone().unwrap();
    assert_eq!(metadata["search_api"], "tavily");
    assert_eq!(metadata.as_object().unwrap().len(), 14);
    assert_eq!(*mock.closed_sessions.lock().unwrap(), vec!["sess-1".to_string()]);
}

#[tokio::test]
async fn unknown_remote_dataset_is_reported() {
    let mock = Arc::new(MockLangSmith::default());
    let endpoint = spawn_mock(mock.clone()).await;

    let settings = EvalSettings {
        dataset: "Nope".to_string(),
        ..EvalSettings::default()
    };
    let target: Arc<dyn Target> =
        Arc::new(ResearcherTarget::with_default_graph(settings.run.clone()));
    let err = run_evaluation(&settings, &backend(&endpoint), target)
        .await
        .unwrap_err();

    assert!(matches!(err, EvalError::DatasetNotFound(ref name) if name == "Nope"));
    assert_eq!(mock.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn http_failures_abort_the_batch() {
    let app = Router::new().route(
        "/api/v1/datasets",
        get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let settings = EvalSettings::default();
    let target: Arc<dyn Target> =
        Arc::new(ResearcherTarget::with_default_graph(settings.run.clone()));
    let err = run_evaluation(&settings, &backend(&format!("http://{addr}")), target)
        .await
        .unwrap_err();
    assert!(matches!(err, EvalError::Backend(_)));
}
