#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use quboflow_api::config::ServerConfig;
use quboflow_api::engine::{DispatcherOptions, JobDispatcher, JobRegistry, WorkerPool};
use quboflow_api::router::build_app_router;
use quboflow_api::state::AppState;
use quboflow_core::binding::{BoundArguments, EntryPointSignature, ParameterSpec};
use quboflow_core::dataset::{BatchPolicy, QuboMatrix};
use quboflow_core::error::CoreError;
use quboflow_core::messages::ProgressEvent;
use quboflow_core::normalize::SolverValue;
use quboflow_events::JobBus;
use quboflow_pipeline::{Environment, PluginLoader, ProgressFn, Provisioner, SolverPlugin};
use quboflow_storage::{ArtifactFetcher, LocalObjectStore};
use quboflow_worker::JobRunner;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
    }
}

// ---------------------------------------------------------------------------
// Scripted solver
// ---------------------------------------------------------------------------

/// Provisions empty temporary directories.
pub struct TempProvisioner;

#[async_trait]
impl Provisioner for TempProvisioner {
    async fn provision(&self, _manifest: Option<&str>) -> Result<Environment, CoreError> {
        let dir = tempfile::tempdir().map_err(|e| CoreError::Provision(e.to_string()))?;
        Ok(Environment::new(dir, "python3"))
    }
}

/// What the scripted `solve` does, chosen by the solver source text.
///
/// - `panic`: the worker task panics.
/// - `raise`: raises `ValueError: bad input`.
/// - `missing`: the module has no entry point.
/// - `slow`: sleeps for a minute before succeeding.
/// - `brief`: sleeps for a fraction of a second before succeeding.
/// - anything else: reports two progress events and returns
///   `([0, 1], 0.0)`.
pub struct ScriptedLoader;

struct ScriptedPlugin {
    signature: EntryPointSignature,
    script: String,
}

#[async_trait]
impl PluginLoader for ScriptedLoader {
    async fn load(
        &self,
        _env: &Environment,
        source: &[u8],
    ) -> Result<Box<dyn SolverPlugin>, CoreError> {
        let script = String::from_utf8_lossy(source).trim().to_string();
        if script == "missing" {
            return Err(CoreError::PluginContract("module does not define `solve`".into()));
        }
        Ok(Box::new(ScriptedPlugin {
            signature: EntryPointSignature {
                parameters: vec![
                    ParameterSpec::required("qubo_matrix"),
                    ParameterSpec::with_default("max_iters", json!(10)),
                ],
            },
            script,
        }))
    }
}

#[async_trait]
impl SolverPlugin for ScriptedPlugin {
    fn signature(&self) -> &EntryPointSignature {
        &self.signature
    }

    async fn invoke(
        &self,
        _dataset: &QuboMatrix,
        _arguments: &BoundArguments,
        progress: &ProgressFn<'_>,
    ) -> Result<SolverValue, CoreError> {
        match self.script.as_str() {
            "panic" => panic!("solver crashed the worker"),
            "raise" => Err(CoreError::Execution("ValueError: bad input".into())),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(SolverValue::Null)
            }
            "brief" => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(SolverValue::Null)
            }
            _ => {
                progress(ProgressEvent {
                    iteration: 0,
                    cost: 1.0,
                });
                progress(ProgressEvent {
                    iteration: 1,
                    cost: 0.0,
                });
                Ok(SolverValue::Tuple(vec![
                    SolverValue::from(json!([0, 1])),
                    SolverValue::from(json!(0.0)),
                ]))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub storage: tempfile::TempDir,
    pub cancel: CancellationToken,
    pub pool: WorkerPool,
}

impl TestApp {
    /// Store `bytes` at `bucket/path` in the local object store.
    pub fn put(&self, rel: &str, bytes: &[u8]) {
        let path = self.storage.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }
}

/// Build the full application over a scripted pipeline, with the same
/// middleware stack production uses.
pub fn build_test_app() -> TestApp {
    build_test_app_with(DispatcherOptions {
        concurrency: 2,
        queue_capacity: 16,
    })
}

pub fn build_test_app_with(options: DispatcherOptions) -> TestApp {
    let config = test_config();
    let storage = tempfile::tempdir().unwrap();

    let runner = Arc::new(JobRunner::new(
        ArtifactFetcher::new(Arc::new(LocalObjectStore::new(storage.path()))),
        Arc::new(TempProvisioner),
        Arc::new(ScriptedLoader),
        BatchPolicy::default(),
    ));
    let bus = Arc::new(JobBus::default());
    let registry = Arc::new(JobRegistry::new());
    let cancel = CancellationToken::new();
    let (dispatcher, pool) = JobDispatcher::start(
        Arc::clone(&runner),
        Arc::clone(&registry),
        Arc::clone(&bus),
        options,
        cancel.clone(),
    );

    let state = AppState {
        bus,
        registry,
        dispatcher,
        runner,
    };
    let router = build_app_router(state.clone(), &config);

    let app = TestApp {
        router,
        state,
        storage,
        cancel,
        pool,
    };
    app.put("bucket/solvers/ok.py", b"ok");
    app.put("bucket/solvers/raise.py", b"raise");
    app.put("bucket/solvers/panic.py", b"panic");
    app.put("bucket/solvers/missing.py", b"missing");
    app.put("bucket/solvers/slow.py", b"slow");
    app.put("bucket/solvers/brief.py", b"brief");
    app.put("bucket/data/zeros.json", b"[[0, 0], [0, 0]]");
    app
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, None).await
}

/// Poll `GET /api/v1/jobs/{id}` until the job reaches a terminal status.
pub async fn wait_for_terminal(app: &Router, job_id: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = get(app, &format!("/api/v1/jobs/{job_id}")).await;
        assert_eq!(status, StatusCode::OK);
        let job_status = body["data"]["status"].as_str().unwrap().to_string();
        if job_status == "succeeded" || job_status == "failed" {
            return body["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not finish");
}
