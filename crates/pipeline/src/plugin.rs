//! Solver plugin loading.
//!
//! Plugin code never runs in the worker's own process. [`PythonPluginLoader`]
//! materializes the solver source into the job's [`Environment`] next to a
//! small host script (`host.py`), asks the host to import the module and
//! describe `solve`, and later runs the host again to invoke it. Host and
//! worker speak line-delimited JSON over the child's stdout.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use quboflow_core::binding::{BoundArguments, EntryPointSignature, ParameterSpec, ENTRY_POINT};
use quboflow_core::dataset::QuboMatrix;
use quboflow_core::error::CoreError;
use quboflow_core::messages::ProgressEvent;
use quboflow_core::normalize::SolverValue;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::environment::Environment;
use crate::subprocess::{self, CommandError, CommandInput, CommandOutput};

/// The plugin host, written into every environment.
pub const HOST_SCRIPT: &str = include_str!("host.py");

const HOST_FILE: &str = "quboflow_host.py";
const MODULE_FILE: &str = "solver.py";
const STDERR_TAIL_LINES: usize = 20;

/// Receives progress reports while a solver runs.
pub type ProgressFn<'a> = dyn Fn(ProgressEvent) + Send + Sync + 'a;

/// A loaded solver with a resolved entry point.
///
/// A plugin is only valid while the [`Environment`] it was loaded into is
/// alive.
#[async_trait]
pub trait SolverPlugin: Send + Sync {
    /// Declared parameters of the entry point.
    fn signature(&self) -> &EntryPointSignature;

    /// Call the entry point once with `dataset` and the bound arguments.
    async fn invoke(
        &self,
        dataset: &QuboMatrix,
        arguments: &BoundArguments,
        progress: &ProgressFn<'_>,
    ) -> Result<SolverValue, CoreError>;
}

/// Loads solver source into an environment.
#[async_trait]
pub trait PluginLoader: Send + Sync {
    /// Fails with [`CoreError::PluginContract`] when the module cannot be
    /// imported or does not expose a callable `solve`.
    async fn load(
        &self,
        env: &Environment,
        source: &[u8],
    ) -> Result<Box<dyn SolverPlugin>, CoreError>;
}

// ---------------------------------------------------------------------------
// Host protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum HostMessage {
    Signature {
        parameters: Vec<ParameterSpec>,
    },
    Progress {
        iteration: i64,
        cost: f64,
    },
    Result {
        value: Value,
    },
    Error {
        stage: String,
        #[serde(default)]
        error_type: String,
        message: String,
        #[serde(default)]
        traceback: String,
    },
}

fn parse_line(line: &str) -> Option<HostMessage> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

fn host_error(stage: &str, error_type: &str, message: String, traceback: &str) -> CoreError {
    if !traceback.is_empty() {
        tracing::debug!(stage, traceback, "Plugin host reported an error");
    }
    match stage {
        "contract" => CoreError::PluginContract(message),
        "serialization" => CoreError::Serialization(message),
        _ if error_type.is_empty() => CoreError::Execution(message),
        _ => CoreError::Execution(format!("{error_type}: {message}")),
    }
}

fn host_exited(what: &str, out: &CommandOutput) -> String {
    format!(
        "plugin host exited with code {} before {what}: {}",
        out.exit_code,
        out.stderr_tail(STDERR_TAIL_LINES)
    )
}

// ---------------------------------------------------------------------------
// Python loader
// ---------------------------------------------------------------------------

/// Loads Python solver modules through the plugin host.
#[derive(Debug, Clone, Default)]
pub struct PythonPluginLoader {
    timeout: Option<Duration>,
}

impl PythonPluginLoader {
    /// `timeout` bounds both import and each invocation; `None` waits forever.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PluginLoader for PythonPluginLoader {
    async fn load(
        &self,
        env: &Environment,
        source: &[u8],
    ) -> Result<Box<dyn SolverPlugin>, CoreError> {
        let host = env.path().join(HOST_FILE);
        let module = env.path().join(MODULE_FILE);
        let materialize = |e: std::io::Error| {
            CoreError::Internal(format!("cannot materialize plugin: {e}"))
        };
        tokio::fs::write(&host, HOST_SCRIPT).await.map_err(materialize)?;
        tokio::fs::write(&module, source).await.map_err(materialize)?;

        let plugin = PythonPlugin {
            python: env.python().to_path_buf(),
            host,
            module,
            workdir: env.path().to_path_buf(),
            timeout: self.timeout,
            signature: EntryPointSignature {
                parameters: Vec::new(),
            },
        };

        let mut reply = None;
        let out = plugin
            .run("describe", Vec::new(), |line| {
                if let Some(msg) = parse_line(line) {
                    reply.get_or_insert(msg);
                }
            })
            .await?;

        let parameters = match reply {
            Some(HostMessage::Signature { parameters }) => parameters,
            Some(HostMessage::Error {
                stage,
                error_type,
                message,
                traceback,
            }) => return Err(host_error(&stage, &error_type, message, &traceback)),
            _ => {
                return Err(CoreError::PluginContract(host_exited(
                    &format!("describing `{ENTRY_POINT}`"),
                    &out,
                )))
            }
        };

        tracing::debug!(
            parameters = parameters.len(),
            "Resolved `{ENTRY_POINT}` signature",
        );
        Ok(Box::new(PythonPlugin {
            signature: EntryPointSignature { parameters },
            ..plugin
        }))
    }
}

#[derive(Debug)]
struct PythonPlugin {
    python: PathBuf,
    host: PathBuf,
    module: PathBuf,
    workdir: PathBuf,
    timeout: Option<Duration>,
    signature: EntryPointSignature,
}

impl PythonPlugin {
    async fn run<F>(
        &self,
        mode: &str,
        stdin: Vec<u8>,
        on_line: F,
    ) -> Result<CommandOutput, CoreError>
    where
        F: FnMut(&str) + Send,
    {
        let mut cmd = Command::new(&self.python);
        cmd.arg(&self.host).arg(mode).arg(&self.module);
        let input = CommandInput {
            stdin,
            env_vars: vec![
                ("PYTHONUNBUFFERED".into(), "1".into()),
                ("PYTHONDONTWRITEBYTECODE".into(), "1".into()),
            ],
            working_directory: Some(self.workdir.clone()),
            timeout: self.timeout,
        };
        subprocess::run_streaming(&mut cmd, input, on_line)
            .await
            .map_err(|e| match e {
                CommandError::Timeout { elapsed_ms } => {
                    CoreError::Execution(format!("solver timed out after {elapsed_ms}ms"))
                }
                other => CoreError::Execution(format!("plugin host failed: {other}")),
            })
    }
}

#[async_trait]
impl SolverPlugin for PythonPlugin {
    fn signature(&self) -> &EntryPointSignature {
        &self.signature
    }

    async fn invoke(
        &self,
        dataset: &QuboMatrix,
        arguments: &BoundArguments,
        progress: &ProgressFn<'_>,
    ) -> Result<SolverValue, CoreError> {
        let request = json!({
            "dataset": dataset.to_json(),
            "arguments": arguments.keyword_arguments(),
            "progress": arguments.wants_progress,
        });
        let stdin = serde_json::to_vec(&request)
            .map_err(|e| CoreError::Internal(format!("cannot encode solver request: {e}")))?;

        let mut result = None;
        let mut failure = None;
        let out = self
            .run("invoke", stdin, |line| match parse_line(line) {
                Some(HostMessage::Progress { iteration, cost }) => {
                    progress(ProgressEvent { iteration, cost })
                }
                Some(HostMessage::Result { value }) => result = Some(value),
                Some(HostMessage::Error {
                    stage,
                    error_type,
                    message,
                    traceback,
                }) => failure = Some(host_error(&stage, &error_type, message, &traceback)),
                Some(HostMessage::Signature { .. }) => {}
                None => tracing::trace!(line, "Plugin stdout"),
            })
            .await?;

        if let Some(err) = failure {
            return Err(err);
        }
        match result {
            Some(value) => SolverValue::from_wire(value),
            None => Err(CoreError::Execution(host_exited("reporting a result", &out))),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_host_messages() {
        assert_matches!(
            parse_line(r#"{"kind": "progress", "iteration": 3, "cost": -1.5}"#),
            Some(HostMessage::Progress { iteration: 3, .. })
        );
        assert_matches!(
            parse_line(r#"{"kind": "result", "value": {"$type": "tuple", "items": []}}"#),
            Some(HostMessage::Result { .. })
        );
        assert!(parse_line("iteration 3 done").is_none());
        assert!(parse_line(r#"{"kind": "mystery"}"#).is_none());
    }

    #[test]
    fn signature_descriptor_deserializes() {
        let msg = parse_line(
            r#"{"kind": "signature", "parameters": [
                {"name": "qubo_matrix", "kind": "positional", "has_default": false, "default": null},
                {"name": "max_iters", "kind": "keyword", "has_default": true, "default": 100}
            ]}"#,
        );
        let Some(HostMessage::Signature { parameters }) = msg else {
            panic!("expected signature, got {msg:?}");
        };
        let expected = ParameterSpec::with_default("max_iters", json!(100))
            .kind(quboflow_core::binding::ParameterKind::Keyword);
        assert_eq!(parameters[1], expected);
    }

    #[test]
    fn host_errors_map_to_taxonomy() {
        assert_matches!(
            host_error("contract", "ContractError", "no solve".into(), ""),
            CoreError::PluginContract(msg) if msg == "no solve"
        );
        assert_matches!(
            host_error("execution", "ZeroDivisionError", "division by zero".into(), ""),
            CoreError::Execution(msg) if msg == "ZeroDivisionError: division by zero"
        );
        assert_matches!(
            host_error("serialization", "ValueError", "circular".into(), ""),
            CoreError::Serialization(_)
        );
    }
}
