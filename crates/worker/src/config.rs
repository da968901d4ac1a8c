use std::path::PathBuf;
use std::time::Duration;

use quboflow_core::dataset::BatchPolicy;
use quboflow_pipeline::ProvisionerConfig;

/// Where solver and dataset artifacts are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// `<root>/<bucket>/<path>` on the local filesystem.
    Local { root: PathBuf },
    /// S3 or an S3-compatible endpoint.
    S3 { endpoint_url: Option<String> },
}

/// Worker pool and job pipeline configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs executed concurrently (default: `2`).
    pub concurrency: usize,
    /// Submitted jobs that may wait for a worker (default: `256`).
    pub queue_capacity: usize,
    pub storage: StorageBackend,
    pub provisioner: ProvisionerConfig,
    /// Wall-clock limit for one solver invocation (default: none).
    pub solver_timeout: Option<Duration>,
    pub batching: BatchPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            queue_capacity: 256,
            storage: StorageBackend::Local {
                root: PathBuf::from("./data"),
            },
            provisioner: ProvisionerConfig::default(),
            solver_timeout: None,
            batching: BatchPolicy::default(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default          |
    /// |-----------------------------|------------------|
    /// | `WORKER_CONCURRENCY`        | `2`              |
    /// | `JOB_QUEUE_CAPACITY`        | `256`            |
    /// | `STORAGE_BACKEND`           | `local`          |
    /// | `STORAGE_ROOT`              | `./data`         |
    /// | `S3_ENDPOINT_URL`           | unset            |
    /// | `PYTHON_BIN`                | `python3`        |
    /// | `VENV_BASE_DIR`             | system temp dir  |
    /// | `VENV_SYSTEM_SITE_PACKAGES` | `false`          |
    /// | `PIP_INSTALL_TIMEOUT_SECS`  | `600`            |
    /// | `SOLVER_TIMEOUT_SECS`       | unset (no limit) |
    /// | `BATCH_THRESHOLD`           | `1000000`        |
    /// | `BATCH_ROWS`                | `1000`           |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let storage = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".into())
            .to_ascii_lowercase()
            .as_str()
        {
            "local" => StorageBackend::Local {
                root: std::env::var("STORAGE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./data")),
            },
            "s3" => StorageBackend::S3 {
                endpoint_url: std::env::var("S3_ENDPOINT_URL")
                    .ok()
                    .filter(|s| !s.is_empty()),
            },
            other => panic!("STORAGE_BACKEND must be `local` or `s3`, got `{other}`"),
        };

        let provisioner = ProvisionerConfig {
            python_bin: std::env::var("PYTHON_BIN").unwrap_or_else(|_| "python3".into()),
            base_dir: std::env::var("VENV_BASE_DIR").ok().map(PathBuf::from),
            system_site_packages: parse_var("VENV_SYSTEM_SITE_PACKAGES", false),
            install_timeout: Some(Duration::from_secs(parse_var(
                "PIP_INSTALL_TIMEOUT_SECS",
                600,
            ))),
            pip_args: Vec::new(),
        };

        let solver_timeout = std::env::var("SOLVER_TIMEOUT_SECS").ok().map(|v| {
            Duration::from_secs(v.parse().expect("SOLVER_TIMEOUT_SECS must be a valid u64"))
        });

        Self {
            concurrency: parse_var("WORKER_CONCURRENCY", defaults.concurrency).max(1),
            queue_capacity: parse_var("JOB_QUEUE_CAPACITY", defaults.queue_capacity).max(1),
            storage,
            provisioner,
            solver_timeout,
            batching: BatchPolicy {
                threshold: parse_var("BATCH_THRESHOLD", defaults.batching.threshold),
                batch_rows: parse_var("BATCH_ROWS", defaults.batching.batch_rows).max(1),
            },
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be valid: {e}")),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.batching.threshold, 1_000_000);
        assert_eq!(config.batching.batch_rows, 1_000);
        assert!(config.solver_timeout.is_none());
        assert_eq!(
            config.storage,
            StorageBackend::Local {
                root: PathBuf::from("./data")
            }
        );
    }

    #[test]
    fn parse_var_falls_back_when_unset() {
        assert_eq!(parse_var("QUBOFLOW_TEST_SURELY_UNSET", 7usize), 7);
    }
}
