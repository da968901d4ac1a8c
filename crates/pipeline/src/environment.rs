//! Ephemeral per-job Python environments.
//!
//! Every job gets a fresh virtual environment inside its own temporary
//! directory. The [`Environment`] value owns that directory: dropping it
//! removes the interpreter, installed packages and any materialized plugin
//! files, on every exit path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use quboflow_core::error::CoreError;
use tempfile::TempDir;
use tokio::process::Command;

use crate::subprocess::{self, CommandError, CommandInput};

/// Lines of stderr kept in provisioning error messages.
const STDERR_TAIL_LINES: usize = 20;

/// An isolated interpreter scope owned by exactly one job.
#[derive(Debug)]
pub struct Environment {
    dir: TempDir,
    python: PathBuf,
}

impl Environment {
    /// Wrap an existing directory and interpreter.
    pub fn new(dir: TempDir, python: impl Into<PathBuf>) -> Self {
        Self {
            dir,
            python: python.into(),
        }
    }

    /// Root of the environment's private directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Interpreter that runs plugin code.
    pub fn python(&self) -> &Path {
        &self.python
    }

    /// Remove the environment now, reporting failures.
    pub fn close(self) -> Result<(), CoreError> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|e| {
            CoreError::Internal(format!(
                "failed to remove environment {}: {e}",
                path.display()
            ))
        })
    }
}

/// Creates a job's [`Environment`] and installs its declared dependencies.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, manifest: Option<&str>) -> Result<Environment, CoreError>;
}

/// Whether a requirements manifest declares anything to install.
pub fn has_requirements(manifest: &str) -> bool {
    manifest.lines().any(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with('#')
    })
}

// ---------------------------------------------------------------------------
// venv provisioner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Interpreter used to create environments.
    pub python_bin: String,
    /// Directory under which environments are created (system temp if `None`).
    pub base_dir: Option<PathBuf>,
    /// Expose the host interpreter's site-packages inside the environment.
    pub system_site_packages: bool,
    /// Limit on `pip install`.
    pub install_timeout: Option<Duration>,
    /// Extra arguments appended to `pip install`.
    pub pip_args: Vec<String>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            python_bin: "python3".into(),
            base_dir: None,
            system_site_packages: false,
            install_timeout: Some(Duration::from_secs(600)),
            pip_args: Vec::new(),
        }
    }
}

/// Provisions environments with `python -m venv` and `pip install -r`.
#[derive(Debug, Clone, Default)]
pub struct VenvProvisioner {
    config: ProvisionerConfig,
}

impl VenvProvisioner {
    pub fn new(config: ProvisionerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    fn scratch_dir(&self) -> Result<TempDir, CoreError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("quboflow-env-");
        let dir = match &self.config.base_dir {
            Some(base) => {
                std::fs::create_dir_all(base).and_then(|_| builder.tempdir_in(base))
            }
            None => builder.tempdir(),
        };
        dir.map_err(|e| CoreError::Provision(format!("cannot create environment directory: {e}")))
    }

    async fn create_venv(&self, venv: &Path, with_pip: bool) -> Result<(), CoreError> {
        let mut cmd = Command::new(&self.config.python_bin);
        cmd.args(["-m", "venv"]);
        if self.config.system_site_packages {
            cmd.arg("--system-site-packages");
        }
        if !with_pip {
            cmd.arg("--without-pip");
        }
        cmd.arg(venv);

        let out = subprocess::run_command(&mut cmd, CommandInput::default())
            .await
            .map_err(|e| provision_error("creating virtual environment", e))?;
        if !out.success() {
            return Err(CoreError::Provision(format!(
                "creating virtual environment failed (exit {}): {}",
                out.exit_code,
                out.stderr_tail(STDERR_TAIL_LINES)
            )));
        }
        Ok(())
    }

    async fn install(&self, python: &Path, requirements: &Path) -> Result<(), CoreError> {
        let mut cmd = Command::new(python);
        cmd.args(["-m", "pip", "install", "--disable-pip-version-check", "-r"])
            .arg(requirements)
            .args(&self.config.pip_args);

        let input = CommandInput {
            timeout: self.config.install_timeout,
            ..Default::default()
        };
        let out = subprocess::run_command(&mut cmd, input)
            .await
            .map_err(|e| provision_error("installing dependencies", e))?;
        if !out.success() {
            return Err(CoreError::Provision(format!(
                "dependency installation failed (exit {}): {}",
                out.exit_code,
                out.stderr_tail(STDERR_TAIL_LINES)
            )));
        }
        tracing::debug!(duration_ms = out.duration_ms, "Installed solver dependencies");
        Ok(())
    }
}

#[async_trait]
impl Provisioner for VenvProvisioner {
    async fn provision(&self, manifest: Option<&str>) -> Result<Environment, CoreError> {
        // Dropping `dir` on any early return removes everything created so far.
        let dir = self.scratch_dir()?;
        let venv = dir.path().join("venv");
        let requirements = manifest.filter(|m| has_requirements(m));

        self.create_venv(&venv, requirements.is_some()).await?;
        let python = venv_python(&venv);

        if let Some(manifest) = requirements {
            let path = dir.path().join("requirements.txt");
            tokio::fs::write(&path, manifest)
                .await
                .map_err(|e| CoreError::Provision(format!("cannot write manifest: {e}")))?;
            self.install(&python, &path).await?;
        }

        tracing::info!(
            path = %dir.path().display(),
            dependencies = requirements.is_some(),
            "Provisioned environment",
        );
        Ok(Environment::new(dir, python))
    }
}

fn venv_python(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}

fn provision_error(stage: &str, err: CommandError) -> CoreError {
    CoreError::Provision(format!("{stage}: {err}"))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn comment_only_manifests_install_nothing() {
        assert!(!has_requirements(""));
        assert!(!has_requirements("# pinned later\n\n   \n"));
        assert!(has_requirements("# solver deps\nnumpy>=1.24\n"));
    }

    #[test]
    fn dropping_environment_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        std::fs::write(path.join("solver.py"), "def solve(m): pass").unwrap();

        let env = Environment::new(dir, "/usr/bin/python3");
        assert!(path.exists());
        drop(env);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_provision_error_and_cleans_up() {
        let base = tempfile::tempdir().unwrap();
        let provisioner = VenvProvisioner::new(ProvisionerConfig {
            python_bin: "/nonexistent/python3".into(),
            base_dir: Some(base.path().to_path_buf()),
            ..Default::default()
        });

        let err = provisioner.provision(None).await.unwrap_err();
        assert_matches!(err, CoreError::Provision(_));
        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
    }
}
