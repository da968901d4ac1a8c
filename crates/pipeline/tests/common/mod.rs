//! Shared helpers for tests that need a real Python interpreter.

use std::process::Command;

use quboflow_pipeline::{ProvisionerConfig, VenvProvisioner};

/// Whether `python3` with the `venv` module is on `PATH`.
pub fn python_available() -> bool {
    Command::new("python3")
        .args(["-c", "import venv"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Skip the current test when no interpreter is available.
macro_rules! require_python {
    () => {
        if !common::python_available() {
            eprintln!("python3 not available; skipping");
            return;
        }
    };
}

/// Provisioner rooted in `base`, never touching a package index.
pub fn offline_provisioner(base: &std::path::Path) -> VenvProvisioner {
    VenvProvisioner::new(ProvisionerConfig {
        base_dir: Some(base.to_path_buf()),
        pip_args: vec!["--no-index".into()],
        ..Default::default()
    })
}
