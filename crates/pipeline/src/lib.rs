//! Solver execution: per-job environments, plugin loading through a child
//! interpreter, and the execution engine.

pub mod engine;
pub mod environment;
pub mod plugin;
pub mod subprocess;

pub use engine::{execute, ExecutionOutput};
pub use environment::{Environment, Provisioner, ProvisionerConfig, VenvProvisioner};
pub use plugin::{PluginLoader, ProgressFn, PythonPluginLoader, SolverPlugin};
