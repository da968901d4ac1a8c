//! Execution engine: feeds every dataset unit to a loaded plugin.

use quboflow_core::binding::BoundArguments;
use quboflow_core::dataset::Dataset;
use quboflow_core::error::CoreError;
use quboflow_core::normalize::SolverValue;

use crate::plugin::{ProgressFn, SolverPlugin};

/// Raw output of one job's execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutput {
    /// The dataset ran as one unit.
    Whole(SolverValue),
    /// One result per batch, in row order.
    Batches(Vec<SolverValue>),
}

/// Invoke `plugin` on the dataset, or on each of its batches in order.
///
/// The first failing unit fails the whole execution.
pub async fn execute(
    plugin: &dyn SolverPlugin,
    dataset: &Dataset,
    arguments: &BoundArguments,
    progress: &ProgressFn<'_>,
) -> Result<ExecutionOutput, CoreError> {
    if !dataset.is_batched() {
        let value = plugin.invoke(dataset.matrix(), arguments, progress).await?;
        return Ok(ExecutionOutput::Whole(value));
    }

    let total = dataset.unit_count();
    let mut results = Vec::with_capacity(total);
    for unit in dataset.units() {
        tracing::debug!(
            batch = unit.index + 1,
            total,
            rows = ?unit.rows,
            "Executing batch",
        );
        results.push(plugin.invoke(&unit.matrix, arguments, progress).await?);
    }
    Ok(ExecutionOutput::Batches(results))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use quboflow_core::binding::{bind, EntryPointSignature, ParameterSpec};
    use quboflow_core::dataset::QuboMatrix;
    use quboflow_core::messages::ProgressEvent;
    use quboflow_core::types::Parameters;
    use serde_json::json;

    use super::*;

    /// Returns the row count of each unit it sees; fails on the `fail_on`-th call.
    struct RowCounter {
        signature: EntryPointSignature,
        calls: AtomicUsize,
        fail_on: Option<usize>,
    }

    impl RowCounter {
        fn new(fail_on: Option<usize>) -> Self {
            Self {
                signature: EntryPointSignature {
                    parameters: vec![ParameterSpec::required("qubo_matrix")],
                },
                calls: AtomicUsize::new(0),
                fail_on,
            }
        }
    }

    #[async_trait]
    impl SolverPlugin for RowCounter {
        fn signature(&self) -> &EntryPointSignature {
            &self.signature
        }

        async fn invoke(
            &self,
            dataset: &QuboMatrix,
            _arguments: &BoundArguments,
            progress: &ProgressFn<'_>,
        ) -> Result<SolverValue, CoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(call) {
                return Err(CoreError::Execution("ValueError: bad batch".into()));
            }
            progress(ProgressEvent {
                iteration: call as i64,
                cost: 0.0,
            });
            Ok(SolverValue::from(json!([dataset.rows()])))
        }
    }

    fn matrix(rows: usize) -> QuboMatrix {
        QuboMatrix::zeros(rows, 2).unwrap()
    }

    fn arguments(plugin: &RowCounter) -> BoundArguments {
        bind(plugin.signature(), &Parameters::new()).unwrap()
    }

    #[tokio::test]
    async fn whole_dataset_is_one_call() {
        let plugin = RowCounter::new(None);
        let args = arguments(&plugin);
        let out = execute(&plugin, &Dataset::whole(matrix(3)), &args, &|_: ProgressEvent| {})
            .await
            .unwrap();
        assert_eq!(out, ExecutionOutput::Whole(SolverValue::from(json!([3]))));
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batches_run_in_row_order() {
        let plugin = RowCounter::new(None);
        let seen = std::sync::Mutex::new(Vec::new());
        let out = execute(
            &plugin,
            &Dataset::batched(matrix(5), 2),
            &arguments(&plugin),
            &|p: ProgressEvent| seen.lock().unwrap().push(p.iteration),
        )
        .await
        .unwrap();

        let ExecutionOutput::Batches(results) = out else {
            panic!("expected batches");
        };
        assert_eq!(
            results,
            vec![
                SolverValue::from(json!([2])),
                SolverValue::from(json!([2])),
                SolverValue::from(json!([1])),
            ]
        );
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn failing_batch_stops_execution() {
        let plugin = RowCounter::new(Some(1));
        let args = arguments(&plugin);
        let dataset = Dataset::batched(matrix(6), 2);
        let err = execute(&plugin, &dataset, &args, &|_: ProgressEvent| {})
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::Execution(_));
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 2);
    }
}
