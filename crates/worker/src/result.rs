//! Shaping raw solver output into job results.
//!
//! Solvers conventionally return a tuple whose positions carry fixed meaning.
//! [`shape_output`] names those positions for job results; direct execution
//! uses [`flatten_output`], which only normalizes.

use quboflow_core::error::CoreError;
use quboflow_core::normalize::{normalize, SolverValue};
use quboflow_pipeline::ExecutionOutput;
use serde_json::{Map, Value};

/// Field names given to the items of a tuple result, in order.
pub const RESULT_FIELDS: [&str; 6] = [
    "best_bitstring",
    "best_cost",
    "cost_values",
    "time_per_iteration",
    "progress_rl_costs",
    "progress_opt_costs",
];

/// Key holding tuple items beyond [`RESULT_FIELDS`].
pub const EXTRA_OUTPUTS: &str = "extra_outputs";

/// Key wrapping results that are neither a tuple nor a mapping.
pub const SOLVER_OUTPUT: &str = "solver_output";

/// Shape one solver return value into a result object.
pub fn shape_result(value: &SolverValue) -> Result<Value, CoreError> {
    match value {
        SolverValue::Tuple(items) => {
            let mut out = Map::new();
            for (name, item) in RESULT_FIELDS.iter().zip(items) {
                out.insert((*name).to_string(), normalize(item)?);
            }
            if items.len() > RESULT_FIELDS.len() {
                let extra = items[RESULT_FIELDS.len()..]
                    .iter()
                    .map(normalize)
                    .collect::<Result<Vec<_>, _>>()?;
                out.insert(EXTRA_OUTPUTS.to_string(), Value::Array(extra));
            }
            Ok(Value::Object(out))
        }
        SolverValue::Map(_) => normalize(value),
        other => Ok(wrap(normalize(other)?)),
    }
}

/// Shape a whole execution. A single batch shapes exactly like an unbatched run.
///
/// Several batches of sequences are concatenated; any other batch results are
/// kept per batch, each shaped like a single result.
pub fn shape_output(output: &ExecutionOutput) -> Result<Value, CoreError> {
    match output {
        ExecutionOutput::Whole(value) => shape_result(value),
        ExecutionOutput::Batches(results) if results.len() == 1 => shape_result(&results[0]),
        ExecutionOutput::Batches(results) if results.iter().all(is_sequence) => {
            Ok(wrap(combine_batches(results)?))
        }
        ExecutionOutput::Batches(results) => {
            let shaped = results.iter().map(shape_result).collect::<Result<Vec<_>, _>>()?;
            Ok(wrap(Value::Array(shaped)))
        }
    }
}

/// Normalize an execution without naming tuple positions.
pub fn flatten_output(output: &ExecutionOutput) -> Result<Value, CoreError> {
    match output {
        ExecutionOutput::Whole(value) => normalize(value),
        ExecutionOutput::Batches(results) => combine_batches(results),
    }
}

/// Combine per-batch results: concatenated when every batch produced a list
/// or an array of at least one dimension, otherwise the sequence of results
/// itself. Tuples are never concatenated.
pub fn combine_batches(results: &[SolverValue]) -> Result<Value, CoreError> {
    let concatenate = results.len() > 1 && results.iter().all(is_sequence);
    let mut normalized = results.iter().map(normalize).collect::<Result<Vec<_>, _>>()?;
    if normalized.len() == 1 {
        return Ok(normalized.pop().unwrap_or(Value::Null));
    }
    if concatenate {
        let concatenated = normalized
            .into_iter()
            .flat_map(|v| match v {
                Value::Array(items) => items,
                other => vec![other],
            })
            .collect();
        return Ok(Value::Array(concatenated));
    }
    Ok(Value::Array(normalized))
}

fn is_sequence(value: &SolverValue) -> bool {
    match value {
        SolverValue::List(_) => true,
        SolverValue::Array(array) | SolverValue::Tensor { array, .. } => !array.shape.is_empty(),
        _ => false,
    }
}

fn wrap(value: Value) -> Value {
    let mut out = Map::new();
    out.insert(SOLVER_OUTPUT.to_string(), value);
    Value::Object(out)
}
