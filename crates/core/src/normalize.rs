//! Result normalization.
//!
//! Solver results arrive from the plugin host in a tagged wire form: plain
//! JSON for values JSON can already express, and `{"$type": ...}` objects for
//! everything else (tuples, n-dimensional arrays, numeric scalar wrappers,
//! device tensors, mappings with non-string keys, non-finite floats and
//! opaque objects). [`SolverValue::from_wire`] decodes that form;
//! [`normalize`] flattens a decoded value into plain JSON.
//!
//! Normalization is idempotent: a normalized value re-read with
//! `SolverValue::from` (which never interprets tags) normalizes to itself.

use serde_json::{Map, Number, Value};

use crate::error::CoreError;

/// Key marking a tagged wire value.
pub const TYPE_TAG: &str = "$type";

// ---------------------------------------------------------------------------
// Decoded value
// ---------------------------------------------------------------------------

/// A solver result as produced by the plugin host.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverValue {
    Null,
    Bool(bool),
    Number(Number),
    /// A float JSON cannot carry (`nan`, `inf`, `-inf`).
    NonFinite(String),
    String(String),
    List(Vec<SolverValue>),
    Tuple(Vec<SolverValue>),
    Map(Vec<(String, SolverValue)>),
    Array(NdArray),
    /// Zero-dimensional numeric wrapper, e.g. `numpy.float64`.
    Scalar { dtype: String, value: Box<SolverValue> },
    /// Array resident on a compute device.
    Tensor { device: String, array: NdArray },
    /// Anything the host could not describe structurally.
    Opaque { type_name: String, repr: String },
}

/// Flat row-major array data plus its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub dtype: String,
    pub shape: Vec<usize>,
    pub data: Vec<SolverValue>,
}

impl From<Value> for SolverValue {
    /// Plain conversion: objects become maps, `$type` keys included.
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

impl SolverValue {
    /// Decode the host's tagged wire form.
    pub fn from_wire(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(Self::from_wire)
                .collect::<Result<_, _>>()
                .map(Self::List),
            Value::Object(mut map) => match map.remove(TYPE_TAG) {
                None => map
                    .into_iter()
                    .map(|(k, v)| Ok((k, Self::from_wire(v)?)))
                    .collect::<Result<_, CoreError>>()
                    .map(Self::Map),
                Some(Value::String(tag)) => Self::decode_tagged(&tag, map),
                Some(other) => Err(wire_error(format!("`{TYPE_TAG}` must be a string, got {other}"))),
            },
            other => Ok(Self::from(other)),
        }
    }

    fn decode_tagged(tag: &str, mut fields: Map<String, Value>) -> Result<Self, CoreError> {
        let mut take = |name: &str| {
            fields
                .remove(name)
                .ok_or_else(|| wire_error(format!("`{tag}` value is missing `{name}`")))
        };

        match tag {
            "tuple" => match take("items")? {
                Value::Array(items) => items
                    .into_iter()
                    .map(Self::from_wire)
                    .collect::<Result<_, _>>()
                    .map(Self::Tuple),
                _ => Err(wire_error("tuple `items` must be an array")),
            },
            "ndarray" => {
                let dtype = take("dtype")?;
                let shape = take("shape")?;
                let data = take("data")?;
                NdArray::decode(dtype, shape, data).map(Self::Array)
            }
            "scalar" => {
                let dtype = as_string(take("dtype")?, "scalar `dtype`")?;
                let value = Self::from_wire(take("value")?)?;
                Ok(Self::Scalar {
                    dtype,
                    value: Box::new(value),
                })
            }
            "tensor" => {
                let device = as_string(take("device")?, "tensor `device`")?;
                match Self::from_wire(take("array")?)? {
                    Self::Array(array) => Ok(Self::Tensor { device, array }),
                    _ => Err(wire_error("tensor `array` must be an ndarray")),
                }
            }
            "map" => match take("entries")? {
                Value::Array(entries) => entries
                    .into_iter()
                    .map(decode_entry)
                    .collect::<Result<_, _>>()
                    .map(Self::Map),
                _ => Err(wire_error("map `entries` must be an array")),
            },
            "float" => Ok(Self::NonFinite(as_string(take("value")?, "float `value`")?)),
            "opaque" => Ok(Self::Opaque {
                type_name: as_string(take("type")?, "opaque `type`")?,
                repr: take("repr")
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_owned))
                    .unwrap_or_default(),
            }),
            other => Err(wire_error(format!("unknown value type '{other}'"))),
        }
    }
}

impl NdArray {
    fn decode(dtype: Value, shape: Value, data: Value) -> Result<Self, CoreError> {
        let dtype = as_string(dtype, "ndarray `dtype`")?;
        let shape = match shape {
            Value::Array(dims) => dims
                .iter()
                .map(|d| {
                    d.as_u64()
                        .map(|d| d as usize)
                        .ok_or_else(|| wire_error(format!("invalid dimension {d}")))
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(wire_error("ndarray `shape` must be an array")),
        };
        let data = match data {
            Value::Array(items) => items
                .into_iter()
                .map(SolverValue::from_wire)
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(wire_error("ndarray `data` must be a flat array")),
        };
        Ok(Self { dtype, shape, data })
    }
}

fn decode_entry(entry: Value) -> Result<(String, SolverValue), CoreError> {
    let Value::Array(mut pair) = entry else {
        return Err(wire_error("map entries must be [key, value] pairs"));
    };
    if pair.len() != 2 {
        return Err(wire_error("map entries must be [key, value] pairs"));
    }
    let value = SolverValue::from_wire(pair.remove(1))?;
    let key = match pair.remove(0) {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => (if b { "True" } else { "False" }).to_string(),
        Value::Null => "None".to_string(),
        other => return Err(wire_error(format!("unsupported map key {other}"))),
    };
    Ok((key, value))
}

fn as_string(value: Value, what: &str) -> Result<String, CoreError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(wire_error(format!("{what} must be a string, got {other}"))),
    }
}

fn wire_error(msg: impl std::fmt::Display) -> CoreError {
    CoreError::Serialization(format!("malformed solver result: {msg}"))
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Convert a decoded value into JSON-safe primitives.
pub fn normalize(value: &SolverValue) -> Result<Value, CoreError> {
    match value {
        SolverValue::Null => Ok(Value::Null),
        SolverValue::Bool(b) => Ok(Value::Bool(*b)),
        SolverValue::Number(n) => Ok(Value::Number(n.clone())),
        SolverValue::String(s) => Ok(Value::String(s.clone())),
        SolverValue::NonFinite(repr) => Err(CoreError::Serialization(format!(
            "non-finite float '{repr}' has no JSON representation"
        ))),
        SolverValue::List(items) | SolverValue::Tuple(items) => {
            items.iter().map(normalize).collect::<Result<_, _>>().map(Value::Array)
        }
        SolverValue::Map(entries) => {
            let mut out = Map::with_capacity(entries.len());
            for (k, v) in entries {
                out.insert(k.clone(), normalize(v)?);
            }
            Ok(Value::Object(out))
        }
        SolverValue::Array(array) | SolverValue::Tensor { array, .. } => normalize_array(array),
        SolverValue::Scalar { dtype, value } => {
            reject_complex(dtype)?;
            normalize_scalar(dtype, value)
        }
        SolverValue::Opaque { type_name, repr } => Err(CoreError::Serialization(format!(
            "value of type '{type_name}' is not JSON-serializable ({repr})"
        ))),
    }
}

/// Decode and normalize in one step.
pub fn normalize_wire(value: Value) -> Result<Value, CoreError> {
    normalize(&SolverValue::from_wire(value)?)
}

fn normalize_array(array: &NdArray) -> Result<Value, CoreError> {
    reject_complex(&array.dtype)?;
    let expected = array
        .shape
        .iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(*d))
        .ok_or_else(|| CoreError::Serialization("array shape overflows".into()))?;
    if expected != array.data.len() {
        return Err(CoreError::Serialization(format!(
            "array of shape {:?} needs {expected} elements, got {}",
            array.shape,
            array.data.len()
        )));
    }
    let flat = array
        .data
        .iter()
        .map(|v| normalize_scalar(&array.dtype, v))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(nest(&array.shape, &flat))
}

/// Rebuild nested sequences from row-major `flat` data.
fn nest(shape: &[usize], flat: &[Value]) -> Value {
    match shape {
        // Zero-dimensional: the bare element.
        [] => flat.first().cloned().unwrap_or(Value::Null),
        [_] => Value::Array(flat.to_vec()),
        [n, inner @ ..] => {
            let stride: usize = inner.iter().product();
            Value::Array(
                (0..*n)
                    .map(|i| nest(inner, &flat[i * stride..(i + 1) * stride]))
                    .collect(),
            )
        }
    }
}

fn normalize_scalar(dtype: &str, value: &SolverValue) -> Result<Value, CoreError> {
    let out = normalize(value)?;
    // numpy.bool_ arrives as 0/1 from some writers.
    if dtype == "bool" {
        if let Some(n) = out.as_i64() {
            return Ok(Value::Bool(n != 0));
        }
    }
    Ok(out)
}

fn reject_complex(dtype: &str) -> Result<(), CoreError> {
    if dtype.starts_with("complex") {
        return Err(CoreError::Serialization(format!(
            "complex dtype '{dtype}' has no JSON representation"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn ndarray(dtype: &str, shape: Value, data: Value) -> Value {
        json!({"$type": "ndarray", "dtype": dtype, "shape": shape, "data": data})
    }

    #[test]
    fn plain_json_passes_through() {
        let v = json!({"a": [1, 2.5, "x", null, true], "b": {"c": []}});
        assert_eq!(normalize_wire(v.clone()).unwrap(), v);
    }

    #[test]
    fn arrays_follow_their_shape() {
        let v = ndarray("int64", json!([2, 3]), json!([1, 2, 3, 4, 5, 6]));
        assert_eq!(normalize_wire(v).unwrap(), json!([[1, 2, 3], [4, 5, 6]]));

        let v = ndarray("float64", json!([2, 1, 2]), json!([0.0, 1.0, 2.0, 3.0]));
        assert_eq!(normalize_wire(v).unwrap(), json!([[[0.0, 1.0]], [[2.0, 3.0]]]));
    }

    #[test]
    fn zero_dimensional_array_collapses() {
        let v = ndarray("float64", json!([]), json!([0.25]));
        assert_eq!(normalize_wire(v).unwrap(), json!(0.25));
    }

    #[test]
    fn empty_dimensions() {
        let v = ndarray("float64", json!([0, 3]), json!([]));
        assert_eq!(normalize_wire(v).unwrap(), json!([]));
        let v = ndarray("float64", json!([2, 0]), json!([]));
        assert_eq!(normalize_wire(v).unwrap(), json!([[], []]));
    }

    #[test]
    fn scalar_wrappers_collapse() {
        let v = json!({"$type": "scalar", "dtype": "float32", "value": 1.5});
        assert_eq!(normalize_wire(v).unwrap(), json!(1.5));
        let v = json!({"$type": "scalar", "dtype": "int64", "value": 7});
        assert_eq!(normalize_wire(v).unwrap(), json!(7));
        let v = json!({"$type": "scalar", "dtype": "bool", "value": 1});
        assert_eq!(normalize_wire(v).unwrap(), json!(true));
    }

    #[test]
    fn tensors_materialize_as_arrays() {
        let v = json!({
            "$type": "tensor",
            "device": "cuda:0",
            "array": ndarray("float32", json!([2]), json!([0.5, 1.5])),
        });
        assert_eq!(normalize_wire(v).unwrap(), json!([0.5, 1.5]));
    }

    #[test]
    fn tuples_and_maps() {
        let v = json!({"$type": "tuple", "items": [
            ndarray("int64", json!([2]), json!([0, 1])),
            {"$type": "scalar", "dtype": "float64", "value": 0.0},
        ]});
        assert_eq!(normalize_wire(v).unwrap(), json!([[0, 1], 0.0]));

        let v = json!({"$type": "map", "entries": [[1, "one"], ["two", 2]]});
        assert_eq!(normalize_wire(v).unwrap(), json!({"1": "one", "two": 2}));
    }

    #[test]
    fn unrepresentable_values_fail() {
        let nan = json!({"$type": "float", "value": "nan"});
        assert_matches!(normalize_wire(nan), Err(CoreError::Serialization(_)));

        let opaque = json!({"$type": "opaque", "type": "Widget", "repr": "<Widget>"});
        assert_matches!(
            normalize_wire(opaque),
            Err(CoreError::Serialization(msg)) if msg.contains("Widget")
        );

        let complex = json!({"$type": "scalar", "dtype": "complex128", "value": 0});
        assert_matches!(normalize_wire(complex), Err(CoreError::Serialization(_)));

        let mismatch = ndarray("float64", json!([2, 2]), json!([1.0]));
        assert_matches!(normalize_wire(mismatch), Err(CoreError::Serialization(_)));

        let nan_in_array = ndarray(
            "float64",
            json!([2]),
            json!([1.0, {"$type": "float", "value": "inf"}]),
        );
        assert_matches!(normalize_wire(nan_in_array), Err(CoreError::Serialization(_)));
    }

    #[test]
    fn malformed_tags_fail() {
        assert_matches!(
            normalize_wire(json!({"$type": "mystery"})),
            Err(CoreError::Serialization(_))
        );
        assert_matches!(
            normalize_wire(json!({"$type": "ndarray", "dtype": "int64"})),
            Err(CoreError::Serialization(_))
        );
        assert_matches!(normalize_wire(json!({"$type": 3})), Err(CoreError::Serialization(_)));
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = vec![
            json!(null),
            json!([1, [2, [3]]]),
            ndarray("float64", json!([]), json!([3.0])),
            ndarray("int8", json!([1, 2, 2]), json!([1, 2, 3, 4])),
            json!({"$type": "tuple", "items": [[0, 1], 0.0, []]}),
            json!({"$type": "map", "entries": [["$type", "kept as data"]]}),
            json!({"nested": {"$type": "scalar", "dtype": "float64", "value": 2.0}}),
        ];
        for wire in samples {
            let once = normalize_wire(wire).unwrap();
            let twice = normalize(&SolverValue::from(once.clone())).unwrap();
            assert_eq!(once, twice);

            let text = serde_json::to_string(&once).unwrap();
            assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), once);
        }
    }
}
