//! Signature-based parameter binding.
//!
//! A loaded plugin reports the declared parameters of its entry point as an
//! [`EntryPointSignature`]. [`bind`] resolves every declared parameter before
//! anything is invoked:
//!
//! 1. the first positional parameter receives the dataset;
//! 2. a caller-supplied value wins when the name is present;
//! 3. otherwise the entry point's declared default applies;
//! 4. otherwise binding fails with [`CoreError::ParameterBinding`].
//!
//! Values are passed through untouched: type mismatches surface when the
//! entry point runs, not here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::types::Parameters;

/// Name every solver plugin must export.
pub const ENTRY_POINT: &str = "solve";

/// Parameter the host fills with a progress-reporting callable.
pub const PROGRESS_CALLBACK_PARAMETER: &str = "progress_callback";

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// Positional-only (cannot be passed by name).
    PositionalOnly,
    /// Positional or keyword.
    Positional,
    /// Keyword-only.
    Keyword,
    /// `*args`
    VarPositional,
    /// `**kwargs`
    VarKeyword,
}

/// One declared parameter of an entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    #[serde(default)]
    pub has_default: bool,
    /// Declared default; meaningful only when `has_default` is set.
    #[serde(default)]
    pub default: Value,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Positional,
            has_default: false,
            default: Value::Null,
        }
    }

    pub fn with_default(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Positional,
            has_default: true,
            default,
        }
    }

    pub fn kind(mut self, kind: ParameterKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Declared parameters of an entry point, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPointSignature {
    pub parameters: Vec<ParameterSpec>,
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// Where a bound value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingSource {
    Supplied,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundParameter {
    pub name: String,
    pub value: Value,
    pub source: BindingSource,
}

/// Result of a successful bind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundArguments {
    /// Name of the parameter that receives the dataset.
    pub dataset_parameter: String,
    /// Every named parameter, in declaration order.
    pub parameters: Vec<BoundParameter>,
    /// Supplied values routed into `**kwargs`.
    pub extra_keywords: Parameters,
    /// Whether the entry point declares [`PROGRESS_CALLBACK_PARAMETER`].
    pub wants_progress: bool,
    /// Supplied names that matched nothing and were dropped.
    pub ignored: Vec<String>,
}

impl BoundArguments {
    /// Keyword arguments to transmit to the entry point.
    ///
    /// Defaulted parameters are omitted: the entry point applies its own
    /// declared default, which is the value recorded in the binding.
    pub fn keyword_arguments(&self) -> Parameters {
        let mut out: Parameters = self
            .parameters
            .iter()
            .filter(|p| p.source == BindingSource::Supplied)
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect();
        out.extend(self.extra_keywords.clone());
        out
    }
}

/// Bind caller-supplied `supplied` values against `signature`.
pub fn bind(
    signature: &EntryPointSignature,
    supplied: &Parameters,
) -> Result<BoundArguments, CoreError> {
    let mut declared = signature.parameters.iter();

    let dataset = declared
        .next()
        .filter(|p| matches!(p.kind, ParameterKind::Positional | ParameterKind::PositionalOnly))
        .ok_or_else(|| {
            CoreError::PluginContract(format!(
                "`{ENTRY_POINT}` must accept the dataset as its first positional parameter"
            ))
        })?;

    let mut parameters = Vec::new();
    let mut accepts_extra = false;
    let mut wants_progress = false;

    for spec in declared {
        match spec.kind {
            ParameterKind::VarPositional => continue,
            ParameterKind::VarKeyword => {
                accepts_extra = true;
                continue;
            }
            ParameterKind::PositionalOnly => {
                return Err(CoreError::PluginContract(format!(
                    "parameter '{}' of `{ENTRY_POINT}` is positional-only; \
                     only the dataset may be positional-only",
                    spec.name
                )));
            }
            ParameterKind::Positional | ParameterKind::Keyword => {}
        }

        if spec.name == PROGRESS_CALLBACK_PARAMETER {
            wants_progress = true;
            continue;
        }

        let bound = if let Some(value) = supplied.get(&spec.name) {
            BoundParameter {
                name: spec.name.clone(),
                value: value.clone(),
                source: BindingSource::Supplied,
            }
        } else if spec.has_default {
            BoundParameter {
                name: spec.name.clone(),
                value: spec.default.clone(),
                source: BindingSource::Default,
            }
        } else {
            return Err(CoreError::ParameterBinding {
                parameter: spec.name.clone(),
            });
        };
        parameters.push(bound);
    }

    let mut extra_keywords = Parameters::new();
    let mut ignored = Vec::new();
    for (name, value) in supplied {
        let is_declared = signature.parameters.iter().any(|p| &p.name == name);
        if is_declared {
            continue;
        }
        if accepts_extra {
            extra_keywords.insert(name.clone(), value.clone());
        } else {
            ignored.push(name.clone());
        }
    }

    Ok(BoundArguments {
        dataset_parameter: dataset.name.clone(),
        parameters,
        extra_keywords,
        wants_progress,
        ignored,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
