/// Every failure a job can end in.
///
/// Each message is prefixed with its class name so that the text published
/// in a failure event identifies the stage that failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("ValidationError: {0}")]
    Validation(String),

    #[error("FetchError: {0}")]
    Fetch(String),

    #[error("ProvisionError: {0}")]
    Provision(String),

    #[error("PluginContractError: {0}")]
    PluginContract(String),

    #[error("ParameterBindingError: missing required parameter '{parameter}'")]
    ParameterBinding { parameter: String },

    #[error("DatasetFormatError: {0}")]
    DatasetFormat(String),

    #[error("ExecutionError: {0}")]
    Execution(String),

    #[error("SerializationError: {0}")]
    Serialization(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable class name of the error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Fetch(_) => "FETCH_ERROR",
            Self::Provision(_) => "PROVISION_ERROR",
            Self::PluginContract(_) => "PLUGIN_CONTRACT_ERROR",
            Self::ParameterBinding { .. } => "PARAMETER_BINDING_ERROR",
            Self::DatasetFormat(_) => "DATASET_FORMAT_ERROR",
            Self::Execution(_) => "EXECUTION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<validator::ValidationErrors> for CoreError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_class_name() {
        let err = CoreError::PluginContract("no `solve` function".into());
        assert_eq!(err.to_string(), "PluginContractError: no `solve` function");

        let err = CoreError::ParameterBinding {
            parameter: "max_iters".into(),
        };
        assert_eq!(
            err.to_string(),
            "ParameterBindingError: missing required parameter 'max_iters'"
        );
    }

    #[test]
    fn codes_are_distinct_per_class() {
        let all = [
            CoreError::Validation(String::new()),
            CoreError::Fetch(String::new()),
            CoreError::Provision(String::new()),
            CoreError::PluginContract(String::new()),
            CoreError::ParameterBinding {
                parameter: String::new(),
            },
            CoreError::DatasetFormat(String::new()),
            CoreError::Execution(String::new()),
            CoreError::Serialization(String::new()),
        ];
        let mut codes: Vec<_> = all.iter().map(CoreError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }
}
