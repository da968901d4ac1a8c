use quboflow_core::error::CoreError;

/// Failures while locating or retrieving an artifact.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage location '{0}'")]
    InvalidLocation(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("artifact is empty: {0}")]
    Empty(String),

    #[error("transport error fetching {location}: {message}")]
    Transport { location: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidLocation(_) => CoreError::Validation(err.to_string()),
            other => CoreError::Fetch(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn converts_into_core_taxonomy() {
        let err: CoreError = StorageError::NotFound("solvers/a.py".into()).into();
        assert_matches!(err, CoreError::Fetch(msg) if msg.contains("solvers/a.py"));

        let err: CoreError = StorageError::InvalidLocation("nobucket".into()).into();
        assert_matches!(err, CoreError::Validation(_));
    }
}
