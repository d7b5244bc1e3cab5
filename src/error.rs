use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecError>;

#[derive(Debug, Error)]
pub enum RecError {
    #[error("no interactions available, cannot build id mappings")]
    EmptyInput,

    #[error("invalid `{param}` = {value}: {constraint}")]
    InvalidConfig {
        param: String,
        value: String,
        constraint: String,
    },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    #[error("factorization failed: {0}")]
    Factorization(String),

    #[error("failed to create thread pool: {0}")]
    ThreadPool(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RecError {
    pub(crate) fn invalid_config(
        param: &str,
        value: impl ToString,
        constraint: &str,
    ) -> Self {
        RecError::InvalidConfig {
            param: param.to_string(),
            value: value.to_string(),
            constraint: constraint.to_string(),
        }
    }
}

#[cfg(feature = "python")]
impl From<RecError> for pyo3::PyErr {
    fn from(err: RecError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
        match err {
            RecError::EmptyInput
            | RecError::InvalidConfig { .. }
            | RecError::DimensionMismatch { .. } => PyValueError::new_err(err.to_string()),
            RecError::Io(_) | RecError::Csv(_) | RecError::Json(_) => {
                PyIOError::new_err(err.to_string())
            }
            _ => PyRuntimeError::new_err(err.to_string()),
        }
    }
}
