use thiserror::Error;

/// Convenience result type for crate operations.
pub type EtlResult<T> = Result<T, EtlError>;

/// Error type returned by ingestion, compilation and run-level operations.
///
/// Every variant here stops the run. Problems that only affect one subject are reported as
/// [`MappingError`] and turned into diagnostics by the evaluator.
#[derive(Debug, Error)]
pub enum EtlError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "excel")]
    /// Excel ingestion error (feature-gated behind `excel`).
    #[error("excel error: {0}")]
    Excel(#[from] calamine::Error),

    /// CSV ingestion error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (manifest, schema or descriptor) parse error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A sheet does not contain the subject identifier column.
    #[error("sheet '{sheet}' has no identifier column '{identifier}'")]
    MissingIdentifier { sheet: String, identifier: String },

    /// Bad manifest, unknown function, ambiguous template indexing and similar setup problems.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A mapping template line could not be parsed or compiled.
    #[error("template error at line {line}: {message}")]
    Template { line: usize, message: String },

    /// The schema document could not be introspected.
    #[error("schema error: {message}")]
    Schema { message: String },

    /// The evaluator left frames on the index stack after finishing a subject.
    #[error("index stack not empty after subject '{subject}' (depth {depth})")]
    IndexStackNotEmpty { subject: String, depth: usize },
}

impl EtlError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }
}

/// A recoverable failure raised by a mapping function for the subject being evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct MappingError {
    pub message: String,
}

impl MappingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
