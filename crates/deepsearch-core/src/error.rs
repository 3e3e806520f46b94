use std::path::PathBuf;

use thiserror::Error;

/// Core error type for DeepSearch.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Search or fetch transport failure. Recovered inside the evidence pipeline.
    #[error("provider error: {0}")]
    Provider(String),
    /// The oracle returned structured output that does not match the requested shape.
    #[error("schema violation in {schema}: {reason}")]
    SchemaViolation { schema: String, reason: String },
    /// The oracle could not be reached or refused the request.
    #[error("oracle error: {0}")]
    Oracle(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ResearchError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn schema_violation(schema: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            schema: schema.into(),
            reason: reason.into(),
        }
    }

    /// Whether the loop controller must abort when this error reaches it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ResearchError::Provider(_) | ResearchError::Cache(_))
    }
}

pub type Result<T, E = ResearchError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_and_cache_errors_are_recoverable() {
        assert!(!ResearchError::Provider("quota".into()).is_fatal());
        assert!(!ResearchError::Cache("down".into()).is_fatal());
        assert!(ResearchError::schema_violation("query_plan", "queries empty").is_fatal());
        assert!(ResearchError::Oracle("unreachable".into()).is_fatal());
    }

    #[test]
    fn schema_violation_names_schema() {
        let err = ResearchError::schema_violation("next_action", "unknown type `search`");
        assert_eq!(
            err.to_string(),
            "schema violation in next_action: unknown type `search`"
        );
    }
}
