use thiserror::Error;

use crate::domain::error::RepositoryError;

/// Boxed failure returned by a producer's derivation.
pub type DeriveError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The producer handed to the cache cannot derive artifacts. This is a
    /// caller bug and is never recovered from.
    #[error("producer `{producer}` does not provide a derivation capability")]
    MissingCapability { producer: String },
    #[error("failed to derive artifact for `{key}`: {source}")]
    Derivation {
        key: String,
        #[source]
        source: DeriveError,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl CacheError {
    pub fn missing_capability(producer: impl Into<String>) -> Self {
        Self::MissingCapability {
            producer: producer.into(),
        }
    }
}
