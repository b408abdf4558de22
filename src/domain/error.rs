use thiserror::Error;

/// Failures surfaced by the content repository collaborator.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("node `{path}` not found in workspace `{workspace}`")]
    NodeNotFound { workspace: String, path: String },
    #[error("node `{node}` has been removed")]
    NodeRemoved { node: String },
    #[error("property `{property}` is missing on `{node}`")]
    PropertyMissing { node: String, property: String },
    #[error("repository backend failure: {message}")]
    Backend { message: String },
}

impl RepositoryError {
    pub fn not_found(workspace: impl Into<String>, path: impl Into<String>) -> Self {
        Self::NodeNotFound {
            workspace: workspace.into(),
            path: path.into(),
        }
    }

    pub fn removed(node: impl Into<String>) -> Self {
        Self::NodeRemoved { node: node.into() }
    }

    pub fn property_missing(node: impl Into<String>, property: impl Into<String>) -> Self {
        Self::PropertyMissing {
            node: node.into(),
            property: property.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}
