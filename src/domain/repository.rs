use super::error::RepositoryError;
use super::node::{NodeKey, NodeRef};

/// Read access to a content repository, used by request-scoped resolution.
pub trait ContentRepository: Send + Sync {
    /// Look a node up by its key. `Ok(None)` when it no longer exists.
    fn node(&self, key: &NodeKey) -> Result<Option<NodeRef>, RepositoryError>;

    /// The workspace's global container, whose tiles every container sees.
    fn global_container(&self, workspace: &str) -> Result<Option<NodeRef>, RepositoryError>;
}
