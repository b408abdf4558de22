//! Content node abstraction consumed from the repository.
//!
//! The repository owns storage, transactions, and the reference index. The
//! cache only ever sees nodes through [`RepositoryNode`], and reaches the
//! container capability through [`RepositoryNode::as_container`] instead of
//! inspecting concrete types.

use std::fmt;
use std::sync::Arc;

use super::error::RepositoryError;

/// Shared handle to a live repository node.
pub type NodeRef = Arc<dyn RepositoryNode>;

/// A node as exposed by the content repository.
///
/// Every accessor reads live state. Once a node has been removed, path and
/// property reads fail with [`RepositoryError::NodeRemoved`].
pub trait RepositoryNode: Send + Sync + fmt::Debug {
    /// Name of the workspace the node belongs to.
    fn workspace(&self) -> &str;

    /// Stable opaque identifier. `None` when the node is not referenceable.
    fn identifier(&self) -> Result<Option<String>, RepositoryError>;

    /// Current hierarchical path.
    fn path(&self) -> Result<String, RepositoryError>;

    /// Last path segment.
    fn name(&self) -> Result<String, RepositoryError>;

    fn parent(&self) -> Result<Option<NodeRef>, RepositoryError>;

    /// Site-level type tag (`page`, `template`, ...), if the node carries one.
    fn node_type(&self) -> Result<Option<String>, RepositoryError>;

    /// Value of a string property, `None` when unset.
    fn property(&self, _name: &str) -> Result<Option<String>, RepositoryError> {
        Ok(None)
    }

    /// Reverse reference lookup: every node holding `property` pointing at
    /// this node.
    fn references(&self, property: &str) -> Result<Vec<NodeRef>, RepositoryError>;

    /// Container capability, when the node aggregates tiles.
    fn as_container(&self) -> Option<&dyn TileContainer> {
        None
    }
}

/// Role a container plays in fragment resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Page,
    Template,
    Global,
}

/// A content fragment slot held by a container.
#[derive(Debug, Clone)]
pub struct Tile {
    /// Tile id used by markup to address the fragment. Tiles without an id
    /// cannot be addressed and are skipped during resolution.
    pub id: Option<String>,
    pub node: NodeRef,
}

/// Capability of nodes that hold tiles and may delegate to a template.
pub trait TileContainer {
    fn kind(&self) -> ContainerKind;

    /// Template this container inherits unset tiles from.
    fn template(&self) -> Result<Option<NodeRef>, RepositoryError>;

    /// Tiles defined directly on this container, in document order.
    fn tiles(&self) -> Result<Vec<Tile>, RepositoryError>;
}

/// Workspace-local identity of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeIdentity {
    Identifier(String),
    Path(String),
}

impl NodeIdentity {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Identifier(value) | Self::Path(value) => value,
        }
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository-wide identity of a node: workspace plus [`NodeIdentity`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub workspace: String,
    pub identity: NodeIdentity,
}

impl NodeKey {
    pub fn new(workspace: impl Into<String>, identity: NodeIdentity) -> Self {
        Self {
            workspace: workspace.into(),
            identity,
        }
    }

    /// Compute the key for `node`.
    ///
    /// The identifier always wins over the path so that two lookups of the
    /// same logical node hash identically.
    pub fn of(node: &dyn RepositoryNode) -> Result<Self, RepositoryError> {
        let identity = match node.identifier()? {
            Some(id) => NodeIdentity::Identifier(id),
            None => NodeIdentity::Path(node.path()?),
        };
        Ok(Self::new(node.workspace(), identity))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workspace, self.identity)
    }
}

/// Best-effort path for log output.
pub fn display_path(node: &dyn RepositoryNode) -> String {
    node.path().unwrap_or_else(|_| "(unknown)".to_string())
}
