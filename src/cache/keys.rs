//! Cache key definitions.
//!
//! Keys are structured rather than joined strings, so an identity that happens
//! to contain a separator can never match a different node's entry.

use std::fmt;

use crate::domain::node::{NodeIdentity, NodeKey};

/// Key of one derived artifact: which producer derived it, from which node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Declared type name of the producer, e.g. `page-view`.
    pub producer: String,
    /// Workspace and identity of the node the producer is bound to.
    pub node: NodeKey,
}

impl CacheKey {
    pub fn new(producer: impl Into<String>, node: NodeKey) -> Self {
        Self {
            producer: producer.into(),
            node,
        }
    }

    /// True when this key belongs to `workspace`/`identity`, whatever the
    /// producer type.
    pub fn matches_node(&self, workspace: &str, identity: &NodeIdentity) -> bool {
        self.node.workspace == workspace && &self.node.identity == identity
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.producer, self.node)
    }
}
