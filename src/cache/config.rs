//! Invalidation configuration.
//!
//! Controls how the listener recognises cache-relevant nodes, via the
//! `[cache]` table of `stencil.toml`:
//!
//! ```toml
//! [cache]
//! container_types = ["page", "template"]
//! template_types = ["template"]
//! content_child_name = "jcr:content"
//! template_property = "site:template"
//! # max_walk_nodes = 10000
//! ```

use std::num::NonZeroUsize;

const DEFAULT_CONTAINER_TYPES: [&str; 2] = ["page", "template"];
const DEFAULT_TEMPLATE_TYPES: [&str; 1] = ["template"];
const DEFAULT_CONTENT_CHILD_NAME: &str = "jcr:content";
const DEFAULT_TEMPLATE_PROPERTY: &str = "site:template";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Node type tags treated as containers when the node does not expose the
    /// container capability itself.
    pub container_types: Vec<String>,
    /// Node type tags treated as templates.
    pub template_types: Vec<String>,
    /// Name of the child node holding a container's payload. Mutations of
    /// this child are attributed to its parent.
    pub content_child_name: String,
    /// Reference property through which containers point at their template.
    pub template_property: String,
    /// Upper bound on nodes invalidated by a single closure walk. Unbounded
    /// when unset.
    pub max_walk_nodes: Option<NonZeroUsize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            container_types: DEFAULT_CONTAINER_TYPES.map(String::from).to_vec(),
            template_types: DEFAULT_TEMPLATE_TYPES.map(String::from).to_vec(),
            content_child_name: DEFAULT_CONTENT_CHILD_NAME.to_string(),
            template_property: DEFAULT_TEMPLATE_PROPERTY.to_string(),
            max_walk_nodes: None,
        }
    }
}

impl CacheConfig {
    pub fn is_container_type(&self, node_type: &str) -> bool {
        self.container_types.iter().any(|t| t == node_type)
    }

    pub fn is_template_type(&self, node_type: &str) -> bool {
        self.template_types.iter().any(|t| t == node_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.is_container_type("page"));
        assert!(config.is_container_type("template"));
        assert!(!config.is_container_type("folder"));
        assert!(config.is_template_type("template"));
        assert!(!config.is_template_type("page"));
        assert_eq!(config.content_child_name, "jcr:content");
        assert_eq!(config.template_property, "site:template");
        assert!(config.max_walk_nodes.is_none());
    }
}
