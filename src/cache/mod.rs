//! Stencil artifact cache.
//!
//! Derived artifacts (rendered fragments, parsed templates, resolved tile
//! maps) are cached per producer type and source node, and dropped when a
//! save touches the node or anything it inherits from:
//!
//! - [`ArtifactCache`] stores artifacts and derives them on a miss
//! - [`InvalidationListener`] maps saved nodes to containers and walks the
//!   template → container reference graph
//!
//! ## Configuration
//!
//! Node recognition is controlled via the `[cache]` table of `stencil.toml`:
//!
//! ```toml
//! [cache]
//! container_types = ["page", "template"]
//! content_child_name = "jcr:content"
//! # ... see config.rs for all options
//! ```

mod config;
mod error;
mod keys;
mod listener;
mod store;

pub use config::CacheConfig;
pub use error::{CacheError, DeriveError};
pub use keys::CacheKey;
pub use listener::{InvalidationListener, InvalidationReport};
pub use store::{ArtifactCache, Derive, Invalidate, Producer};
