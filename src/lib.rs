//! Stencil: a derived-markup cache for template-composed content.
//!
//! Pages and templates are containers of tiles; a page inherits unset tiles
//! from its template chain. Artifacts derived from those nodes are cached in
//! an [`cache::ArtifactCache`] and dropped by an
//! [`cache::InvalidationListener`] when a repository save touches a node or
//! any template it is built from.

pub mod cache;
pub mod config;
pub mod domain;
pub mod events;
pub mod infra;
pub mod render;
pub(crate) mod util;
