//! Domain layer types: content nodes, identities, and repository contracts.

pub mod error;
pub mod node;
pub mod repository;
