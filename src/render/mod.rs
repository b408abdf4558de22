//! Request-time tile resolution.

pub mod context;
pub mod tags;

pub use context::{RenderContext, RenderError, TileMap};
pub use tags::{TileTagId, TileTagIds};
