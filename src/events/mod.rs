//! Repository mutation events: per-transaction buffering and save dispatch.

mod changelog;
mod dispatch;

pub use changelog::{ChangeLog, EventKind, MutationEvent, path_is_within};
pub use dispatch::{SaveDispatcher, SaveEventListener};
