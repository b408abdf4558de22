//! Save notification fan-out.
//!
//! The repository integration layer commits a unit of work through
//! [`SaveDispatcher::commit`]; every registered listener then sees the batch
//! of events attributed to the saved subtree exactly once.

use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::util::lock::{rw_read, rw_write};

use super::changelog::{ChangeLog, MutationEvent};

const SOURCE: &str = "events::dispatch";

/// Receives the events of one committed unit of work.
///
/// Implementations must not fail the commit: errors are handled and logged
/// inside the listener.
pub trait SaveEventListener: Send + Sync {
    fn on_save(&self, events: &[MutationEvent]);
}

/// Registration point for save listeners.
#[derive(Default)]
pub struct SaveDispatcher {
    listeners: RwLock<Vec<Arc<dyn SaveEventListener>>>,
}

impl SaveDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn SaveEventListener>) {
        rw_write(&self.listeners, SOURCE, "register").push(listener);
        debug!("Save listener registered");
    }

    pub fn listener_count(&self) -> usize {
        rw_read(&self.listeners, SOURCE, "listener_count").len()
    }

    /// Extract the events under `path` from `log` and dispatch them.
    ///
    /// Returns the number of events dispatched.
    pub fn commit(&self, log: &mut ChangeLog, path: &str) -> usize {
        let events = log.remove_and_get_affected_events(path);
        self.dispatch(&events);
        events.len()
    }

    /// Hand one batch to every listener. Empty batches are not dispatched.
    pub fn dispatch(&self, events: &[MutationEvent]) {
        if events.is_empty() {
            return;
        }

        // Listeners run without the registry lock so they may register others.
        let listeners = rw_read(&self.listeners, SOURCE, "dispatch").clone();
        info!(
            event_count = events.len(),
            listener_count = listeners.len(),
            "Dispatching save events"
        );

        for listener in listeners {
            listener.on_save(events);
        }
    }
}
