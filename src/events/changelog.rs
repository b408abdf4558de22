//! Per-transaction buffer of repository mutation events.
//!
//! A save operates on a subtree, so the log must answer "which buffered
//! events fall under path P". Subjects can move between the moment an event
//! is recorded and the moment the log is queried; every event therefore keeps
//! a lazily refreshed copy of its subject's path.

use std::fmt;

use time::OffsetDateTime;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::domain::node::{NodeRef, display_path};

/// What happened to the subject node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    NodeAdded,
    NodeRemoved,
    NodeChanged,
    /// The subject was moved or renamed. Recording one marks every cached
    /// path in the log as possibly outdated.
    NodeMoved,
    PropertyChanged { name: String },
}

impl EventKind {
    fn relocates_nodes(&self) -> bool {
        matches!(self, Self::NodeMoved)
    }
}

/// Lazily refreshed path of an event's subject.
#[derive(Debug, Clone)]
struct PathCache {
    path: Option<String>,
    /// Move generation of the owning log when `path` was last read.
    generation: u64,
}

impl PathCache {
    fn capture(node: &NodeRef) -> Self {
        Self {
            path: node.path().ok(),
            generation: 0,
        }
    }

    /// Test whether the subject lies at or below `prefix`, re-reading the
    /// live path at most once.
    ///
    /// A cached path is trusted when no move has been logged since it was
    /// read. A mismatch always triggers one refresh, so a subject moved into
    /// `prefix` is still found. A subject that can no longer be read never
    /// matches a refresh.
    fn is_within(&mut self, node: &NodeRef, prefix: &str, generation: u64) -> bool {
        let stale = self.generation != generation;
        let cached_hit = self
            .path
            .as_deref()
            .is_some_and(|path| path_is_within(path, prefix));

        if cached_hit && !stale {
            return true;
        }

        match node.path() {
            Ok(current) => {
                let hit = path_is_within(&current, prefix);
                if self.path.as_deref() != Some(current.as_str()) {
                    trace!(
                        previous = ?self.path,
                        current = %current,
                        "Refreshed stale event path"
                    );
                }
                self.path = Some(current);
                self.generation = generation;
                hit
            }
            Err(err) => {
                trace!(error = %err, prefix, "Event subject unreadable during path refresh");
                false
            }
        }
    }
}

/// One recorded mutation.
#[derive(Clone)]
pub struct MutationEvent {
    id: Uuid,
    kind: EventKind,
    node: NodeRef,
    recorded_at: OffsetDateTime,
    path: PathCache,
}

impl MutationEvent {
    /// Record `kind` against `node`, capturing its current path.
    pub fn new(kind: EventKind, node: NodeRef) -> Self {
        let path = PathCache::capture(&node);
        Self {
            id: Uuid::new_v4(),
            kind,
            node,
            recorded_at: OffsetDateTime::now_utc(),
            path,
        }
    }

    pub fn node_added(node: NodeRef) -> Self {
        Self::new(EventKind::NodeAdded, node)
    }

    pub fn node_removed(node: NodeRef) -> Self {
        Self::new(EventKind::NodeRemoved, node)
    }

    pub fn node_changed(node: NodeRef) -> Self {
        Self::new(EventKind::NodeChanged, node)
    }

    pub fn node_moved(node: NodeRef) -> Self {
        Self::new(EventKind::NodeMoved, node)
    }

    pub fn property_changed(node: NodeRef, name: impl Into<String>) -> Self {
        Self::new(EventKind::PropertyChanged { name: name.into() }, node)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// The subject node, as a live handle.
    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn recorded_at(&self) -> OffsetDateTime {
        self.recorded_at
    }

    /// Last known path of the subject; may be outdated.
    pub fn cached_path(&self) -> Option<&str> {
        self.path.path.as_deref()
    }
}

impl fmt::Debug for MutationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationEvent")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("path", &self.path.path)
            .finish()
    }
}

/// Ordered event buffer for one unit of work.
///
/// Duplicates are kept: consumers must be idempotent.
#[derive(Debug, Default)]
pub struct ChangeLog {
    events: Vec<MutationEvent>,
    generation: u64,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event(&mut self, mut event: MutationEvent) {
        if event.kind.relocates_nodes() {
            self.generation += 1;
        }
        // The path was captured at creation, after any move it describes.
        event.path.generation = self.generation;
        self.events.push(event);
    }

    /// Remove and return, in insertion order, every event whose subject is at
    /// or below `prefix`. Non-matching events stay buffered.
    pub fn remove_and_get_affected_events(&mut self, prefix: &str) -> Vec<MutationEvent> {
        let generation = self.generation;
        let mut affected = Vec::new();
        let mut remaining = Vec::with_capacity(self.events.len());

        for mut event in self.events.drain(..) {
            if event.path.is_within(&event.node, prefix, generation) {
                affected.push(event);
            } else {
                remaining.push(event);
            }
        }
        self.events = remaining;

        debug!(
            prefix,
            affected = affected.len(),
            remaining = self.events.len(),
            "Change log queried"
        );
        affected
    }

    /// Take every buffered event, in insertion order.
    pub fn drain_all(&mut self) -> Vec<MutationEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Last known paths of the buffered events, for diagnostics.
    pub fn describe(&self) -> Vec<String> {
        self.events
            .iter()
            .map(|event| match event.cached_path() {
                Some(path) => path.to_string(),
                None => display_path(event.node.as_ref()),
            })
            .collect()
    }
}

/// Segment-aware prefix test: `/a` covers `/a` and `/a/x` but not `/ab`.
pub fn path_is_within(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path.starts_with('/');
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
