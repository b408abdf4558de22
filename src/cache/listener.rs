//! Save-driven cache invalidation.
//!
//! A saved node is mapped to the container it belongs to, then a
//! breadth-first walk follows template → referencing container edges so that
//! editing a template drops every page built from it. Reverse references are
//! queried from the repository on every walk, since the graph itself changes.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, instrument, warn};

use crate::domain::error::RepositoryError;
use crate::domain::node::{ContainerKind, NodeKey, NodeRef, RepositoryNode, display_path};
use crate::events::{MutationEvent, SaveEventListener};

use super::config::CacheConfig;
use super::store::Invalidate;

const METRIC_INVALIDATION_NODES: &str = "stencil_invalidation_nodes_total";
const METRIC_INVALIDATION_FAILURES: &str = "stencil_invalidation_failures_total";
const METRIC_INVALIDATION_MS: &str = "stencil_invalidation_ms";

/// Outcome of one batch, for logs and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Events examined.
    pub events: usize,
    /// Events that resolved to a container and started a walk.
    pub walks: usize,
    /// Nodes invalidated across all walks.
    pub invalidated_nodes: usize,
    /// Cache entries removed across all walks.
    pub removed_entries: usize,
    /// Repository failures caught and skipped.
    pub failures: usize,
    /// Walks cut short by `max_walk_nodes`.
    pub truncated_walks: usize,
}

/// Invalidates derived artifacts when repository content is saved.
pub struct InvalidationListener {
    config: CacheConfig,
    cache: Arc<dyn Invalidate>,
}

impl InvalidationListener {
    pub fn new(config: CacheConfig, cache: Arc<dyn Invalidate>) -> Self {
        Self { config, cache }
    }

    /// Invalidate everything the batch could have affected.
    ///
    /// Never fails: repository errors are logged per node and the rest of the
    /// batch is still processed.
    #[instrument(skip_all, fields(event_count = events.len()))]
    pub fn invalidate_events(&self, events: &[MutationEvent]) -> InvalidationReport {
        let started_at = Instant::now();
        let mut report = InvalidationReport {
            events: events.len(),
            ..Default::default()
        };

        for event in events {
            let node = event.node();
            match self.resolve_container(node) {
                Ok(Some(container)) => {
                    report.walks += 1;
                    self.invalidate_closure(container, &mut report);
                }
                Ok(None) => {}
                Err(err) => {
                    report.failures += 1;
                    log_failure(node.as_ref(), &err, "resolve");
                }
            }
        }

        counter!(METRIC_INVALIDATION_NODES).increment(report.invalidated_nodes as u64);
        counter!(METRIC_INVALIDATION_FAILURES).increment(report.failures as u64);
        histogram!(METRIC_INVALIDATION_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        debug!(
            walks = report.walks,
            invalidated_nodes = report.invalidated_nodes,
            removed_entries = report.removed_entries,
            failures = report.failures,
            truncated_walks = report.truncated_walks,
            "Cache invalidation complete"
        );
        report
    }

    /// Map a saved node to its cache-relevant container.
    ///
    /// The node itself when it is a container, its parent when it is the
    /// container's content child, otherwise nothing.
    fn resolve_container(&self, node: &NodeRef) -> Result<Option<NodeRef>, RepositoryError> {
        if self.is_container(node.as_ref())? {
            return Ok(Some(Arc::clone(node)));
        }
        if node.name()? != self.config.content_child_name {
            return Ok(None);
        }
        match node.parent()? {
            Some(parent) if self.is_container(parent.as_ref())? => Ok(Some(parent)),
            _ => Ok(None),
        }
    }

    fn invalidate_closure(&self, container: NodeRef, report: &mut InvalidationReport) {
        let mut queue = VecDeque::from([container]);
        let mut visited: HashSet<NodeKey> = HashSet::new();
        let mut walked = 0usize;

        while let Some(current) = queue.pop_front() {
            if let Some(limit) = self.config.max_walk_nodes
                && walked >= limit.get()
            {
                report.truncated_walks += 1;
                warn!(
                    limit = limit.get(),
                    pending = queue.len() + 1,
                    "Invalidation walk truncated"
                );
                return;
            }

            let key = match NodeKey::of(current.as_ref()) {
                Ok(key) => key,
                Err(err) => {
                    report.failures += 1;
                    log_failure(current.as_ref(), &err, "identify");
                    continue;
                }
            };
            if !visited.insert(key.clone()) {
                continue;
            }

            walked += 1;
            report.invalidated_nodes += 1;
            report.removed_entries += self.cache.invalidate(&key.workspace, &key.identity);

            match self.referencing_containers(current.as_ref()) {
                Ok(dependents) => queue.extend(dependents),
                Err(err) => {
                    report.failures += 1;
                    log_failure(current.as_ref(), &err, "references");
                }
            }
        }
    }

    /// Containers that inherit from `node`, when `node` is a template.
    fn referencing_containers(
        &self,
        node: &dyn RepositoryNode,
    ) -> Result<Vec<NodeRef>, RepositoryError> {
        if !self.is_template(node)? {
            return Ok(Vec::new());
        }

        let mut containers = Vec::new();
        for holder in node.references(&self.config.template_property)? {
            if let Some(container) = self.resolve_container(&holder)? {
                containers.push(container);
            }
        }
        Ok(containers)
    }

    fn is_container(&self, node: &dyn RepositoryNode) -> Result<bool, RepositoryError> {
        if node.as_container().is_some() {
            return Ok(true);
        }
        Ok(node
            .node_type()?
            .is_some_and(|node_type| self.config.is_container_type(&node_type)))
    }

    fn is_template(&self, node: &dyn RepositoryNode) -> Result<bool, RepositoryError> {
        if let Some(container) = node.as_container() {
            return Ok(container.kind() == ContainerKind::Template);
        }
        Ok(node
            .node_type()?
            .is_some_and(|node_type| self.config.is_template_type(&node_type)))
    }
}

impl SaveEventListener for InvalidationListener {
    fn on_save(&self, events: &[MutationEvent]) {
        self.invalidate_events(events);
    }
}

fn log_failure(node: &dyn RepositoryNode, err: &RepositoryError, stage: &'static str) {
    // Removed subjects are routine on delete; anything else may leave a stale
    // entry behind until the next save of the same node.
    if matches!(err, RepositoryError::NodeRemoved { .. }) {
        debug!(
            stage,
            path = %display_path(node),
            error = %err,
            "Skipped removed node during invalidation"
        );
    } else {
        warn!(
            stage,
            path = %display_path(node),
            error = %err,
            "Failed to invalidate cache for node"
        );
    }
}
