//! Derived artifact storage.
//!
//! Artifacts live until explicitly invalidated: there is no TTL and no
//! capacity eviction, so correctness rests entirely on the invalidation path.

use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use tracing::{debug, trace};

use crate::domain::node::{NodeIdentity, NodeKey, RepositoryNode};

use super::error::{CacheError, DeriveError};
use super::keys::CacheKey;

const METRIC_CACHE_HIT: &str = "stencil_cache_hit_total";
const METRIC_CACHE_MISS: &str = "stencil_cache_miss_total";
const METRIC_CACHE_INVALIDATE: &str = "stencil_cache_invalidate_total";

/// Computes an artifact from a node's current state.
///
/// Derivation must be a pure function of node state: concurrent misses on the
/// same key may each derive, and the last write wins.
pub trait Derive<A>: Send + Sync {
    fn derive(&self, node: &dyn RepositoryNode) -> Result<A, DeriveError>;
}

/// Something that asks the cache for artifacts, such as a page or template
/// view.
pub trait Producer<A> {
    /// Declared producer type. One node may be served by several types.
    fn producer_type(&self) -> &str;

    /// Derivation capability. Producers returning `None` are rejected by
    /// [`ArtifactCache::get`].
    fn derivation(&self) -> Option<&dyn Derive<A>> {
        None
    }
}

/// Invalidation seam used by the listener, independent of artifact type.
pub trait Invalidate: Send + Sync {
    /// Drop every entry derived from `workspace`/`identity`. Returns the
    /// number of entries removed.
    fn invalidate(&self, workspace: &str, identity: &NodeIdentity) -> usize;
}

/// Concurrent map from [`CacheKey`] to a derived artifact.
pub struct ArtifactCache<A> {
    entries: DashMap<CacheKey, Arc<A>>,
}

impl<A> ArtifactCache<A>
where
    A: Send + Sync,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Return the artifact `producer` derives from `node`, deriving it on a
    /// miss.
    pub fn get<P>(&self, producer: &P, node: &dyn RepositoryNode) -> Result<Arc<A>, CacheError>
    where
        P: Producer<A> + ?Sized,
    {
        let Some(derivation) = producer.derivation() else {
            return Err(CacheError::missing_capability(producer.producer_type()));
        };

        let key = CacheKey::new(producer.producer_type(), NodeKey::of(node)?);

        if let Some(hit) = self.entries.get(&key) {
            counter!(METRIC_CACHE_HIT).increment(1);
            trace!(key = %key, "Artifact cache hit");
            return Ok(Arc::clone(hit.value()));
        }

        counter!(METRIC_CACHE_MISS).increment(1);
        debug!(key = %key, "Artifact cache miss, deriving");

        // No map guard is held while deriving; a producer may read the cache.
        let artifact = derivation
            .derive(node)
            .map_err(|source| CacheError::Derivation {
                key: key.to_string(),
                source,
            })?;
        let artifact = Arc::new(artifact);
        self.entries.insert(key, Arc::clone(&artifact));
        Ok(artifact)
    }

    /// Null-tolerant form of [`Invalidate::invalidate`]: a no-op when either
    /// part of the identity is absent.
    pub fn invalidate_opt(&self, workspace: Option<&str>, identity: Option<&NodeIdentity>) -> usize {
        match (workspace, identity) {
            (Some(workspace), Some(identity)) => self.invalidate(workspace, identity),
            _ => 0,
        }
    }

    /// Drop every entry derived from `node`. A no-op for `None`.
    pub fn invalidate_node(&self, node: Option<&dyn RepositoryNode>) -> Result<usize, CacheError> {
        let Some(node) = node else {
            return Ok(0);
        };
        let key = NodeKey::of(node)?;
        Ok(self.invalidate(&key.workspace, &key.identity))
    }

    /// Administrative flush of every entry.
    pub fn clear(&self) {
        self.entries.clear();
        debug!("Artifact cache cleared");
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<A> Invalidate for ArtifactCache<A>
where
    A: Send + Sync,
{
    fn invalidate(&self, workspace: &str, identity: &NodeIdentity) -> usize {
        let mut removed = 0usize;
        self.entries.retain(|key, _| {
            let hit = key.matches_node(workspace, identity);
            if hit {
                removed += 1;
            }
            !hit
        });

        counter!(METRIC_CACHE_INVALIDATE).increment(removed as u64);
        debug!(workspace, identity = %identity, removed, "Artifact cache invalidated");
        removed
    }
}

impl<A> Default for ArtifactCache<A>
where
    A: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::error::RepositoryError;
    use crate::domain::node::NodeRef;

    #[derive(Debug)]
    struct StubNode {
        workspace: &'static str,
        identifier: Option<&'static str>,
        path: &'static str,
    }

    impl StubNode {
        fn referenceable(id: &'static str) -> Self {
            Self {
                workspace: "site",
                identifier: Some(id),
                path: "/unused",
            }
        }
    }

    impl RepositoryNode for StubNode {
        fn workspace(&self) -> &str {
            self.workspace
        }

        fn identifier(&self) -> Result<Option<String>, RepositoryError> {
            Ok(self.identifier.map(str::to_string))
        }

        fn path(&self) -> Result<String, RepositoryError> {
            Ok(self.path.to_string())
        }

        fn name(&self) -> Result<String, RepositoryError> {
            Ok(String::new())
        }

        fn parent(&self) -> Result<Option<NodeRef>, RepositoryError> {
            Ok(None)
        }

        fn node_type(&self) -> Result<Option<String>, RepositoryError> {
            Ok(None)
        }

        fn references(&self, _property: &str) -> Result<Vec<NodeRef>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    struct CountingView {
        kind: &'static str,
        calls: AtomicUsize,
    }

    impl CountingView {
        fn new(kind: &'static str) -> Self {
            Self {
                kind,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Derive<String> for CountingView {
        fn derive(&self, node: &dyn RepositoryNode) -> Result<String, DeriveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("<{}>{}</{}>", self.kind, node.path()?, self.kind))
        }
    }

    impl Producer<String> for CountingView {
        fn producer_type(&self) -> &str {
            self.kind
        }

        fn derivation(&self) -> Option<&dyn Derive<String>> {
            Some(self)
        }
    }

    struct InertView;

    impl Producer<String> for InertView {
        fn producer_type(&self) -> &str {
            "inert"
        }
    }

    struct FailingView;

    impl Derive<String> for FailingView {
        fn derive(&self, _node: &dyn RepositoryNode) -> Result<String, DeriveError> {
            Err("template syntax error".into())
        }
    }

    impl Producer<String> for FailingView {
        fn producer_type(&self) -> &str {
            "failing"
        }

        fn derivation(&self) -> Option<&dyn Derive<String>> {
            Some(self)
        }
    }

    #[test]
    fn repeated_get_returns_same_instance_and_derives_once() {
        let cache: ArtifactCache<String> = ArtifactCache::new();
        let view = CountingView::new("page");
        let node = StubNode::referenceable("n1");

        let first = cache.get(&view, &node).expect("first get");
        let second = cache.get(&view, &node).expect("second get");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(view.calls(), 1);
    }

    #[test]
    fn producer_without_derivation_is_rejected() {
        let cache: ArtifactCache<String> = ArtifactCache::new();
        let node = StubNode::referenceable("n1");

        let err = cache.get(&InertView, &node).expect_err("must reject");
        assert!(matches!(err, CacheError::MissingCapability { ref producer } if producer == "inert"));
        assert!(cache.is_empty());
    }

    #[test]
    fn failed_derivation_is_not_stored() {
        let cache: ArtifactCache<String> = ArtifactCache::new();
        let node = StubNode::referenceable("n1");

        let err = cache.get(&FailingView, &node).expect_err("derive fails");
        assert!(matches!(err, CacheError::Derivation { .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_removes_every_producer_type_for_node() {
        let cache: ArtifactCache<String> = ArtifactCache::new();
        let page = CountingView::new("page");
        let template = CountingView::new("template");
        let target = StubNode::referenceable("n1");
        let other = StubNode::referenceable("n2");

        cache.get(&page, &target).expect("page/n1");
        cache.get(&template, &target).expect("template/n1");
        cache.get(&page, &other).expect("page/n2");
        assert_eq!(cache.len(), 3);

        let removed = cache.invalidate("site", &NodeIdentity::Identifier("n1".to_string()));

        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&CacheKey::new(
            "page",
            NodeKey::new("site", NodeIdentity::Identifier("n2".to_string()))
        )));

        cache.get(&page, &target).expect("rederive");
        assert_eq!(page.calls(), 3);
    }

    #[test]
    fn invalidate_is_scoped_to_workspace() {
        let cache: ArtifactCache<String> = ArtifactCache::new();
        let view = CountingView::new("page");
        let live = StubNode::referenceable("n1");
        let staged = StubNode {
            workspace: "staging",
            identifier: Some("n1"),
            path: "/unused",
        };

        cache.get(&view, &live).expect("live");
        cache.get(&view, &staged).expect("staged");

        assert_eq!(
            cache.invalidate("staging", &NodeIdentity::Identifier("n1".to_string())),
            1
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn path_identity_used_for_non_referenceable_nodes() {
        let cache: ArtifactCache<String> = ArtifactCache::new();
        let view = CountingView::new("page");
        let node = StubNode {
            workspace: "site",
            identifier: None,
            path: "/pages/home/jcr:content",
        };

        cache.get(&view, &node).expect("get");
        let removed = cache.invalidate(
            "site",
            &NodeIdentity::Path("/pages/home/jcr:content".to_string()),
        );
        assert_eq!(removed, 1);
    }

    #[test]
    fn absent_arguments_are_a_no_op() {
        let cache: ArtifactCache<String> = ArtifactCache::new();
        let view = CountingView::new("page");
        let node = StubNode::referenceable("n1");
        cache.get(&view, &node).expect("get");

        let identity = NodeIdentity::Identifier("n1".to_string());
        assert_eq!(cache.invalidate_opt(None, Some(&identity)), 0);
        assert_eq!(cache.invalidate_opt(Some("site"), None), 0);
        assert_eq!(cache.invalidate_node(None).expect("no-op"), 0);
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.invalidate_node(Some(&node)).expect("invalidate"), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_gets_on_distinct_keys() {
        let cache: Arc<ArtifactCache<String>> = Arc::new(ArtifactCache::new());
        let view = Arc::new(CountingView::new("page"));
        let ids = ["a", "b", "c", "d", "e", "f", "g", "h"];

        std::thread::scope(|scope| {
            for id in ids {
                let cache = Arc::clone(&cache);
                let view = Arc::clone(&view);
                scope.spawn(move || {
                    let node = StubNode::referenceable(id);
                    for _ in 0..16 {
                        cache.get(view.as_ref(), &node).expect("get");
                    }
                });
            }
        });

        assert_eq!(cache.len(), ids.len());
        assert_eq!(view.calls(), ids.len());
    }
}
