//! Request-scoped resolution state.
//!
//! One [`RenderContext`] lives for one render request and is passed down by
//! reference. It memoizes node lookups and resolved tile maps so that a page
//! with many tiles does not walk its template chain once per tile. Nothing
//! outlives the request: dropping the context releases every cached handle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{trace, warn};

use crate::domain::error::RepositoryError;
use crate::domain::node::{NodeKey, NodeRef, RepositoryNode, Tile, display_path};
use crate::domain::repository::ContentRepository;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("node `{path}` is not a tile container")]
    NotAContainer { path: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Tiles visible from one container, keyed by tile id.
///
/// Built from the container itself, then its template chain, then the
/// workspace's global container. The first definition of an id wins.
#[derive(Debug, Default)]
pub struct TileMap {
    tiles: HashMap<String, NodeRef>,
}

impl TileMap {
    pub fn get(&self, tile_id: &str) -> Option<&NodeRef> {
        self.tiles.get(tile_id)
    }

    pub fn contains(&self, tile_id: &str) -> bool {
        self.tiles.contains_key(tile_id)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Tile ids in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tiles.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    fn absorb(&mut self, tiles: Vec<Tile>) {
        for tile in tiles {
            if let Some(id) = tile.id {
                self.tiles.entry(id).or_insert(tile.node);
            }
        }
    }
}

pub struct RenderContext<'r> {
    repository: &'r dyn ContentRepository,
    nodes: HashMap<NodeKey, Option<NodeRef>>,
    tile_maps: HashMap<NodeKey, Arc<TileMap>>,
}

impl<'r> RenderContext<'r> {
    pub fn new(repository: &'r dyn ContentRepository) -> Self {
        Self {
            repository,
            nodes: HashMap::new(),
            tile_maps: HashMap::new(),
        }
    }

    /// Look a node up once per request.
    pub fn resolve(&mut self, key: &NodeKey) -> Result<Option<NodeRef>, RepositoryError> {
        if let Some(cached) = self.nodes.get(key) {
            return Ok(cached.clone());
        }
        let node = self.repository.node(key)?;
        self.nodes.insert(key.clone(), node.clone());
        Ok(node)
    }

    /// Tiles visible from `container`, resolved once per request.
    pub fn tile_map(&mut self, container: &NodeRef) -> Result<Arc<TileMap>, RenderError> {
        let key = NodeKey::of(container.as_ref())?;
        if let Some(map) = self.tile_maps.get(&key) {
            return Ok(Arc::clone(map));
        }

        let map = Arc::new(self.build_tile_map(container)?);
        self.tile_maps.insert(key, Arc::clone(&map));
        Ok(map)
    }

    /// The tile `tile_id` as seen from `container`.
    pub fn tile(
        &mut self,
        container: &NodeRef,
        tile_id: &str,
    ) -> Result<Option<NodeRef>, RenderError> {
        Ok(self.tile_map(container)?.get(tile_id).cloned())
    }

    /// Number of node lookups memoized so far.
    pub fn resolved_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn build_tile_map(&self, container: &NodeRef) -> Result<TileMap, RenderError> {
        let Some(capability) = container.as_container() else {
            return Err(RenderError::NotAContainer {
                path: display_path(container.as_ref()),
            });
        };

        let mut map = TileMap::default();
        let mut seen = HashSet::from([NodeKey::of(container.as_ref())?]);
        map.absorb(capability.tiles()?);

        let mut next = capability.template()?;
        while let Some(template) = next {
            if !seen.insert(NodeKey::of(template.as_ref())?) {
                warn!(
                    container = %display_path(container.as_ref()),
                    template = %display_path(template.as_ref()),
                    "Template chain loops back, stopping"
                );
                break;
            }
            let Some(capability) = template.as_container() else {
                break;
            };
            map.absorb(capability.tiles()?);
            next = capability.template()?;
        }

        if let Some(global) = self.repository.global_container(container.workspace())?
            && seen.insert(NodeKey::of(global.as_ref())?)
            && let Some(capability) = global.as_container()
        {
            map.absorb(capability.tiles()?);
        }

        trace!(
            container = %display_path(container.as_ref()),
            tiles = map.len(),
            "Tile map resolved"
        );
        Ok(map)
    }
}
