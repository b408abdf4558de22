//! In-memory content repository.
//!
//! Backs the test suite and embedders that need a repository without storage.
//! Node handles read live state, so moves and removals are visible through
//! handles taken earlier. Every mutation is recorded in a per-workspace
//! [`ChangeLog`] until the subtree containing it is saved, at which point the
//! affected events are dispatched to the registered save listeners.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

use tracing::debug;
use uuid::Uuid;

use crate::domain::error::RepositoryError;
use crate::domain::node::{
    ContainerKind, NodeIdentity, NodeKey, NodeRef, RepositoryNode, Tile, TileContainer,
};
use crate::domain::repository::ContentRepository;
use crate::events::{ChangeLog, MutationEvent, SaveDispatcher, SaveEventListener};
use crate::util::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "infra::memory";
const DEFAULT_TEMPLATE_PROPERTY: &str = "site:template";

/// Node type tag of tile children.
pub const TILE_TYPE: &str = "tile";
/// Property holding a tile's addressable id.
pub const TILE_ID_PROPERTY: &str = "site:tileId";

type Slot = u64;

/// Shape of a node being created.
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    pub node_type: Option<String>,
    pub container: Option<ContainerKind>,
    pub referenceable: bool,
}

impl NodeSpec {
    /// Plain structural node without a type tag.
    pub fn folder() -> Self {
        Self::default()
    }

    pub fn page() -> Self {
        Self::container("page", ContainerKind::Page)
    }

    pub fn template() -> Self {
        Self::container("template", ContainerKind::Template)
    }

    pub fn global() -> Self {
        Self::container("global", ContainerKind::Global)
    }

    /// Non-referenceable payload child of a container.
    pub fn content() -> Self {
        Self::default()
    }

    pub fn tile() -> Self {
        Self {
            node_type: Some(TILE_TYPE.to_string()),
            container: None,
            referenceable: true,
        }
    }

    /// Node recognised only by its type tag, without the container capability.
    pub fn typed(node_type: impl Into<String>) -> Self {
        Self {
            node_type: Some(node_type.into()),
            container: None,
            referenceable: true,
        }
    }

    fn container(node_type: &str, kind: ContainerKind) -> Self {
        Self {
            node_type: Some(node_type.to_string()),
            container: Some(kind),
            referenceable: true,
        }
    }
}

#[derive(Debug)]
struct Record {
    workspace: String,
    name: String,
    parent: Option<Slot>,
    children: Vec<Slot>,
    identifier: Option<String>,
    node_type: Option<String>,
    container: Option<ContainerKind>,
    properties: HashMap<String, String>,
    references: HashMap<String, Slot>,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<Slot, Record>,
    roots: HashMap<String, Slot>,
    globals: HashMap<String, Slot>,
    next_slot: Slot,
}

impl State {
    fn allocate(&mut self, record: Record) -> Slot {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.records.insert(slot, record);
        slot
    }

    fn root(&mut self, workspace: &str) -> Slot {
        if let Some(slot) = self.roots.get(workspace) {
            return *slot;
        }
        let slot = self.allocate(Record {
            workspace: workspace.to_string(),
            name: String::new(),
            parent: None,
            children: Vec::new(),
            identifier: None,
            node_type: None,
            container: None,
            properties: HashMap::new(),
            references: HashMap::new(),
        });
        self.roots.insert(workspace.to_string(), slot);
        slot
    }

    fn path_of(&self, slot: Slot) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = slot;
        loop {
            let record = self.records.get(&current)?;
            match record.parent {
                Some(parent) => {
                    segments.push(record.name.as_str());
                    current = parent;
                }
                None => break,
            }
        }
        segments.reverse();
        Some(format!("/{}", segments.join("/")))
    }

    fn child_named(&self, parent: Slot, name: &str) -> Option<Slot> {
        self.records.get(&parent)?.children.iter().copied().find(|child| {
            self.records
                .get(child)
                .is_some_and(|record| record.name == name)
        })
    }

    fn resolve(&self, workspace: &str, path: &str) -> Option<Slot> {
        let mut current = *self.roots.get(workspace)?;
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            current = self.child_named(current, segment)?;
        }
        Some(current)
    }

    fn require(&self, workspace: &str, path: &str) -> Result<Slot, RepositoryError> {
        self.resolve(workspace, path)
            .ok_or_else(|| RepositoryError::not_found(workspace, path))
    }

    fn is_ancestor(&self, ancestor: Slot, slot: Slot) -> bool {
        let mut current = Some(slot);
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            current = self.records.get(&candidate).and_then(|record| record.parent);
        }
        false
    }

    fn subtree(&self, slot: Slot) -> Vec<Slot> {
        let mut stack = vec![slot];
        let mut out = Vec::new();
        while let Some(current) = stack.pop() {
            if let Some(record) = self.records.get(&current) {
                stack.extend(record.children.iter().copied());
            }
            out.push(current);
        }
        out
    }
}

struct Inner {
    state: RwLock<State>,
    logs: Mutex<HashMap<String, ChangeLog>>,
    dispatcher: SaveDispatcher,
    template_property: String,
}

impl Inner {
    fn handle(self: &Arc<Self>, slot: Slot, record: &Record) -> NodeRef {
        Arc::new(MemoryNode {
            repo: Arc::downgrade(self),
            slot,
            workspace: record.workspace.clone(),
            container: record.container,
        })
    }

    fn handle_at(self: &Arc<Self>, state: &State, slot: Slot) -> Option<NodeRef> {
        state
            .records
            .get(&slot)
            .map(|record| self.handle(slot, record))
    }
}

/// Thread-safe in-memory repository with per-workspace change logs.
#[derive(Clone)]
pub struct MemoryRepository {
    inner: Arc<Inner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::with_template_property(DEFAULT_TEMPLATE_PROPERTY)
    }

    /// Use `property` as the container → template reference property.
    pub fn with_template_property(property: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                logs: Mutex::new(HashMap::new()),
                dispatcher: SaveDispatcher::new(),
                template_property: property.into(),
            }),
        }
    }

    pub fn register_listener(&self, listener: Arc<dyn SaveEventListener>) {
        self.inner.dispatcher.register(listener);
    }

    pub fn dispatcher(&self) -> &SaveDispatcher {
        &self.inner.dispatcher
    }

    /// Handle to the node at `path`.
    pub fn node_at(&self, workspace: &str, path: &str) -> Result<NodeRef, RepositoryError> {
        let mut state = rw_write(&self.inner.state, SOURCE, "node_at");
        state.root(workspace);
        let slot = state.require(workspace, path)?;
        self.inner
            .handle_at(&state, slot)
            .ok_or_else(|| RepositoryError::not_found(workspace, path))
    }

    /// Create `name` below `parent_path`.
    pub fn add_node(
        &self,
        workspace: &str,
        parent_path: &str,
        name: &str,
        spec: NodeSpec,
    ) -> Result<NodeRef, RepositoryError> {
        if name.is_empty() || name.contains('/') {
            return Err(RepositoryError::backend(format!("invalid node name `{name}`")));
        }

        let node = {
            let mut state = rw_write(&self.inner.state, SOURCE, "add_node");
            state.root(workspace);
            let parent = state.require(workspace, parent_path)?;
            if state.child_named(parent, name).is_some() {
                return Err(RepositoryError::backend(format!(
                    "`{name}` already exists below `{parent_path}`"
                )));
            }

            let slot = state.allocate(Record {
                workspace: workspace.to_string(),
                name: name.to_string(),
                parent: Some(parent),
                children: Vec::new(),
                identifier: spec.referenceable.then(|| Uuid::new_v4().to_string()),
                node_type: spec.node_type,
                container: spec.container,
                properties: HashMap::new(),
                references: HashMap::new(),
            });
            if let Some(parent) = state.records.get_mut(&parent) {
                parent.children.push(slot);
            }
            self.inner
                .handle_at(&state, slot)
                .ok_or_else(|| RepositoryError::not_found(workspace, name))?
        };

        self.record(workspace, MutationEvent::node_added(Arc::clone(&node)));
        self.record_owner(workspace, tile_owner(&node));
        Ok(node)
    }

    /// Add a tile with addressable id `tile_id` to the container at
    /// `container_path`.
    pub fn add_tile(
        &self,
        workspace: &str,
        container_path: &str,
        name: &str,
        tile_id: &str,
    ) -> Result<NodeRef, RepositoryError> {
        let tile = self.add_node(workspace, container_path, name, NodeSpec::tile())?;
        let path = tile.path()?;
        self.set_property(workspace, &path, TILE_ID_PROPERTY, tile_id)?;
        Ok(tile)
    }

    pub fn set_property(
        &self,
        workspace: &str,
        path: &str,
        name: &str,
        value: &str,
    ) -> Result<(), RepositoryError> {
        let node = {
            let mut state = rw_write(&self.inner.state, SOURCE, "set_property");
            let slot = state.require(workspace, path)?;
            if let Some(record) = state.records.get_mut(&slot) {
                record.properties.insert(name.to_string(), value.to_string());
            }
            self.inner.handle_at(&state, slot)
        };

        if let Some(node) = node {
            let owner = tile_owner(&node);
            self.record(workspace, MutationEvent::property_changed(node, name));
            self.record_owner(workspace, owner);
        }
        Ok(())
    }

    /// Point the container at `path` to a template, or clear the reference.
    pub fn set_template(
        &self,
        workspace: &str,
        path: &str,
        template_path: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let property = self.inner.template_property.clone();
        let node = {
            let mut state = rw_write(&self.inner.state, SOURCE, "set_template");
            let slot = state.require(workspace, path)?;
            let target = template_path
                .map(|template| state.require(workspace, template))
                .transpose()?;
            if let Some(record) = state.records.get_mut(&slot) {
                match target {
                    Some(target) => {
                        record.references.insert(property.clone(), target);
                    }
                    None => {
                        record.references.remove(&property);
                    }
                }
            }
            self.inner.handle_at(&state, slot)
        };

        if let Some(node) = node {
            self.record(workspace, MutationEvent::property_changed(node, property));
        }
        Ok(())
    }

    /// Make the container at `path` the workspace's global container.
    pub fn set_global_container(&self, workspace: &str, path: &str) -> Result<(), RepositoryError> {
        let mut state = rw_write(&self.inner.state, SOURCE, "set_global_container");
        let slot = state.require(workspace, path)?;
        state.globals.insert(workspace.to_string(), slot);
        Ok(())
    }

    /// Move (or rename) the node at `path` below `new_parent_path`.
    pub fn move_node(
        &self,
        workspace: &str,
        path: &str,
        new_parent_path: &str,
        new_name: &str,
    ) -> Result<NodeRef, RepositoryError> {
        let previous_owner = tile_owner(&self.node_at(workspace, path)?);
        let node = {
            let mut state = rw_write(&self.inner.state, SOURCE, "move_node");
            let slot = state.require(workspace, path)?;
            let new_parent = state.require(workspace, new_parent_path)?;
            if state.is_ancestor(slot, new_parent) {
                return Err(RepositoryError::backend(format!(
                    "cannot move `{path}` below itself"
                )));
            }
            if state.child_named(new_parent, new_name).is_some() {
                return Err(RepositoryError::backend(format!(
                    "`{new_name}` already exists below `{new_parent_path}`"
                )));
            }

            let old_parent = state.records.get(&slot).and_then(|record| record.parent);
            if let Some(old_parent) = old_parent
                && let Some(record) = state.records.get_mut(&old_parent)
            {
                record.children.retain(|child| *child != slot);
            }
            if let Some(record) = state.records.get_mut(&new_parent) {
                record.children.push(slot);
            }
            if let Some(record) = state.records.get_mut(&slot) {
                record.parent = Some(new_parent);
                record.name = new_name.to_string();
            }
            self.inner
                .handle_at(&state, slot)
                .ok_or_else(|| RepositoryError::not_found(workspace, path))?
        };

        self.record(workspace, MutationEvent::node_moved(Arc::clone(&node)));
        self.record_owner(workspace, previous_owner);
        self.record_owner(workspace, tile_owner(&node));
        Ok(node)
    }

    /// Remove the node at `path` and its whole subtree.
    ///
    /// References into the removed subtree are cleared, and each holder that
    /// loses one is recorded as changed.
    pub fn remove_node(&self, workspace: &str, path: &str) -> Result<(), RepositoryError> {
        let node = self.node_at(workspace, path)?;
        let owner = tile_owner(&node);
        // Captured before removal so the event keeps the subject's last path.
        let event = MutationEvent::node_removed(node);

        let orphaned = {
            let mut state = rw_write(&self.inner.state, SOURCE, "remove_node");
            let slot = state.require(workspace, path)?;
            let parent = state.records.get(&slot).and_then(|record| record.parent);
            let Some(parent) = parent else {
                return Err(RepositoryError::backend("cannot remove a workspace root"));
            };
            if let Some(record) = state.records.get_mut(&parent) {
                record.children.retain(|child| *child != slot);
            }
            let removed = state.subtree(slot);
            for gone in &removed {
                state.records.remove(gone);
            }
            let mut cleared: Vec<(Slot, String)> = Vec::new();
            for (slot, record) in state.records.iter_mut() {
                record.references.retain(|property, target| {
                    let dangling = removed.contains(target);
                    if dangling {
                        cleared.push((*slot, property.clone()));
                    }
                    !dangling
                });
            }
            state.globals.retain(|_, global| !removed.contains(global));

            cleared.sort_unstable();
            cleared
                .into_iter()
                .filter_map(|(slot, property)| {
                    self.inner
                        .handle_at(&state, slot)
                        .map(|holder| (holder, property))
                })
                .collect::<Vec<_>>()
        };

        self.record(workspace, event);
        self.record_owner(workspace, owner);
        for (holder, property) in orphaned {
            debug!(
                workspace,
                removed = path,
                property = %property,
                "Cleared reference into removed subtree"
            );
            self.record(workspace, MutationEvent::property_changed(holder, property));
        }
        Ok(())
    }

    /// Commit the pending events under `path` and notify listeners.
    ///
    /// Returns the number of events dispatched.
    pub fn save(&self, workspace: &str, path: &str) -> usize {
        let events = {
            let mut logs = mutex_lock(&self.inner.logs, SOURCE, "save");
            match logs.get_mut(workspace) {
                Some(log) => log.remove_and_get_affected_events(path),
                None => Vec::new(),
            }
        };
        debug!(workspace, path, event_count = events.len(), "Repository save");
        self.inner.dispatcher.dispatch(&events);
        events.len()
    }

    /// Commit every pending event of `workspace`.
    pub fn save_all(&self, workspace: &str) -> usize {
        self.save(workspace, "/")
    }

    /// Drop pending events without notifying anyone.
    pub fn discard(&self, workspace: &str) {
        if let Some(log) = mutex_lock(&self.inner.logs, SOURCE, "discard").get_mut(workspace) {
            log.clear();
        }
    }

    pub fn pending_events(&self, workspace: &str) -> usize {
        mutex_lock(&self.inner.logs, SOURCE, "pending_events")
            .get(workspace)
            .map_or(0, ChangeLog::len)
    }

    /// Tile edits change the container that renders them.
    fn record_owner(&self, workspace: &str, owner: Option<NodeRef>) {
        if let Some(owner) = owner {
            self.record(workspace, MutationEvent::node_changed(owner));
        }
    }

    fn record(&self, workspace: &str, event: MutationEvent) {
        mutex_lock(&self.inner.logs, SOURCE, "record")
            .entry(workspace.to_string())
            .or_default()
            .add_event(event);
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentRepository for MemoryRepository {
    fn node(&self, key: &NodeKey) -> Result<Option<NodeRef>, RepositoryError> {
        let state = rw_read(&self.inner.state, SOURCE, "node");
        let slot = match &key.identity {
            NodeIdentity::Path(path) => state.resolve(&key.workspace, path),
            NodeIdentity::Identifier(id) => state
                .records
                .iter()
                .find(|(_, record)| {
                    record.workspace == key.workspace && record.identifier.as_deref() == Some(id)
                })
                .map(|(slot, _)| *slot),
        };
        Ok(slot.and_then(|slot| self.inner.handle_at(&state, slot)))
    }

    fn global_container(&self, workspace: &str) -> Result<Option<NodeRef>, RepositoryError> {
        let state = rw_read(&self.inner.state, SOURCE, "global_container");
        Ok(state
            .globals
            .get(workspace)
            .and_then(|slot| self.inner.handle_at(&state, *slot)))
    }
}

/// Container a tile belongs to, when `node` is a tile.
fn tile_owner(node: &NodeRef) -> Option<NodeRef> {
    if node.node_type().ok()?.as_deref() != Some(TILE_TYPE) {
        return None;
    }
    node.parent()
        .ok()?
        .filter(|parent| parent.as_container().is_some())
}

/// Live handle to a node of a [`MemoryRepository`].
pub struct MemoryNode {
    repo: Weak<Inner>,
    slot: Slot,
    workspace: String,
    container: Option<ContainerKind>,
}

impl MemoryNode {
    fn read<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&Arc<Inner>, &State, &Record) -> T,
    ) -> Result<T, RepositoryError> {
        let inner = self
            .repo
            .upgrade()
            .ok_or_else(|| RepositoryError::backend("repository has been dropped"))?;
        let state = rw_read(&inner.state, SOURCE, op);
        let record = state
            .records
            .get(&self.slot)
            .ok_or_else(|| RepositoryError::removed(format!("{}#{}", self.workspace, self.slot)))?;
        Ok(f(&inner, &state, record))
    }
}

impl fmt::Debug for MemoryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryNode")
            .field("workspace", &self.workspace)
            .field("slot", &self.slot)
            .field("container", &self.container)
            .finish()
    }
}

impl RepositoryNode for MemoryNode {
    fn workspace(&self) -> &str {
        &self.workspace
    }

    fn identifier(&self) -> Result<Option<String>, RepositoryError> {
        self.read("identifier", |_, _, record| record.identifier.clone())
    }

    fn path(&self) -> Result<String, RepositoryError> {
        self.read("path", |_, state, _| state.path_of(self.slot))?
            .ok_or_else(|| RepositoryError::removed(format!("{}#{}", self.workspace, self.slot)))
    }

    fn name(&self) -> Result<String, RepositoryError> {
        self.read("name", |_, _, record| record.name.clone())
    }

    fn parent(&self) -> Result<Option<NodeRef>, RepositoryError> {
        self.read("parent", |inner, state, record| {
            record
                .parent
                .and_then(|parent| inner.handle_at(state, parent))
        })
    }

    fn node_type(&self) -> Result<Option<String>, RepositoryError> {
        self.read("node_type", |_, _, record| record.node_type.clone())
    }

    fn property(&self, name: &str) -> Result<Option<String>, RepositoryError> {
        self.read("property", |_, _, record| record.properties.get(name).cloned())
    }

    fn references(&self, property: &str) -> Result<Vec<NodeRef>, RepositoryError> {
        self.read("references", |inner, state, _| {
            let mut holders: Vec<Slot> = state
                .records
                .iter()
                .filter(|(_, record)| record.references.get(property) == Some(&self.slot))
                .map(|(slot, _)| *slot)
                .collect();
            holders.sort_unstable();
            holders
                .into_iter()
                .filter_map(|slot| inner.handle_at(state, slot))
                .collect()
        })
    }

    fn as_container(&self) -> Option<&dyn TileContainer> {
        self.container.map(|_| self as &dyn TileContainer)
    }
}

impl TileContainer for MemoryNode {
    fn kind(&self) -> ContainerKind {
        self.container.unwrap_or(ContainerKind::Page)
    }

    fn template(&self) -> Result<Option<NodeRef>, RepositoryError> {
        self.read("template", |inner, state, record| {
            record
                .references
                .get(&inner.template_property)
                .and_then(|target| inner.handle_at(state, *target))
        })
    }

    fn tiles(&self) -> Result<Vec<Tile>, RepositoryError> {
        self.read("tiles", |inner, state, record| {
            record
                .children
                .iter()
                .filter_map(|child| {
                    let child_record = state.records.get(child)?;
                    if child_record.node_type.as_deref() != Some(TILE_TYPE) {
                        return None;
                    }
                    Some(Tile {
                        id: child_record.properties.get(TILE_ID_PROPERTY).cloned(),
                        node: inner.handle(*child, child_record),
                    })
                })
                .collect()
        })
    }
}
