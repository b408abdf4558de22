use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use stencil::cache::{
    ArtifactCache, CacheConfig, Derive, DeriveError, InvalidationListener, Producer,
};
use stencil::domain::node::{NodeKey, NodeRef, RepositoryNode};
use stencil::infra::memory::{MemoryRepository, NodeSpec};
use stencil::render::{RenderContext, TileTagIds};

const WS: &str = "site";
const TEXT: &str = "site:text";

/// Renders a container as its resolved tiles, in tile id order.
struct PageView {
    repo: MemoryRepository,
    renders: AtomicUsize,
}

impl PageView {
    fn new(repo: MemoryRepository) -> Self {
        Self {
            repo,
            renders: AtomicUsize::new(0),
        }
    }

    fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

impl Derive<String> for PageView {
    fn derive(&self, node: &dyn RepositoryNode) -> Result<String, DeriveError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        let container = self.repo.node_at(node.workspace(), &node.path()?)?;
        let page = NodeKey::of(node)?;
        let mut ctx = RenderContext::new(&self.repo);
        let tiles = ctx.tile_map(&container)?;

        let mut html = String::new();
        for (tag, id) in TileTagIds::for_page(&page).zip(tiles.ids()) {
            let text = match tiles.get(id) {
                Some(tile) => tile.property(TEXT)?.unwrap_or_default(),
                None => String::new(),
            };
            html.push_str(&format!("<div id=\"{tag}\">{text}</div>"));
        }
        Ok(html)
    }
}

impl Producer<String> for PageView {
    fn producer_type(&self) -> &str {
        "page-view"
    }

    fn derivation(&self) -> Option<&dyn Derive<String>> {
        Some(self)
    }
}

struct Site {
    repo: MemoryRepository,
    cache: Arc<ArtifactCache<String>>,
    view: PageView,
}

impl Site {
    /// `/layout` (template) used by `/pages/a` and `/pages/b`; `/pages/c`
    /// defines its own tiles.
    fn new() -> Self {
        let repo = MemoryRepository::new();
        let cache: Arc<ArtifactCache<String>> = Arc::new(ArtifactCache::new());
        repo.register_listener(Arc::new(InvalidationListener::new(
            CacheConfig::default(),
            cache.clone(),
        )));

        repo.add_node(WS, "/", "pages", NodeSpec::folder()).expect("pages");
        repo.add_node(WS, "/", "archive", NodeSpec::folder()).expect("archive");
        repo.add_node(WS, "/", "layout", NodeSpec::template()).expect("layout");
        repo.add_node(WS, "/layout", "jcr:content", NodeSpec::content())
            .expect("layout content");
        repo.add_tile(WS, "/layout", "header", "header").expect("header");
        repo.set_property(WS, "/layout/header", TEXT, "Welcome")
            .expect("header text");
        for name in ["a", "b", "c"] {
            repo.add_node(WS, "/pages", name, NodeSpec::page()).expect("page");
        }
        repo.set_template(WS, "/pages/a", Some("/layout")).expect("a→layout");
        repo.set_template(WS, "/pages/b", Some("/layout")).expect("b→layout");
        repo.add_tile(WS, "/pages/c", "header", "header").expect("c header");
        repo.set_property(WS, "/pages/c/header", TEXT, "Standalone")
            .expect("c text");
        repo.save_all(WS);

        let view = PageView::new(repo.clone());
        Self { repo, cache, view }
    }

    fn render(&self, path: &str) -> Arc<String> {
        let node: NodeRef = self.repo.node_at(WS, path).expect("node");
        self.cache.get(&self.view, node.as_ref()).expect("render")
    }

    fn render_all(&self) {
        for path in ["/pages/a", "/pages/b", "/pages/c"] {
            self.render(path);
        }
    }
}

#[test]
fn template_tile_edit_rerenders_every_page_built_on_it() {
    let site = Site::new();
    site.render_all();
    assert_eq!(site.view.renders(), 3);
    assert!(site.render("/pages/a").contains("Welcome"));
    assert_eq!(site.view.renders(), 3);

    site.repo
        .set_property(WS, "/layout/header", TEXT, "Hello")
        .expect("edit tile");
    assert_eq!(site.repo.save(WS, "/layout"), 2);

    assert!(site.render("/pages/a").contains("Hello"));
    assert!(site.render("/pages/b").contains("Hello"));
    assert!(site.render("/pages/c").contains("Standalone"));
    assert_eq!(site.view.renders(), 5);
}

#[test]
fn tile_added_to_template_reaches_its_pages() {
    let site = Site::new();
    site.render_all();

    site.repo
        .add_tile(WS, "/layout", "footer", "footer")
        .expect("add tile");
    site.repo
        .set_property(WS, "/layout/footer", TEXT, "Goodbye")
        .expect("footer text");
    site.repo.save(WS, "/layout");

    assert!(site.render("/pages/a").contains("Goodbye"));
    assert!(!site.render("/pages/c").contains("Goodbye"));
    assert_eq!(site.view.renders(), 4);
}

#[test]
fn template_content_edit_rerenders_every_page_built_on_it() {
    let site = Site::new();
    site.render_all();

    site.repo
        .set_property(WS, "/layout/jcr:content", "title", "Layout")
        .expect("edit content");
    assert_eq!(site.repo.save(WS, "/layout"), 1);

    site.render_all();
    assert_eq!(site.view.renders(), 5);
}

#[test]
fn removing_a_template_rerenders_its_pages() {
    let site = Site::new();
    site.render_all();
    assert!(site.render("/pages/a").contains("Welcome"));

    site.repo.remove_node(WS, "/layout").expect("remove layout");
    assert_eq!(site.repo.save_all(WS), 3);

    assert!(!site.render("/pages/a").contains("Welcome"));
    assert!(!site.render("/pages/b").contains("Welcome"));
    assert!(site.render("/pages/c").contains("Standalone"));
    assert_eq!(site.view.renders(), 5);
}

#[test]
fn unsaved_changes_do_not_invalidate() {
    let site = Site::new();
    site.render_all();

    site.repo
        .set_property(WS, "/layout/jcr:content", "title", "Draft")
        .expect("edit");
    assert_eq!(site.repo.save(WS, "/pages"), 0);
    site.render_all();
    assert_eq!(site.view.renders(), 3);

    site.repo.discard(WS);
    assert_eq!(site.repo.save_all(WS), 0);
    assert_eq!(site.cache.len(), 3);
}

#[test]
fn save_is_scoped_to_the_saved_subtree() {
    let site = Site::new();
    site.render_all();

    site.repo
        .set_property(WS, "/pages/c", "title", "C")
        .expect("edit c");
    site.repo
        .set_property(WS, "/layout/jcr:content", "title", "Layout")
        .expect("edit layout");

    assert_eq!(site.repo.save(WS, "/pages"), 1);
    assert_eq!(site.cache.len(), 2);

    assert_eq!(site.repo.save(WS, "/layout"), 1);
    assert!(site.cache.is_empty());
}

#[test]
fn page_moved_out_of_saved_subtree_is_left_for_its_new_parent() {
    let site = Site::new();
    site.render_all();

    site.repo
        .set_property(WS, "/pages/a", "title", "A")
        .expect("edit a");
    site.repo
        .move_node(WS, "/pages/a", "/archive", "a")
        .expect("move a");

    assert_eq!(site.repo.save(WS, "/pages"), 0);
    assert_eq!(site.cache.len(), 3);

    assert_eq!(site.repo.save(WS, "/archive"), 2);
    assert_eq!(site.cache.len(), 2);
    site.render("/archive/a");
    assert_eq!(site.view.renders(), 4);
}

#[test]
fn removed_page_does_not_block_the_rest_of_the_batch() {
    let site = Site::new();
    site.render_all();

    site.repo.remove_node(WS, "/pages/c").expect("remove c");
    site.repo
        .set_property(WS, "/layout/jcr:content", "title", "Layout")
        .expect("edit layout");
    assert_eq!(site.repo.save_all(WS), 2);

    // The removed page's entry is orphaned; the template's users are gone.
    assert_eq!(site.cache.len(), 1);
    site.render("/pages/a");
    assert_eq!(site.view.renders(), 4);
}
