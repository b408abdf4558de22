//! Markup ids for rendered tiles.
//!
//! Ids derive from a SHA-256 digest of the page identity and the tile's
//! position in document order, so the same page renders the same ids on every
//! node of a cluster without any shared counter.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::domain::node::{NodeIdentity, NodeKey};

const PAGE_HASH_HEX_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileTagId(String);

impl TileTagId {
    pub fn new(page: &NodeKey, position: usize) -> Self {
        Self::from_hash(&page_hash(page), position)
    }

    fn from_hash(page_hash: &str, position: usize) -> Self {
        Self(format!("tile-{page_hash}-{position}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileTagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out tag ids for one page in document order.
#[derive(Debug)]
pub struct TileTagIds {
    page_hash: String,
    next: usize,
}

impl TileTagIds {
    pub fn for_page(page: &NodeKey) -> Self {
        Self {
            page_hash: page_hash(page),
            next: 0,
        }
    }
}

impl Iterator for TileTagIds {
    type Item = TileTagId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = TileTagId::from_hash(&self.page_hash, self.next);
        self.next += 1;
        Some(id)
    }
}

fn page_hash(page: &NodeKey) -> String {
    let (kind, value) = match &page.identity {
        NodeIdentity::Identifier(id) => ("id", id.as_str()),
        NodeIdentity::Path(path) => ("path", path.as_str()),
    };
    let mut hasher = Sha256::new();
    for part in [page.workspace.as_str(), kind, value] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(PAGE_HASH_HEX_LEN);
    digest
}
