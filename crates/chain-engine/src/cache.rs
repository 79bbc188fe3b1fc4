//! Reference-counted output cache
//!
//! Each node's outputs are kept exactly as long as they have readers left.
//! A cache may have a parent: lookups fall through to it on a local miss,
//! while writes always stay local. Stream iterations use a child cache per
//! item so per-item values never leak into the outer scope.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::chain::Chain;
use crate::lineage::stream_fed_nodes;
use crate::types::NodeId;

/// How long a cached value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStrategy {
    /// Never expires
    Static,
    /// Evicted after this many reads; zero means the value is never stored
    Counted(usize),
}

impl CacheStrategy {
    pub const STATIC: CacheStrategy = CacheStrategy::Static;
    pub const NO_CACHING: CacheStrategy = CacheStrategy::Counted(0);

    pub fn new(hits_to_live: usize) -> Self {
        Self::Counted(hits_to_live)
    }

    /// Remaining reads, `None` for static entries
    pub fn hits_to_live(&self) -> Option<usize> {
        match self {
            Self::Static => None,
            Self::Counted(hits) => Some(*hits),
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static)
    }

    pub fn no_caching(&self) -> bool {
        matches!(self, Self::Counted(0))
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    remaining: CacheStrategy,
}

/// Output cache keyed by node id, with an optional parent scope
#[derive(Debug)]
pub struct OutputCache<T> {
    entries: Mutex<HashMap<NodeId, CacheEntry<T>>>,
    parent: Option<Arc<OutputCache<T>>>,
}

impl<T: Clone> OutputCache<T> {
    /// Create a root cache
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            parent: None,
        }
    }

    /// Create a cache that reads through to `parent` on a local miss
    pub fn with_parent(parent: Arc<OutputCache<T>>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            parent: Some(parent),
        }
    }

    /// Create a child scope of this cache
    pub fn child(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self::with_parent(Arc::clone(self)))
    }

    pub fn parent(&self) -> Option<&Arc<OutputCache<T>>> {
        self.parent.as_ref()
    }

    /// Whether a value is visible from this scope
    pub fn has(&self, node_id: &str) -> bool {
        if self.entries.lock().contains_key(node_id) {
            return true;
        }
        self.parent
            .as_ref()
            .is_some_and(|parent| parent.has(node_id))
    }

    /// Read a value, consuming one hit of a counted entry
    pub fn get(&self, node_id: &str) -> Option<T> {
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(node_id) {
                let value = entry.value.clone();
                if let CacheStrategy::Counted(remaining) = entry.remaining {
                    if remaining <= 1 {
                        entries.remove(node_id);
                    } else {
                        entry.remaining = CacheStrategy::Counted(remaining - 1);
                    }
                }
                return Some(value);
            }
        }
        self.parent.as_ref().and_then(|parent| parent.get(node_id))
    }

    /// Store a value in this scope
    ///
    /// A `no_caching` strategy discards the value.
    pub fn set(&self, node_id: impl Into<NodeId>, value: T, strategy: CacheStrategy) {
        if strategy.no_caching() {
            return;
        }
        self.entries.lock().insert(
            node_id.into(),
            CacheEntry {
                value,
                remaining: strategy,
            },
        );
    }

    /// Remove a local entry
    pub fn delete(&self, node_id: &str) -> bool {
        self.entries.lock().remove(node_id).is_some()
    }

    pub fn delete_many<'a>(&self, node_ids: impl IntoIterator<Item = &'a NodeId>) {
        let mut entries = self.entries.lock();
        for node_id in node_ids {
            entries.remove(node_id);
        }
    }

    /// Remove all local entries; the parent is untouched
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Keys visible from this scope (local and inherited)
    pub fn keys(&self) -> HashSet<NodeId> {
        let mut keys: HashSet<NodeId> = self.entries.lock().keys().cloned().collect();
        if let Some(parent) = &self.parent {
            keys.extend(parent.keys());
        }
        keys
    }

    /// Number of local entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<T: Clone> Default for OutputCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the cache strategy of every node
///
/// A node lives for as many reads as it has consuming edges. A side-effect
/// node with consumers is also read once as an execution root, so it gets
/// one extra read. Nodes read from inside a stream region are read once per
/// item, so they are kept for the whole execution.
pub fn get_cache_strategies(chain: &Chain) -> HashMap<NodeId, CacheStrategy> {
    let stream_fed = stream_fed_nodes(chain);

    chain
        .nodes()
        .map(|node| {
            let edges = chain.edges_from(&node.id);
            let read_per_item = !stream_fed.contains(&node.id)
                && !node.kind.is_stream_source()
                && edges.iter().any(|e| stream_fed.contains(&e.target.node_id));

            let strategy = if read_per_item {
                CacheStrategy::STATIC
            } else if node.side_effects && !edges.is_empty() {
                CacheStrategy::new(edges.len() + 1)
            } else {
                CacheStrategy::new(edges.len())
            };
            (node.id.clone(), strategy)
        })
        .collect()
}
