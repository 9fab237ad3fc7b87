//! Consistent-hash ring mapping request fingerprints to workers.
//!
//! Each worker contributes `virtual_nodes` positions on a ring ordered by a
//! 32-bit FNV-1a hash; a key is served by the first position clockwise from
//! its own hash, wrapping past the top. Adding or removing a worker only
//! relocates the keys in the affected arcs (~1/N of the keyspace).
//!
//! The hash must stay bit-compatible across processes: the router and any
//! tooling that predicts placement agree on `fnv1a_32` exactly.

use std::collections::{BTreeMap, HashMap, HashSet};

/// Ring positions per physical worker.
pub const DEFAULT_VIRTUAL_NODES: usize = 150;

/// 32-bit FNV-1a over raw bytes.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    let mut hash = OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Consistent-hash ring. Not internally synchronised; the owner serialises
/// access (the router keeps it behind a read-mostly lock and only mutates it
/// during startup registration).
#[derive(Debug, Clone)]
pub struct HashRing {
    ring: BTreeMap<u32, String>,
    virtual_nodes: usize,
}

impl HashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            ring: BTreeMap::new(),
            virtual_nodes,
        }
    }

    /// Insert all virtual nodes for `node`. Callers must not register the
    /// same node twice.
    pub fn add_node(&mut self, node: &str) {
        for i in 0..self.virtual_nodes {
            let position = fnv1a_32(format!("{}#{}", node, i).as_bytes());
            self.ring.insert(position, node.to_string());
        }
    }

    /// Remove all virtual nodes for `node`. A no-op if the node was never
    /// registered.
    pub fn remove_node(&mut self, node: &str) {
        for i in 0..self.virtual_nodes {
            let position = fnv1a_32(format!("{}#{}", node, i).as_bytes());
            self.ring.remove(&position);
        }
    }

    /// Worker owning `key`: the first ring position at or after the key's
    /// hash, wrapping to the lowest position. `None` on an empty ring.
    pub fn get_node(&self, key: &str) -> Option<&str> {
        let hash = fnv1a_32(key.as_bytes());
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node)| node.as_str())
    }

    /// Physical workers, each at most once, in ring order. The order is
    /// stable for an unchanged ring.
    pub fn all_nodes(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for node in self.ring.values() {
            if seen.insert(node.as_str()) {
                nodes.push(node.clone());
            }
        }
        nodes
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// How a set of keys spreads across workers. Test and diagnostics aid.
    pub fn distribution<'a, I>(&self, keys: I) -> HashMap<String, usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut spread = HashMap::new();
        for key in keys {
            if let Some(node) = self.get_node(key) {
                *spread.entry(node.to_string()).or_insert(0) += 1;
            }
        }
        spread
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}
