use std::collections::BTreeMap;

use tokio::time::Instant;

use crate::node::{Liveness, NodeState};

/// The believed membership of the cluster.
///
/// A view is never mutated once published. Discovery builds a new one with
/// the next generation and swaps it in whole.
#[derive(Debug, Clone, Default)]
pub struct ClusterView {
    generation: u64,
    nodes: BTreeMap<String, NodeState>,
    discovered_at: Option<Instant>,
}

impl ClusterView {
    pub(crate) fn new(generation: u64, nodes: BTreeMap<String, NodeState>, discovered_at: Instant) -> Self {
        Self {
            generation,
            nodes,
            discovered_at: Some(discovered_at),
        }
    }

    /// Incremented by every discovery. Zero before the first one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn discovered_at(&self) -> Option<Instant> {
        self.discovered_at
    }

    /// Every known node, ordered by address.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeState> {
        self.nodes.values()
    }

    pub fn get(&self, address: &str) -> Option<&NodeState> {
        self.nodes.get(address)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn up_nodes(&self) -> impl Iterator<Item = &NodeState> {
        self.nodes.values().filter(|n| n.is_up())
    }

    pub fn up_addresses(&self) -> Vec<String> {
        self.up_nodes().map(|n| n.address().to_string()).collect()
    }

    pub fn count(&self, liveness: Liveness) -> usize {
        self.nodes.values().filter(|n| n.liveness == liveness).count()
    }

    pub(crate) fn node_map(&self) -> &BTreeMap<String, NodeState> {
        &self.nodes
    }
}
