use std::collections::BTreeMap;

use clustersh_common::Payload;

use crate::error::NodeError;

/// Per-node outcomes of one broadcast.
///
/// Holds exactly one entry for every node the broadcast targeted, keyed by
/// address. Stamped with the view generation it was collected under.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedResponse {
    generation: u64,
    entries: BTreeMap<String, Result<Payload, NodeError>>,
}

impl AggregatedResponse {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, address: impl Into<String>, outcome: Result<Payload, NodeError>) {
        self.entries.insert(address.into(), outcome);
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &Result<Payload, NodeError>)> {
        self.entries.iter()
    }

    pub fn get(&self, address: &str) -> Option<&Result<Payload, NodeError>> {
        self.entries.get(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn successes(&self) -> impl Iterator<Item = (&String, &Payload)> {
        self.entries
            .iter()
            .filter_map(|(addr, outcome)| outcome.as_ref().ok().map(|p| (addr, p)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&String, &NodeError)> {
        self.entries
            .iter()
            .filter_map(|(addr, outcome)| outcome.as_ref().err().map(|e| (addr, e)))
    }

    /// Addresses that returned data.
    pub fn contributors(&self) -> Vec<String> {
        self.successes().map(|(addr, _)| addr.clone()).collect()
    }

    pub fn has_successes(&self) -> bool {
        self.successes().next().is_some()
    }
}
