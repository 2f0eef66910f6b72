use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Counters for calls dispatched to one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeCallStats {
    pub calls: u64,
    pub failures: u64,
    pub last_latency_ms: Option<u64>,
}

/// Per-node call statistics for a session.
#[derive(Debug, Default)]
pub struct CallStats {
    nodes: Mutex<BTreeMap<String, NodeCallStats>>,
}

impl CallStats {
    pub fn record(&self, address: &str, latency: Duration, success: bool) {
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        let entry = nodes.entry(address.to_string()).or_default();
        entry.calls += 1;
        if !success {
            entry.failures += 1;
        }
        entry.last_latency_ms = Some(latency.as_millis() as u64);
    }

    pub fn snapshot(&self) -> BTreeMap<String, NodeCallStats> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn get(&self, address: &str) -> NodeCallStats {
        self.nodes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .cloned()
            .unwrap_or_default()
    }
}
