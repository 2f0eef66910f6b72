//! In-process simulated cluster.
//!
//! [`SimConnector`] implements [`Connector`] over a table of simulated
//! nodes, so sessions and executors can be exercised deterministically
//! without sockets. Each node can answer normally, answer after a delay,
//! refuse connections or reject credentials. Every call is counted per node
//! and command.
//!
//! Built only for this crate's tests and under the `sim` feature.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use clustersh_client::{CallError, Channel, ConnectError, Connector, NodeEndpoint};
use clustersh_common::{Payload, Request, Value, LOGIN_COMMAND, PEERS_COMMAND};

#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    Respond,
    /// Answer every call after this delay
    Delay(Duration),
    /// Connection attempts fail with a network error
    Refuse,
    /// Connection attempts fail with an authentication error
    RejectCredentials,
}

#[derive(Debug, Clone)]
pub struct SimNode {
    pub node_id: String,
    /// Peer address and whether this node reports it reachable
    pub peers: Vec<(String, bool)>,
    pub responses: HashMap<String, Payload>,
    pub behavior: Behavior,
}

impl SimNode {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            peers: Vec::new(),
            responses: HashMap::new(),
            behavior: Behavior::Respond,
        }
    }

    pub fn with_peer(mut self, address: impl AsRef<str>, reachable: bool) -> Self {
        self.peers.push((NodeEndpoint::new(address).address, reachable));
        self
    }

    pub fn with_response(mut self, command: impl Into<String>, payload: Payload) -> Self {
        self.responses.insert(command.into(), payload);
        self
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    fn membership(&self) -> Payload {
        let peers = self
            .peers
            .iter()
            .map(|(address, reachable)| {
                let mut peer = Payload::new();
                peer.insert("address".to_string(), Value::from(address.as_str()));
                peer.insert("reachable".to_string(), Value::from(*reachable));
                Value::Map(peer)
            })
            .collect();
        let mut payload = Payload::new();
        payload.insert("node_id".to_string(), Value::from(self.node_id.as_str()));
        payload.insert("peers".to_string(), Value::List(peers));
        payload
    }
}

/// The simulated nodes, keyed by normalized address.
#[derive(Debug, Default)]
pub struct SimCluster {
    nodes: Mutex<HashMap<String, SimNode>>,
    calls: Mutex<HashMap<(String, String), usize>>,
}

impl SimCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn nodes(&self) -> MutexGuard<'_, HashMap<String, SimNode>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_node(&self, address: impl AsRef<str>, node: SimNode) {
        self.nodes().insert(NodeEndpoint::new(address).address, node);
    }

    pub fn remove_node(&self, address: impl AsRef<str>) {
        self.nodes().remove(&NodeEndpoint::new(address).address);
    }

    pub fn set_behavior(&self, address: impl AsRef<str>, behavior: Behavior) {
        if let Some(node) = self.nodes().get_mut(&NodeEndpoint::new(address).address) {
            node.behavior = behavior;
        }
    }

    pub fn set_response(&self, address: impl AsRef<str>, command: impl Into<String>, payload: Payload) {
        if let Some(node) = self.nodes().get_mut(&NodeEndpoint::new(address).address) {
            node.responses.insert(command.into(), payload);
        }
    }

    fn node(&self, address: &str) -> Option<SimNode> {
        self.nodes().get(address).cloned()
    }

    fn record_call(&self, address: &str, command: &str) {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        *calls.entry((address.to_string(), command.to_string())).or_default() += 1;
    }

    /// Calls of `command` across all nodes.
    pub fn calls_for(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|((_, c), _)| c == command)
            .map(|(_, n)| *n)
            .sum()
    }

    /// Calls of `command` made to one node.
    pub fn calls_to(&self, address: impl AsRef<str>, command: &str) -> usize {
        let address = NodeEndpoint::new(address).address;
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(address, command.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct SimConnector {
    cluster: Arc<SimCluster>,
}

impl SimConnector {
    pub fn new(cluster: Arc<SimCluster>) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl Connector for SimConnector {
    type Conn = SimChannel;

    async fn open(&self, endpoint: &NodeEndpoint, _timeout: Duration) -> Result<SimChannel, ConnectError> {
        let address = endpoint.address.as_str();
        let node = self
            .cluster
            .node(address)
            .ok_or_else(|| ConnectError::network(address, "no route to host"))?;

        match node.behavior {
            Behavior::Refuse => Err(ConnectError::network(address, "connection refused")),
            Behavior::RejectCredentials => Err(ConnectError::AuthFailed {
                address: address.to_string(),
                reason: "invalid credentials".to_string(),
            }),
            Behavior::Respond | Behavior::Delay(_) => {
                if endpoint.credentials.requires_login() {
                    self.cluster.record_call(address, LOGIN_COMMAND);
                }
                Ok(SimChannel {
                    address: address.to_string(),
                    cluster: self.cluster.clone(),
                    failed: false,
                })
            }
        }
    }
}

/// Channel to one simulated node.
#[derive(Debug)]
pub struct SimChannel {
    address: String,
    cluster: Arc<SimCluster>,
    failed: bool,
}

#[async_trait]
impl Channel for SimChannel {
    async fn call(&mut self, request: &Request, _timeout: Duration) -> Result<Payload, CallError> {
        if self.failed {
            return Err(CallError::ConnectionFailed(self.address.clone()));
        }
        self.failed = true;
        self.cluster.record_call(&self.address, &request.command);

        let node = self
            .cluster
            .node(&self.address)
            .ok_or_else(|| CallError::Disconnected(format!("{}: node went away", self.address)))?;

        match node.behavior {
            Behavior::Delay(delay) => tokio::time::sleep(delay).await,
            Behavior::Refuse => return Err(CallError::Disconnected(format!("{}: connection reset", self.address))),
            Behavior::Respond | Behavior::RejectCredentials => {}
        }

        let reply = if request.command == PEERS_COMMAND {
            node.membership()
        } else {
            node.responses
                .get(&request.command)
                .cloned()
                .ok_or_else(|| CallError::Remote(format!("unknown command '{}'", request.command)))?
        };

        self.failed = false;
        Ok(reply)
    }

    fn is_healthy(&self) -> bool {
        !self.failed
    }
}
