use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use clustersh_client::{CallError, Channel, Connector, NodeEndpoint, TcpConnector};
use clustersh_common::auth::Credentials;
use clustersh_common::{Payload, Request};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::AggregatedResponse;
use crate::cache::SessionCache;
use crate::config::SessionConfig;
use crate::error::{NodeError, Result, SessionError};
use crate::membership::{MajorityPolicy, MembershipPolicy, MembershipReport};
use crate::node::{Liveness, NodeState};
use crate::stats::CallStats;
use crate::view::ClusterView;

/// Connection slot for one node. Owns at most one open channel.
struct NodeSlot<T> {
    conn: Option<T>,
    /// Credentials were rejected; the node is not contacted again until
    /// they are refreshed.
    auth_failed: bool,
}

impl<T> NodeSlot<T> {
    fn empty() -> Self {
        Self {
            conn: None,
            auth_failed: false,
        }
    }
}

/// A live session against one cluster.
///
/// Owns the per-node connection slots, the published [`ClusterView`] and the
/// [`SessionCache`]. All state is scoped to the session value, so several
/// sessions can live side by side in one process.
///
/// # Example
///
/// ```no_run
/// use clustersh_client::NodeEndpoint;
/// use clustersh_common::Request;
/// use clustersh_session::{ClusterSession, SessionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let session = ClusterSession::new(vec![NodeEndpoint::new("10.0.0.1")], SessionConfig::default())?;
/// let view = session.discover().await;
/// println!("generation {} with {} nodes", view.generation(), view.len());
///
/// let response = session
///     .broadcast(&Request::command("statistics"), None, session.config().timeout())
///     .await?;
/// for (address, outcome) in response.entries() {
///     println!("{}: {:?}", address, outcome);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ClusterSession<C: Connector = TcpConnector> {
    connector: C,
    config: SessionConfig,
    seeds: ArcSwap<Vec<NodeEndpoint>>,
    policy: Box<dyn MembershipPolicy>,
    view: ArcSwap<ClusterView>,
    cache: SessionCache,
    slots: RwLock<HashMap<String, Arc<Mutex<NodeSlot<C::Conn>>>>>,
    stats: CallStats,
    /// Serializes discoveries
    discovery: Mutex<()>,
}

impl ClusterSession<TcpConnector> {
    /// Creates a session that reaches nodes over TCP or TLS.
    pub fn new(seeds: Vec<NodeEndpoint>, config: SessionConfig) -> Result<Self> {
        Self::with_connector(TcpConnector, seeds, config)
    }
}

impl<C: Connector> ClusterSession<C> {
    /// Creates a session with a custom connector.
    ///
    /// No node is contacted until the first [`discover`](Self::discover).
    /// Duplicate seeds are dropped.
    pub fn with_connector(connector: C, seeds: Vec<NodeEndpoint>, config: SessionConfig) -> Result<Self> {
        let mut unique = Vec::with_capacity(seeds.len());
        for seed in seeds {
            if !unique.contains(&seed) {
                unique.push(seed);
            }
        }
        if unique.is_empty() {
            return Err(SessionError::NoSeeds);
        }

        Ok(Self {
            connector,
            config,
            seeds: ArcSwap::from_pointee(unique),
            policy: Box::new(MajorityPolicy),
            view: ArcSwap::from_pointee(ClusterView::default()),
            cache: SessionCache::new(),
            slots: RwLock::new(HashMap::new()),
            stats: CallStats::default(),
            discovery: Mutex::new(()),
        })
    }

    /// Replaces the membership policy used by discovery.
    pub fn with_policy(mut self, policy: impl MembershipPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Snapshot of the current view.
    pub fn view(&self) -> Arc<ClusterView> {
        self.view.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.view.load().generation()
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn stats(&self) -> &CallStats {
        &self.stats
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn seeds(&self) -> Arc<Vec<NodeEndpoint>> {
        self.seeds.load_full()
    }

    /// Rebuilds the cluster view.
    ///
    /// Contacts the seeds and every known member due for a retry, asks each
    /// for its membership report and reconciles the reports through the
    /// membership policy. Newly learned peers are contacted in further waves
    /// until no new peer turns up, unless the session is seed-only. The new
    /// view carries the next generation and replaces the old one in a single
    /// store; cached responses from older generations are dropped.
    pub async fn discover(&self) -> Arc<ClusterView> {
        self.rediscover(None).await
    }

    async fn rediscover(&self, credentials: Option<&Credentials>) -> Arc<ClusterView> {
        let _guard = self.discovery.lock().await;

        let old = self.view.load_full();
        let seeds = self.seeds.load_full();
        let now = Instant::now();
        let timeout = self.config.discovery_timeout();

        let mut nodes: BTreeMap<String, NodeState> = if self.config.seed_only {
            BTreeMap::new()
        } else {
            old.node_map().clone()
        };
        for seed in seeds.iter() {
            nodes
                .entry(seed.address.clone())
                .or_insert_with(|| old.get(&seed.address).cloned().unwrap_or_else(|| NodeState::new(seed.clone())));
        }
        if let Some(credentials) = credentials {
            for state in nodes.values_mut() {
                state.endpoint.credentials = credentials.clone();
                if state.liveness == Liveness::AuthFailed {
                    *state = NodeState::new(state.endpoint.clone());
                }
            }
        }

        // Learned peers inherit the first seed's credentials and TLS settings
        let template = match seeds.first() {
            Some(seed) => seed.clone(),
            None => return old,
        };

        let mut reports: Vec<MembershipReport> = Vec::new();
        let mut contacted: BTreeSet<String> = BTreeSet::new();
        let mut wave: Vec<NodeEndpoint> = nodes
            .values()
            .filter(|n| n.should_contact(now))
            .map(|n| n.endpoint.clone())
            .collect();

        while !wave.is_empty() {
            contacted.extend(wave.iter().map(|e| e.address.clone()));

            for (address, outcome) in self.query_membership(&wave, timeout).await {
                let Some(state) = nodes.get_mut(&address) else {
                    continue;
                };
                match outcome {
                    Ok(report) => {
                        state.mark_up(report.node_id.clone());
                        reports.push(report);
                    }
                    Err(e) if e.is_auth_failure() => {
                        warn!(address = %address, error = %e, "credentials rejected");
                        state.mark_auth_failed(e.to_string());
                    }
                    Err(e) => {
                        debug!(address = %address, error = %e, "node unreachable during discovery");
                        state.mark_unreachable(e.to_string(), &self.config.backoff, now);
                    }
                }
            }

            if self.config.seed_only {
                break;
            }

            let included = self.policy.reconcile(&reports);
            wave = included
                .into_iter()
                .filter(|address| !contacted.contains(address))
                .filter_map(|address| {
                    let state = nodes
                        .entry(address.clone())
                        .or_insert_with(|| NodeState::new(template.sibling(&address)));
                    state.should_contact(now).then(|| state.endpoint.clone())
                })
                .collect();
        }

        // Peers only ever reported unreachable are known but down
        if !self.config.seed_only {
            for report in &reports {
                for peer in report.peers.iter().filter(|p| !p.reachable) {
                    if !contacted.contains(&peer.address) {
                        nodes
                            .entry(peer.address.clone())
                            .or_insert_with(|| NodeState::new(template.sibling(&peer.address)))
                            .mark_down();
                    }
                }
            }
        }

        // Learned nodes nobody reports any more have left the cluster. With no
        // report at all there is nothing to judge by, so keep the old members.
        if !self.config.seed_only && !reports.is_empty() {
            let mentioned: BTreeSet<&str> = reports
                .iter()
                .flat_map(|r| std::iter::once(r.reporter.as_str()).chain(r.peers.iter().map(|p| p.address.as_str())))
                .collect();
            let before = nodes.len();
            nodes.retain(|address, _| {
                seeds.iter().any(|s| &s.address == address) || mentioned.contains(address.as_str())
            });
            if nodes.len() < before {
                info!(removed = before - nodes.len(), "dropped nodes no longer reported by the cluster");
            }
        }

        self.close_unusable(&nodes).await;

        let view = Arc::new(ClusterView::new(old.generation() + 1, nodes, Instant::now()));
        self.view.store(view.clone());
        self.cache.clear();

        info!(
            generation = view.generation(),
            up = view.count(Liveness::Up),
            total = view.len(),
            policy = self.policy.name(),
            "cluster discovery complete"
        );
        view
    }

    /// Runs [`discover`](Self::discover) when no discovery has happened yet or
    /// the refresh interval has elapsed. Returns whether it ran.
    pub async fn discover_if_stale(&self) -> bool {
        let discovered_at = self.view.load().discovered_at();
        let stale = match (discovered_at, self.config.refresh_interval()) {
            (None, _) => true,
            (Some(at), Some(interval)) => at.elapsed() >= interval,
            (Some(_), None) => false,
        };
        if stale {
            self.discover().await;
        }
        stale
    }

    /// Forces a discovery and empties the cache.
    pub async fn refresh(&self) -> Arc<ClusterView> {
        let view = self.discover().await;
        self.cache.clear();
        view
    }

    /// Swaps in new credentials, forgets every rejection and rediscovers.
    ///
    /// Open connections are dropped since they logged in with the old
    /// credentials.
    pub async fn refresh_credentials(&self, credentials: Credentials) -> Arc<ClusterView> {
        let seeds: Vec<NodeEndpoint> = self
            .seeds
            .load()
            .iter()
            .map(|s| s.clone().with_credentials(credentials.clone()))
            .collect();
        self.seeds.store(Arc::new(seeds));

        let slots: Vec<_> = self.slots.read().await.values().cloned().collect();
        for slot in slots {
            let mut slot = slot.lock().await;
            slot.conn = None;
            slot.auth_failed = false;
        }

        let view = self.rediscover(Some(&credentials)).await;
        self.cache.clear();
        view
    }

    /// Resolves node selectors to member addresses.
    ///
    /// A selector matches a node by exact address, by node id, or as a
    /// prefix of exactly one address or node id.
    pub fn resolve_selectors(&self, selectors: &[String]) -> Result<Vec<String>> {
        let view = self.view.load();
        let mut resolved = BTreeSet::new();

        for selector in selectors.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            if view.get(selector).is_some() {
                resolved.insert(selector.to_string());
                continue;
            }

            let by_id: Vec<&NodeState> = view
                .nodes()
                .filter(|n| n.node_id.as_deref() == Some(selector))
                .collect();
            if let [node] = by_id.as_slice() {
                resolved.insert(node.address().to_string());
                continue;
            }

            let by_prefix: BTreeSet<String> = view
                .nodes()
                .filter(|n| {
                    n.address().starts_with(selector)
                        || n.node_id.as_deref().is_some_and(|id| id.starts_with(selector))
                })
                .map(|n| n.address().to_string())
                .collect();
            match by_prefix.len() {
                0 => return Err(SessionError::UnknownSelector(selector.to_string())),
                1 => resolved.extend(by_prefix),
                _ => {
                    return Err(SessionError::AmbiguousSelector {
                        selector: selector.to_string(),
                        candidates: by_prefix.into_iter().collect(),
                    })
                }
            }
        }

        Ok(resolved.into_iter().collect())
    }

    /// Sends `request` to every node of `subset` (default: all Up nodes)
    /// concurrently and collects one outcome per node.
    ///
    /// Each node gets its own `timeout`, covering connection setup and the
    /// call, and all nodes start together, so the whole broadcast completes
    /// within one timeout. Subset entries that are not Up are recorded as
    /// errors without being contacted.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoReachableNodes`] when no targeted node is Up.
    pub async fn broadcast(
        &self,
        request: &Request,
        subset: Option<&[String]>,
        timeout: Duration,
    ) -> Result<AggregatedResponse> {
        self.broadcast_with_cancel(request, subset, timeout, &CancellationToken::new())
            .await
    }

    /// Like [`broadcast`](Self::broadcast), but returns as soon as `cancel`
    /// fires. Nodes that had not answered are recorded as
    /// [`NodeError::Cancelled`] and their in-flight calls are dropped.
    pub async fn broadcast_with_cancel(
        &self,
        request: &Request,
        subset: Option<&[String]>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AggregatedResponse> {
        let view = self.view.load_full();
        let mut response = AggregatedResponse::new(view.generation());

        let targets: BTreeSet<String> = match subset {
            Some(addresses) => addresses.iter().cloned().collect(),
            None => view.up_addresses().into_iter().collect(),
        };

        let mut dispatch: Vec<NodeEndpoint> = Vec::with_capacity(targets.len());
        for address in targets {
            match view.get(&address) {
                None => response.insert(address, Err(NodeError::NotMember)),
                Some(node) if !node.is_up() => response.insert(address, Err(NodeError::Unavailable(node.liveness))),
                Some(node) => {
                    if self.is_auth_failed(&address).await {
                        response.insert(address, Err(NodeError::Unavailable(Liveness::AuthFailed)));
                    } else {
                        dispatch.push(node.endpoint.clone());
                    }
                }
            }
        }

        if dispatch.is_empty() {
            return Err(SessionError::NoReachableNodes);
        }

        debug!(command = %request.command, nodes = dispatch.len(), "broadcasting");

        let mut pending: BTreeSet<String> = dispatch.iter().map(|e| e.address.clone()).collect();
        let mut in_flight: FuturesUnordered<_> = dispatch
            .iter()
            .map(|endpoint| {
                let request = request.reissue();
                async move {
                    let outcome = self.dispatch(endpoint, &request, timeout).await;
                    (endpoint.address.clone(), outcome)
                }
            })
            .collect();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(outstanding = pending.len(), "broadcast cancelled");
                    break;
                }
                next = in_flight.next() => match next {
                    Some((address, outcome)) => {
                        if let Err(e) = &outcome {
                            log_node_failure(&address, &request.command, e);
                        }
                        pending.remove(&address);
                        response.insert(address, outcome);
                    }
                    None => break,
                },
            }
        }
        drop(in_flight);

        for address in pending {
            response.insert(address, Err(NodeError::Cancelled));
        }

        Ok(response)
    }

    /// One bounded call to one node, with call statistics recorded.
    async fn dispatch(&self, endpoint: &NodeEndpoint, request: &Request, timeout: Duration) -> std::result::Result<Payload, NodeError> {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, self.call_node(endpoint, request, timeout)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(NodeError::Call(CallError::Timeout(timeout.as_millis() as u64))),
        };
        self.stats.record(&endpoint.address, started.elapsed(), outcome.is_ok());
        outcome
    }

    /// Calls one node through its slot, opening a connection when the slot
    /// has none or holds a failed one.
    async fn call_node(&self, endpoint: &NodeEndpoint, request: &Request, timeout: Duration) -> std::result::Result<Payload, NodeError> {
        let slot = self.slot(&endpoint.address).await;
        let mut slot = slot.lock().await;

        if slot.auth_failed {
            return Err(NodeError::Unavailable(Liveness::AuthFailed));
        }

        let healthy = slot.conn.as_ref().is_some_and(|c| c.is_healthy());
        if !healthy {
            slot.conn = None;
            match self.connector.open(endpoint, timeout).await {
                Ok(conn) => slot.conn = Some(conn),
                Err(e) => {
                    if !e.is_retryable() {
                        slot.auth_failed = true;
                    }
                    return Err(NodeError::Connect(e));
                }
            }
        }

        let Some(conn) = slot.conn.as_mut() else {
            return Err(NodeError::Call(CallError::ConnectionFailed(endpoint.address.clone())));
        };
        match conn.call(request, timeout).await {
            Ok(payload) => Ok(payload),
            Err(e) => {
                slot.conn = None;
                Err(NodeError::Call(e))
            }
        }
    }

    async fn query_membership(
        &self,
        wave: &[NodeEndpoint],
        timeout: Duration,
    ) -> Vec<(String, std::result::Result<MembershipReport, NodeError>)> {
        let request = Request::command(self.config.membership_command.clone());
        wave.iter()
            .map(|endpoint| {
                let request = request.reissue();
                async move {
                    let outcome = self.dispatch(endpoint, &request, timeout).await.and_then(|payload| {
                        MembershipReport::from_payload(&endpoint.address, &payload)
                            .map_err(|e| NodeError::Call(CallError::Protocol(e)))
                    });
                    (endpoint.address.clone(), outcome)
                }
            })
            .collect::<FuturesUnordered<_>>()
            .collect()
            .await
    }

    async fn slot(&self, address: &str) -> Arc<Mutex<NodeSlot<C::Conn>>> {
        if let Some(slot) = self.slots.read().await.get(address) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(NodeSlot::empty())))
            .clone()
    }

    async fn is_auth_failed(&self, address: &str) -> bool {
        let slot = self.slots.read().await.get(address).cloned();
        match slot {
            Some(slot) => slot.lock().await.auth_failed,
            None => false,
        }
    }

    /// Drops open connections to nodes the new view does not hold Up, and the
    /// slots of nodes it no longer holds at all.
    async fn close_unusable(&self, nodes: &BTreeMap<String, NodeState>) {
        let mut slots = self.slots.write().await;
        slots.retain(|address, _| nodes.contains_key(address));
        for (address, slot) in slots.iter() {
            if !nodes.get(address).is_some_and(|n| n.is_up()) {
                slot.lock().await.conn = None;
            }
        }
    }
}

fn log_node_failure(address: &str, command: &str, error: &NodeError) {
    match error {
        NodeError::Call(CallError::Protocol(reason)) => {
            warn!(address, command, reason = %reason, "unexpected protocol error")
        }
        NodeError::Cancelled => {}
        other => warn!(address, command, error = %other, "node call failed"),
    }
}
