//! Cluster session tests against the simulated connector

use std::sync::Arc;
use std::time::Duration;

use clustersh_client::{CallError, NodeEndpoint};
use clustersh_common::auth::Credentials;
use clustersh_common::{payload, Request, Value};
use clustersh_session::simulation::{Behavior, SimCluster, SimConnector, SimNode};
use clustersh_session::{
    AnyReporterPolicy, CancellationToken, ClusterSession, Liveness, NodeError, SessionConfig, SessionError,
};
use tokio::time::Instant;

fn config() -> SessionConfig {
    SessionConfig {
        timeout_ms: 500,
        discovery_timeout_ms: 500,
        refresh_interval_ms: None,
        ..SessionConfig::default()
    }
}

fn session(cluster: &Arc<SimCluster>, seeds: &[&str], config: SessionConfig) -> ClusterSession<SimConnector> {
    let seeds = seeds.iter().map(NodeEndpoint::new).collect();
    ClusterSession::with_connector(SimConnector::new(cluster.clone()), seeds, config).unwrap()
}

fn info_node(id: &str) -> SimNode {
    SimNode::new(id).with_response("info", payload! { "node_id" => id, "build" => "7.1.0" })
}

#[tokio::test(start_paused = true)]
async fn test_slow_node_times_out_without_delaying_the_rest() {
    let cluster = SimCluster::new();
    cluster.add_node("10.0.0.1", info_node("A"));
    cluster.add_node("10.0.0.2", info_node("B"));
    let session = session(&cluster, &["10.0.0.1", "10.0.0.2"], config());

    let view = session.discover().await;
    assert_eq!(view.get("10.0.0.1:3000").unwrap().liveness, Liveness::Up);
    assert_eq!(view.get("10.0.0.2:3000").unwrap().liveness, Liveness::Up);

    cluster.set_behavior("10.0.0.2", Behavior::Delay(Duration::from_secs(2)));

    let started = Instant::now();
    let response = session
        .broadcast(&Request::command("info"), None, Duration::from_millis(500))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(600), "took {:?}", elapsed);
    assert_eq!(response.len(), 2);
    assert_eq!(
        response.get("10.0.0.1:3000").unwrap().as_ref().unwrap()["node_id"],
        Value::from("A")
    );
    assert_eq!(
        response.get("10.0.0.2:3000").unwrap().as_ref().unwrap_err(),
        &NodeError::Call(CallError::Timeout(500))
    );
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_returns_one_entry_per_target() {
    let cluster = SimCluster::new();
    let addresses = ["10.0.1.1", "10.0.1.2", "10.0.1.3", "10.0.1.4", "10.0.1.5"];
    for (i, address) in addresses.iter().enumerate() {
        cluster.add_node(address, info_node(&format!("N{}", i)));
    }
    let session = session(&cluster, &addresses, config());
    session.discover().await;

    cluster.set_behavior("10.0.1.2", Behavior::Refuse);
    cluster.set_behavior("10.0.1.3", Behavior::Delay(Duration::from_secs(30)));
    cluster.set_behavior("10.0.1.4", Behavior::Delay(Duration::from_secs(30)));

    let started = Instant::now();
    let response = session
        .broadcast(&Request::command("info"), None, Duration::from_millis(500))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(response.len(), 5);
    assert_eq!(response.contributors().len(), 2);
    assert_eq!(response.failures().filter(|(_, e)| e.is_timeout()).count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_connection_is_reopened_on_next_broadcast() {
    let cluster = SimCluster::new();
    cluster.add_node("10.0.0.1", info_node("A"));
    let session = session(&cluster, &["10.0.0.1"], config());
    session.discover().await;

    cluster.set_behavior("10.0.0.1", Behavior::Delay(Duration::from_secs(5)));
    let first = session
        .broadcast(&Request::command("info"), None, Duration::from_millis(100))
        .await
        .unwrap();
    assert!(first.get("10.0.0.1:3000").unwrap().as_ref().unwrap_err().is_timeout());

    cluster.set_behavior("10.0.0.1", Behavior::Respond);
    let second = session
        .broadcast(&Request::command("info"), None, Duration::from_millis(100))
        .await
        .unwrap();
    assert!(second.get("10.0.0.1:3000").unwrap().is_ok());
}

#[tokio::test]
async fn test_no_reachable_nodes() {
    let cluster = SimCluster::new();
    cluster.add_node("10.0.0.1", info_node("A").with_behavior(Behavior::Refuse));
    let session = session(&cluster, &["10.0.0.1"], config());

    let view = session.discover().await;
    assert_eq!(view.count(Liveness::Up), 0);

    let result = session.broadcast(&Request::command("info"), None, Duration::from_millis(500)).await;
    assert_eq!(result.unwrap_err(), SessionError::NoReachableNodes);
}

#[tokio::test]
async fn test_empty_seed_list_is_rejected() {
    let cluster = SimCluster::new();
    let result = ClusterSession::with_connector(SimConnector::new(cluster), Vec::new(), config());
    assert!(matches!(result, Err(SessionError::NoSeeds)));
}

#[tokio::test]
async fn test_subset_records_unavailable_nodes_without_contact() {
    let cluster = SimCluster::new();
    cluster.add_node("10.0.0.1", info_node("A"));
    cluster.add_node("10.0.0.2", info_node("B").with_behavior(Behavior::Refuse));
    let session = session(&cluster, &["10.0.0.1", "10.0.0.2"], config());
    session.discover().await;

    let subset = vec![
        "10.0.0.1:3000".to_string(),
        "10.0.0.2:3000".to_string(),
        "10.9.9.9:3000".to_string(),
    ];
    let response = session
        .broadcast(&Request::command("info"), Some(&subset), Duration::from_millis(500))
        .await
        .unwrap();

    assert_eq!(response.len(), 3);
    assert!(response.get("10.0.0.1:3000").unwrap().is_ok());
    assert_eq!(
        response.get("10.0.0.2:3000").unwrap().as_ref().unwrap_err(),
        &NodeError::Unavailable(Liveness::Unreachable)
    );
    assert_eq!(
        response.get("10.9.9.9:3000").unwrap().as_ref().unwrap_err(),
        &NodeError::NotMember
    );
    assert_eq!(cluster.calls_to("10.0.0.2", "info"), 0);
}

#[tokio::test]
async fn test_auth_failed_nodes_excluded_until_credentials_refresh() {
    let cluster = SimCluster::new();
    cluster.add_node("10.0.0.1", info_node("A"));
    cluster.add_node("10.0.0.2", info_node("B").with_behavior(Behavior::RejectCredentials));
    let session = session(&cluster, &["10.0.0.1", "10.0.0.2"], config());

    let view = session.discover().await;
    assert_eq!(view.get("10.0.0.2:3000").unwrap().liveness, Liveness::AuthFailed);

    let response = session
        .broadcast(&Request::command("info"), None, Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(response.len(), 1);

    // Still excluded on later discoveries, without being contacted
    let attempts = session.stats().get("10.0.0.2:3000").calls;
    cluster.set_behavior("10.0.0.2", Behavior::Respond);
    let view = session.discover().await;
    assert_eq!(view.get("10.0.0.2:3000").unwrap().liveness, Liveness::AuthFailed);
    assert_eq!(session.stats().get("10.0.0.2:3000").calls, attempts);

    let view = session.refresh_credentials(Credentials::password("admin", "new")).await;
    assert_eq!(view.get("10.0.0.2:3000").unwrap().liveness, Liveness::Up);
    assert_eq!(
        view.get("10.0.0.2:3000").unwrap().endpoint.credentials,
        Credentials::password("admin", "new")
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_returns_partial_response() {
    let cluster = SimCluster::new();
    cluster.add_node("10.0.0.1", info_node("A"));
    cluster.add_node("10.0.0.2", info_node("B"));
    let session = session(&cluster, &["10.0.0.1", "10.0.0.2"], config());
    session.discover().await;
    cluster.set_behavior("10.0.0.2", Behavior::Delay(Duration::from_secs(60)));

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let response = session
        .broadcast_with_cancel(&Request::command("info"), None, Duration::from_secs(30), &token)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(response.len(), 2);
    assert!(response.get("10.0.0.1:3000").unwrap().is_ok());
    assert_eq!(
        response.get("10.0.0.2:3000").unwrap().as_ref().unwrap_err(),
        &NodeError::Cancelled
    );
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_nodes_retried_with_backoff() {
    let cluster = SimCluster::new();
    cluster.add_node("10.0.0.1", info_node("A"));
    cluster.add_node("10.0.0.2", info_node("B").with_behavior(Behavior::Refuse));
    let session = session(&cluster, &["10.0.0.1", "10.0.0.2"], config());

    let view = session.discover().await;
    let b = view.get("10.0.0.2:3000").unwrap();
    assert_eq!(b.liveness, Liveness::Unreachable);
    assert_eq!(b.consecutive_failures, 1);
    assert_eq!(session.stats().get("10.0.0.2:3000").calls, 1);

    // Inside the 1s backoff window: not contacted
    session.discover().await;
    assert_eq!(session.stats().get("10.0.0.2:3000").calls, 1);

    tokio::time::advance(Duration::from_millis(1100)).await;
    let view = session.discover().await;
    assert_eq!(session.stats().get("10.0.0.2:3000").calls, 2);
    assert_eq!(view.get("10.0.0.2:3000").unwrap().consecutive_failures, 2);

    // Second failure doubles the wait
    tokio::time::advance(Duration::from_millis(1100)).await;
    session.discover().await;
    assert_eq!(session.stats().get("10.0.0.2:3000").calls, 2);

    cluster.set_behavior("10.0.0.2", Behavior::Respond);
    tokio::time::advance(Duration::from_secs(1)).await;
    let view = session.discover().await;
    assert!(view.get("10.0.0.2:3000").unwrap().is_up());
}

#[tokio::test]
async fn test_discovery_crawls_learned_peers() {
    let cluster = SimCluster::new();
    cluster.add_node(
        "10.0.0.1",
        info_node("A").with_peer("10.0.0.2", true).with_peer("10.0.0.3", false),
    );
    cluster.add_node("10.0.0.2", info_node("B").with_peer("10.0.0.1", true).with_peer("10.0.0.4", true));
    cluster.add_node("10.0.0.4", info_node("D").with_peer("10.0.0.2", true));
    let session = session(&cluster, &["10.0.0.1"], config());

    let view = session.discover().await;
    assert_eq!(view.generation(), 1);
    assert!(view.get("10.0.0.1:3000").unwrap().is_up());
    assert!(view.get("10.0.0.2:3000").unwrap().is_up());
    assert!(view.get("10.0.0.4:3000").unwrap().is_up());
    assert_eq!(view.get("10.0.0.3:3000").unwrap().liveness, Liveness::Down);
    assert_eq!(view.get("10.0.0.2:3000").unwrap().node_id.as_deref(), Some("B"));
}

#[tokio::test]
async fn test_decommissioned_peer_dropped_on_rediscovery() {
    let cluster = SimCluster::new();
    cluster.add_node("10.0.0.1", info_node("A").with_peer("10.0.0.2", true).with_peer("10.0.0.3", true));
    cluster.add_node("10.0.0.2", info_node("B").with_peer("10.0.0.1", true).with_peer("10.0.0.3", true));
    cluster.add_node("10.0.0.3", info_node("C").with_peer("10.0.0.1", true));
    let session = session(&cluster, &["10.0.0.1"], config());
    assert_eq!(session.discover().await.count(Liveness::Up), 3);

    // C leaves: nobody lists it and it no longer answers
    cluster.remove_node("10.0.0.3");
    cluster.add_node("10.0.0.1", info_node("A").with_peer("10.0.0.2", true));
    cluster.add_node("10.0.0.2", info_node("B").with_peer("10.0.0.1", true));

    let view = session.refresh().await;
    assert_eq!(view.len(), 2);
    assert!(view.get("10.0.0.3:3000").is_none());
    assert!(session.resolve_selectors(&["C".to_string()]).is_err());

    let response = session
        .broadcast(&Request::command("info"), None, Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(response.len(), 2);
}

#[tokio::test]
async fn test_members_kept_when_no_node_reports() {
    let cluster = SimCluster::new();
    cluster.add_node("10.0.0.1", info_node("A").with_peer("10.0.0.2", true));
    cluster.add_node("10.0.0.2", info_node("B").with_peer("10.0.0.1", true));
    let session = session(&cluster, &["10.0.0.1"], config());
    session.discover().await;

    cluster.set_behavior("10.0.0.1", Behavior::Refuse);
    cluster.set_behavior("10.0.0.2", Behavior::Refuse);
    let view = session.discover().await;
    assert_eq!(view.len(), 2);
    assert_eq!(view.get("10.0.0.2:3000").unwrap().liveness, Liveness::Unreachable);
}

#[tokio::test]
async fn test_seed_only_does_not_crawl() {
    let cluster = SimCluster::new();
    cluster.add_node("10.0.0.1", info_node("A").with_peer("10.0.0.2", true));
    cluster.add_node("10.0.0.2", info_node("B").with_peer("10.0.0.1", true));
    let session = session(
        &cluster,
        &["10.0.0.1"],
        SessionConfig {
            seed_only: true,
            ..config()
        },
    );

    let view = session.discover().await;
    assert_eq!(view.len(), 1);
    assert_eq!(cluster.calls_to("10.0.0.2", "peers"), 0);
}

#[tokio::test]
async fn test_policy_is_pluggable() {
    let cluster = SimCluster::new();
    // a and b see each other; c is isolated and claims x
    cluster.add_node("a", info_node("A").with_peer("b", true));
    cluster.add_node("b", info_node("B").with_peer("a", true));
    cluster.add_node("c", info_node("C").with_peer("x", true));
    cluster.add_node("x", info_node("X"));

    let majority = session(&cluster, &["a", "b", "c"], config());
    let view = majority.discover().await;
    assert_eq!(majority.policy_name(), "majority");
    assert!(view.get("x:3000").is_none());

    let permissive = session(&cluster, &["a", "b", "c"], config()).with_policy(AnyReporterPolicy);
    let view = permissive.discover().await;
    assert!(view.get("x:3000").unwrap().is_up());
}

#[tokio::test]
async fn test_generation_advances_and_cache_clears() {
    let cluster = SimCluster::new();
    cluster.add_node("10.0.0.1", info_node("A"));
    let session = session(&cluster, &["10.0.0.1"], config());

    assert_eq!(session.generation(), 0);
    session.discover().await;
    assert_eq!(session.generation(), 1);

    let response = session
        .broadcast(&Request::command("info"), None, Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(response.generation(), 1);
    assert!(session.cache().insert("info", Arc::new(response), 1));

    session.refresh().await;
    assert_eq!(session.generation(), 2);
    assert!(session.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_discover_if_stale() {
    let cluster = SimCluster::new();
    cluster.add_node("10.0.0.1", info_node("A"));
    let session = session(
        &cluster,
        &["10.0.0.1"],
        SessionConfig {
            refresh_interval_ms: Some(3000),
            ..config()
        },
    );

    assert!(session.discover_if_stale().await);
    assert!(!session.discover_if_stale().await);
    tokio::time::advance(Duration::from_secs(3)).await;
    assert!(session.discover_if_stale().await);
    assert_eq!(session.generation(), 2);
}

#[tokio::test]
async fn test_resolve_selectors() {
    let cluster = SimCluster::new();
    cluster.add_node("10.0.0.1", info_node("BB91"));
    cluster.add_node("10.0.0.2", info_node("BB92"));
    cluster.add_node("192.168.1.7", info_node("CC10"));
    let session = session(&cluster, &["10.0.0.1", "10.0.0.2", "192.168.1.7"], config());
    session.discover().await;

    let by_address = session.resolve_selectors(&["10.0.0.1:3000".to_string()]).unwrap();
    assert_eq!(by_address, vec!["10.0.0.1:3000".to_string()]);

    let by_id = session.resolve_selectors(&["BB92".to_string()]).unwrap();
    assert_eq!(by_id, vec!["10.0.0.2:3000".to_string()]);

    let by_prefix = session.resolve_selectors(&["192".to_string(), "CC".to_string()]).unwrap();
    assert_eq!(by_prefix, vec!["192.168.1.7:3000".to_string()]);

    match session.resolve_selectors(&["10.0".to_string()]) {
        Err(SessionError::AmbiguousSelector { candidates, .. }) => assert_eq!(candidates.len(), 2),
        other => panic!("expected ambiguity, got {:?}", other),
    }
    assert_eq!(
        session.resolve_selectors(&["nope".to_string()]).unwrap_err(),
        SessionError::UnknownSelector("nope".to_string())
    );
}
