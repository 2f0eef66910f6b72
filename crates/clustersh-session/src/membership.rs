//! Membership reports and their reconciliation.
//!
//! During discovery every contacted node answers with the peers it sees and
//! whether it can reach them. A [`MembershipPolicy`] turns the set of reports
//! into the peers the session should believe in.

use std::collections::BTreeSet;

use clustersh_client::NodeEndpoint;
use clustersh_common::{Payload, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerReport {
    pub address: String,
    pub reachable: bool,
}

/// One node's answer to the membership query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipReport {
    pub reporter: String,
    pub node_id: Option<String>,
    pub peers: Vec<PeerReport>,
}

impl MembershipReport {
    /// Parses a membership reply.
    ///
    /// `peers` may be a list of addresses, all taken as reachable, or a list
    /// of `{address, reachable}` maps. A missing `peers` field is an empty
    /// list. Peer addresses get the default port when they carry none.
    pub fn from_payload(reporter: &str, payload: &Payload) -> Result<Self, String> {
        let node_id = payload.get("node_id").and_then(Value::as_str).map(str::to_string);

        let mut peers = Vec::new();
        match payload.get("peers") {
            None => {}
            Some(Value::List(items)) => {
                for item in items {
                    peers.push(parse_peer(item)?);
                }
            }
            Some(other) => return Err(format!("'peers' must be a list, got {}", other.type_name())),
        }

        Ok(Self {
            reporter: reporter.to_string(),
            node_id,
            peers,
        })
    }

    pub fn reports_reachable(&self, address: &str) -> bool {
        self.peers.iter().any(|p| p.reachable && p.address == address)
    }
}

fn parse_peer(item: &Value) -> Result<PeerReport, String> {
    match item {
        Value::Str(address) => Ok(PeerReport {
            address: NodeEndpoint::new(address).address,
            reachable: true,
        }),
        Value::Map(fields) => {
            let address = fields
                .get("address")
                .and_then(Value::as_str)
                .ok_or_else(|| "peer entry without 'address'".to_string())?;
            let reachable = match fields.get("reachable") {
                None => true,
                Some(v) => v
                    .as_bool()
                    .ok_or_else(|| format!("'reachable' must be a bool, got {}", v.type_name()))?,
            };
            Ok(PeerReport {
                address: NodeEndpoint::new(address).address,
                reachable,
            })
        }
        other => Err(format!("peer entry must be a string or map, got {}", other.type_name())),
    }
}

/// Decides which reported peers belong to the cluster.
pub trait MembershipPolicy: Send + Sync {
    /// Addresses of peers to include, given every report collected so far.
    fn reconcile(&self, reports: &[MembershipReport]) -> BTreeSet<String>;

    fn name(&self) -> &'static str;
}

/// Trusts only reporters a strict majority of the reporters can reach.
///
/// A reporter counts itself; every other reporter that lists it as reachable
/// adds one. A peer is included when any majority-reachable reporter lists it
/// as reachable. A reporter split off from the rest therefore cannot pull
/// its own partition into the view.
#[derive(Debug, Clone, Copy, Default)]
pub struct MajorityPolicy;

impl MajorityPolicy {
    fn is_majority_reachable(report: &MembershipReport, reports: &[MembershipReport]) -> bool {
        let support = 1 + reports
            .iter()
            .filter(|other| other.reporter != report.reporter)
            .filter(|other| other.reports_reachable(&report.reporter))
            .count();
        support * 2 > reports.len()
    }
}

impl MembershipPolicy for MajorityPolicy {
    fn reconcile(&self, reports: &[MembershipReport]) -> BTreeSet<String> {
        reports
            .iter()
            .filter(|r| Self::is_majority_reachable(r, reports))
            .flat_map(|r| r.peers.iter().filter(|p| p.reachable).map(|p| p.address.clone()))
            .collect()
    }

    fn name(&self) -> &'static str {
        "majority"
    }
}

/// Includes every peer any reporter lists as reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyReporterPolicy;

impl MembershipPolicy for AnyReporterPolicy {
    fn reconcile(&self, reports: &[MembershipReport]) -> BTreeSet<String> {
        reports
            .iter()
            .flat_map(|r| r.peers.iter().filter(|p| p.reachable).map(|p| p.address.clone()))
            .collect()
    }

    fn name(&self) -> &'static str {
        "any-reporter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustersh_common::payload;

    fn report(reporter: &str, peers: &[(&str, bool)]) -> MembershipReport {
        MembershipReport {
            reporter: reporter.to_string(),
            node_id: None,
            peers: peers
                .iter()
                .map(|(a, r)| PeerReport {
                    address: a.to_string(),
                    reachable: *r,
                })
                .collect(),
        }
    }

    #[test]
    fn test_parse_address_list() {
        let payload = payload! {
            "node_id" => "BB9",
            "peers" => Value::List(vec![Value::from("10.0.0.2"), Value::from("10.0.0.3:4000")]),
        };
        let parsed = MembershipReport::from_payload("10.0.0.1:3000", &payload).unwrap();
        assert_eq!(parsed.node_id.as_deref(), Some("BB9"));
        assert_eq!(parsed.peers[0].address, "10.0.0.2:3000");
        assert_eq!(parsed.peers[1].address, "10.0.0.3:4000");
        assert!(parsed.peers.iter().all(|p| p.reachable));
    }

    #[test]
    fn test_parse_peer_maps() {
        let payload = payload! {
            "peers" => Value::List(vec![
                Value::Map(payload! { "address" => "a:1", "reachable" => false }),
                Value::Map(payload! { "address" => "b:1" }),
            ]),
        };
        let parsed = MembershipReport::from_payload("r:1", &payload).unwrap();
        assert!(!parsed.peers[0].reachable);
        assert!(parsed.peers[1].reachable);
    }

    #[test]
    fn test_parse_missing_peers_is_empty() {
        let parsed = MembershipReport::from_payload("r:1", &payload! {}).unwrap();
        assert!(parsed.peers.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert!(MembershipReport::from_payload("r:1", &payload! { "peers" => 3 }).is_err());
        let bad_entry = payload! { "peers" => Value::List(vec![Value::from(7)]) };
        assert!(MembershipReport::from_payload("r:1", &bad_entry).is_err());
        let no_address = payload! { "peers" => Value::List(vec![Value::Map(payload! { "reachable" => true })]) };
        assert!(MembershipReport::from_payload("r:1", &no_address).is_err());
    }

    #[test]
    fn test_majority_single_reporter_is_trusted() {
        let reports = vec![report("a:1", &[("b:1", true), ("c:1", false)])];
        let included = MajorityPolicy.reconcile(&reports);
        assert_eq!(included.into_iter().collect::<Vec<_>>(), vec!["b:1".to_string()]);
    }

    #[test]
    fn test_majority_ignores_isolated_reporter() {
        // a and b see each other, c sees nobody but claims x
        let reports = vec![
            report("a:1", &[("b:1", true)]),
            report("b:1", &[("a:1", true)]),
            report("c:1", &[("x:1", true)]),
        ];
        let included = MajorityPolicy.reconcile(&reports);
        assert!(included.contains("a:1"));
        assert!(included.contains("b:1"));
        assert!(!included.contains("x:1"));

        let permissive = AnyReporterPolicy.reconcile(&reports);
        assert!(permissive.contains("x:1"));
    }

    #[test]
    fn test_majority_conflicting_reports() {
        // a and b both reach each other; b says d is unreachable, a says reachable
        let reports = vec![
            report("a:1", &[("b:1", true), ("d:1", true)]),
            report("b:1", &[("a:1", true), ("d:1", false)]),
        ];
        assert!(MajorityPolicy.reconcile(&reports).contains("d:1"));
    }

    #[test]
    fn test_majority_is_order_independent() {
        let mut reports = vec![
            report("a:1", &[("b:1", true), ("e:1", true)]),
            report("b:1", &[("a:1", true)]),
            report("c:1", &[("z:1", true)]),
        ];
        let forward = MajorityPolicy.reconcile(&reports);
        reports.reverse();
        assert_eq!(forward, MajorityPolicy.reconcile(&reports));
    }
}
