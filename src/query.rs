//! Route and bandwidth queries
//!
//! Point queries over the planners' output. A route query filters the snapshot's
//! traffic and answers one result per matching traffic entry; the route set for the
//! requested failure scenario is computed once and shared by every match.

use crate::adjacency::Failure;
use crate::error::{EngineError, EntityKind};
use crate::global_routes::{BandwidthOverview, GlobalPlanner, RouteSet, RouteStep};
use crate::topology::{AddressMethod, GroupId, LinkId, NodeId, Topology, TrafficId, TrafficTarget};
use serde::Serialize;
use tracing::debug;

/// Filter for [`query_routes`]; unset fields match everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteQuery {
    pub source: Option<NodeId>,
    /// Destination device (unicast) or multicast group ID
    pub destination: Option<String>,
    pub traffic: Option<TrafficId>,
    pub failed_link: Option<LinkId>,
    pub failed_node: Option<NodeId>,
    pub method: AddressMethod,
}

impl RouteQuery {
    pub fn new(method: AddressMethod) -> Self {
        Self {
            source: None,
            destination: None,
            traffic: None,
            failed_link: None,
            failed_node: None,
            method,
        }
    }

    pub fn unicast() -> Self {
        Self::new(AddressMethod::Unicast)
    }

    pub fn multicast() -> Self {
        Self::new(AddressMethod::Multicast)
    }

    pub fn from_source(mut self, source: impl Into<NodeId>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn to_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn for_traffic(mut self, traffic: impl Into<TrafficId>) -> Self {
        self.traffic = Some(traffic.into());
        self
    }

    pub fn with_failed_link(mut self, link: impl Into<LinkId>) -> Self {
        self.failed_link = Some(link.into());
        self
    }

    pub fn with_failed_node(mut self, node: impl Into<NodeId>) -> Self {
        self.failed_node = Some(node.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Routed,
    /// The route crosses the failed entity; the hops stop just before it
    Truncated,
    /// Source and destination do not share a component under this scenario
    Unreachable,
}

/// Route of one traffic entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteResult {
    pub src: NodeId,
    pub dst: String,
    pub traffic: TrafficId,
    pub method: AddressMethod,
    pub links: Vec<RouteStep>,
    pub status: RouteStatus,
}

/// Validate a failure scenario against the snapshot
pub fn resolve_failure(
    topology: &Topology,
    failed_link: Option<LinkId>,
    failed_node: Option<NodeId>,
) -> Result<Option<Failure>, EngineError> {
    let failure = Failure::from_parts(failed_link, failed_node)?;
    match &failure {
        Some(Failure::Link(link)) if !topology.links.contains_key(link) => {
            return Err(EngineError::unknown(EntityKind::Link, link));
        }
        Some(Failure::Node(node)) if !topology.nodes.contains_key(node) => {
            return Err(EngineError::unknown(EntityKind::Node, node));
        }
        _ => {}
    }
    Ok(failure)
}

/// Answer a route query
pub fn query_routes(
    topology: &Topology,
    planner: &GlobalPlanner<'_>,
    query: &RouteQuery,
) -> Result<Vec<RouteResult>, EngineError> {
    let failure = resolve_failure(topology, query.failed_link.clone(), query.failed_node.clone())?;

    let matches: Vec<_> = topology
        .traffic
        .iter()
        .filter(|(id, traffic)| {
            traffic.address_method == query.method
                && query.traffic.as_ref().map_or(true, |wanted| wanted == *id)
                && query
                    .source
                    .as_ref()
                    .map_or(true, |src| src == &traffic.source.device)
                && query
                    .destination
                    .as_deref()
                    .map_or(true, |dst| traffic.target_key() == Some(dst))
        })
        .collect();

    if matches.is_empty() {
        return Ok(Vec::new());
    }

    let routes = planner.routes(failure.as_ref());
    let mut results = Vec::with_capacity(matches.len());
    for (id, traffic) in matches {
        let Some(target) = traffic.target() else {
            continue;
        };
        let src = &traffic.source.device;
        let links = match target {
            TrafficTarget::Device(dst) => unicast_links(&routes, src, dst, failure.as_ref()),
            TrafficTarget::Group(group) => multicast_links(&routes, src, group, failure.as_ref()),
        };
        let status = match &links {
            Some((steps, full)) if steps.len() < *full => RouteStatus::Truncated,
            Some(_) => RouteStatus::Routed,
            None => RouteStatus::Unreachable,
        };

        results.push(RouteResult {
            src: src.clone(),
            dst: target.to_string(),
            traffic: id.clone(),
            method: traffic.address_method,
            links: links.map(|(steps, _)| steps).unwrap_or_default(),
            status,
        });
    }

    debug!(
        method = %query.method,
        results = results.len(),
        "answered route query"
    );
    Ok(results)
}

/// Hops under the failure, paired with the hop count of the unbroken route
fn unicast_links(
    routes: &RouteSet,
    src: &NodeId,
    dst: &NodeId,
    failure: Option<&Failure>,
) -> Option<(Vec<RouteStep>, usize)> {
    let tree = routes.tree(dst)?;
    let full = tree.depth(src)?;
    Some((tree.path(src, failure), full))
}

fn multicast_links(
    routes: &RouteSet,
    src: &NodeId,
    group: &GroupId,
    failure: Option<&Failure>,
) -> Option<(Vec<RouteStep>, usize)> {
    let tree = routes.multicast_tree(group)?;
    if tree.source() != src || tree.hops(src).is_none() {
        return None;
    }
    Some((tree.walk(failure), tree.walk(None).len()))
}

/// Per-link bandwidth overview under an optional failure
pub fn query_bandwidth(
    topology: &Topology,
    planner: &GlobalPlanner<'_>,
    failed_link: Option<LinkId>,
    failed_node: Option<NodeId>,
) -> Result<BandwidthOverview, EngineError> {
    let failure = resolve_failure(topology, failed_link, failed_node)?;
    let routes = planner.routes(failure.as_ref());
    Ok(planner.overview(&routes, failure.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjacency::{Adjacency, TrafficDemand};
    use crate::bridges::Classification;
    use crate::config::EngineConfig;

    /// s1-s2 with a on s1, b and c on s2; s3 isolated with z
    fn topology() -> Topology {
        let mut topo = Topology::new();
        for s in ["s1", "s2", "s3"] {
            topo.add_switch(s);
        }
        for d in ["a", "b", "c", "z"] {
            topo.add_device(d);
        }
        topo.connect("l12", ("s1", "p1"), ("s2", "p1"), 100.0);
        topo.connect("la", ("s1", "p2"), ("a", "eth0"), 100.0);
        topo.connect("lb", ("s2", "p2"), ("b", "eth0"), 100.0);
        topo.connect("lc", ("s2", "p3"), ("c", "eth0"), 100.0);
        topo.connect("lz", ("s3", "p1"), ("z", "eth0"), 100.0);
        topo.add_unicast("t1", "a", "b", 1.0);
        topo.add_unicast("t2", "a", "c", 2.0);
        topo.add_unicast("t3", "c", "b", 3.0);
        topo.add_unicast("t4", "z", "b", 4.0);
        topo.add_group("g", ["b", "c"]);
        topo.add_multicast("t5", "a", "g", 5.0);
        topo
    }

    fn with_planner<T>(topo: &Topology, f: impl FnOnce(&GlobalPlanner<'_>) -> T) -> T {
        let config = EngineConfig::default();
        let adjacency = Adjacency::from_topology(topo, &config).unwrap();
        let demand = TrafficDemand::from_topology(topo).unwrap();
        let classification = Classification::classify(&adjacency);
        let planner = GlobalPlanner::new(&adjacency, &demand, &classification, &config);
        f(&planner)
    }

    #[test]
    fn test_filters_combine() {
        let topo = topology();
        with_planner(&topo, |planner| {
            let all = query_routes(&topo, planner, &RouteQuery::unicast()).unwrap();
            let ids: Vec<&str> = all.iter().map(|r| r.traffic.as_str()).collect();
            assert_eq!(ids, ["t1", "t2", "t3", "t4"]);

            let from_a = query_routes(&topo, planner, &RouteQuery::unicast().from_source("a")).unwrap();
            assert_eq!(from_a.len(), 2);

            let a_to_b = RouteQuery::unicast().from_source("a").to_destination("b");
            let result = query_routes(&topo, planner, &a_to_b).unwrap();
            assert_eq!(result.len(), 1);
            assert_eq!(result[0].links.len(), 3);
            assert_eq!(result[0].status, RouteStatus::Routed);

            let missing = RouteQuery::unicast().for_traffic("t9");
            assert!(query_routes(&topo, planner, &missing).unwrap().is_empty());

            // method filter excludes the multicast entry even when named
            let wrong_method = RouteQuery::unicast().for_traffic("t5");
            assert!(query_routes(&topo, planner, &wrong_method).unwrap().is_empty());
        });
    }

    #[test]
    fn test_unreachable_source_yields_empty_path() {
        let topo = topology();
        with_planner(&topo, |planner| {
            let result = query_routes(&topo, planner, &RouteQuery::unicast().for_traffic("t4")).unwrap();
            assert_eq!(result.len(), 1);
            assert!(result[0].links.is_empty());
            assert_eq!(result[0].status, RouteStatus::Unreachable);
        });
    }

    #[test]
    fn test_multicast_query() {
        let topo = topology();
        with_planner(&topo, |planner| {
            let result = query_routes(&topo, planner, &RouteQuery::multicast().to_destination("g")).unwrap();
            assert_eq!(result.len(), 1);
            assert_eq!(result[0].dst, "g");
            let hops: Vec<(&str, &str)> = result[0]
                .links
                .iter()
                .map(|step| (step.from.as_str(), step.to.as_str()))
                .collect();
            assert_eq!(hops, [("a", "s1"), ("s1", "s2"), ("s2", "b"), ("s2", "c")]);
        });
    }

    #[test]
    fn test_path_truncated_at_failure() {
        let topo = topology();
        with_planner(&topo, |planner| {
            let query = RouteQuery::unicast().for_traffic("t1").with_failed_link("l12");
            let result = query_routes(&topo, planner, &query).unwrap();
            assert_eq!(result[0].links.len(), 1);
            assert_eq!(result[0].links[0].link, LinkId::new("la"));
            assert_eq!(result[0].status, RouteStatus::Truncated);

            let query = RouteQuery::multicast().with_failed_node("s2");
            let result = query_routes(&topo, planner, &query).unwrap();
            assert_eq!(result[0].links.len(), 1);
            assert_eq!(result[0].status, RouteStatus::Truncated);

            // a failure off the route leaves it whole
            let query = RouteQuery::unicast().for_traffic("t3").with_failed_link("la");
            let result = query_routes(&topo, planner, &query).unwrap();
            assert_eq!(result[0].links.len(), 2);
            assert_eq!(result[0].status, RouteStatus::Routed);
        });
    }

    #[test]
    fn test_failure_validation() {
        let topo = topology();
        with_planner(&topo, |planner| {
            let both = RouteQuery::unicast().with_failed_link("l12").with_failed_node("s1");
            let err = query_routes(&topo, planner, &both).unwrap_err();
            assert!(matches!(err, EngineError::InputConflict { .. }));

            let err = query_bandwidth(&topo, planner, Some(LinkId::new("nope")), None).unwrap_err();
            assert!(matches!(
                err,
                EngineError::UnknownEntity {
                    kind: EntityKind::Link,
                    ..
                }
            ));
            let err = query_bandwidth(&topo, planner, None, Some(NodeId::new("nope"))).unwrap_err();
            assert!(err.is_caller_error());
        });
    }

    #[test]
    fn test_bandwidth_overview() {
        let topo = topology();
        with_planner(&topo, |planner| {
            let overview = query_bandwidth(&topo, planner, None, None).unwrap();
            let load = overview
                .direction(&LinkId::new("l12"), &NodeId::new("s1"), &NodeId::new("s2"))
                .unwrap();
            // t1, t2 and the multicast t5
            assert_eq!(load.bandwidth, 8.0);
            let reverse = overview.direction(&LinkId::new("l12"), &NodeId::new("s2"), &NodeId::new("s1"));
            assert!(reverse.is_none());
            assert!(overview.link(&LinkId::new("lz")).is_none());

            let json = serde_json::to_value(&overview).unwrap();
            assert_eq!(json["lb"][0]["from"], "s2");
            assert_eq!(json["lb"][0]["traffic"].as_array().unwrap().len(), 3);
        });
    }
}
