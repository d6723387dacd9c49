//! Routing engine facade
//!
//! An [`Engine`] binds one immutable topology snapshot to its derived structures:
//! the adjacency, the clustered demand, the classification and the primary routes.
//! Every query runs against that snapshot and never mutates it, so one engine can
//! serve concurrent what-if queries.

use crate::adjacency::{Adjacency, Failure, TrafficDemand};
use crate::bridges::{Classification, ClassificationCache};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::forwarding::ForwardingFeed;
use crate::global_routes::{BandwidthOverview, GlobalPlanner, RouteSet, RouteTree};
use crate::local_routes::{LocalPlanner, LocalRoutes};
use crate::query::{self, RouteQuery, RouteResult};
use crate::topology::{LinkId, NodeId, SnapshotId, Topology};
use std::sync::Arc;
use tracing::info;

/// Route computation over a single topology snapshot
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    topology: Topology,
    snapshot: SnapshotId,
    adjacency: Adjacency,
    demand: TrafficDemand,
    classification: Arc<Classification>,
    primary: Arc<RouteSet>,
}

impl Engine {
    /// Build an engine with a private classification cache
    pub fn new(topology: Topology, config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_cache(topology, config, &ClassificationCache::new())
    }

    /// Build an engine, reusing the classification of an identical snapshot
    pub fn with_cache(
        topology: Topology,
        config: EngineConfig,
        cache: &ClassificationCache,
    ) -> Result<Self, EngineError> {
        let snapshot = topology.fingerprint()?;
        let adjacency = Adjacency::from_topology(&topology, &config)?;
        let demand = TrafficDemand::from_topology(&topology)?;
        let classification = cache.get_or_classify(snapshot, &adjacency);

        let primary = Arc::clone(
            GlobalPlanner::new(&adjacency, &demand, &classification, &config).primary(),
        );

        info!(
            snapshot = %snapshot,
            nodes = topology.nodes.len(),
            links = topology.links.len(),
            traffic = topology.traffic.len(),
            components = classification.component_count(),
            "engine ready"
        );

        Ok(Self {
            config,
            topology,
            snapshot,
            adjacency,
            demand,
            classification,
            primary,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn snapshot(&self) -> SnapshotId {
        self.snapshot
    }

    pub fn adjacency(&self) -> &Adjacency {
        &self.adjacency
    }

    pub fn demand(&self) -> &TrafficDemand {
        &self.demand
    }

    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    /// Routes with nothing failed
    pub fn primary_routes(&self) -> &Arc<RouteSet> {
        &self.primary
    }

    fn global(&self) -> GlobalPlanner<'_> {
        GlobalPlanner::with_primary(
            &self.adjacency,
            &self.demand,
            &self.classification,
            &self.config,
            Arc::clone(&self.primary),
        )
    }

    /// Check a failure scenario against the snapshot
    pub fn failure(
        &self,
        failed_link: Option<LinkId>,
        failed_node: Option<NodeId>,
    ) -> Result<Option<Failure>, EngineError> {
        query::resolve_failure(&self.topology, failed_link, failed_node)
    }

    /// Route tree toward `destination` with at most one failed entity
    pub fn route_tree(
        &self,
        destination: &NodeId,
        failed_link: Option<LinkId>,
        failed_node: Option<NodeId>,
    ) -> Result<RouteTree, EngineError> {
        let failure = self.failure(failed_link, failed_node)?;
        Ok(self.global().route_tree(destination, failure.as_ref()))
    }

    /// Every route tree under a failure scenario
    pub fn routes(&self, failure: Option<&Failure>) -> Arc<RouteSet> {
        self.global().routes(failure)
    }

    pub fn query_routes(&self, query: &RouteQuery) -> Result<Vec<RouteResult>, EngineError> {
        query::query_routes(&self.topology, &self.global(), query)
    }

    pub fn query_bandwidth(
        &self,
        failed_link: Option<LinkId>,
        failed_node: Option<NodeId>,
    ) -> Result<BandwidthOverview, EngineError> {
        query::query_bandwidth(&self.topology, &self.global(), failed_link, failed_node)
    }

    pub fn local_routes(&self) -> Result<LocalRoutes, EngineError> {
        LocalPlanner::new(&self.adjacency, &self.demand, &self.classification, &self.config).plan()
    }

    pub fn forwarding_feed(&self) -> Result<ForwardingFeed, EngineError> {
        ForwardingFeed::build(&self.topology, &self.local_routes()?, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridges::FailureImpact;

    fn topology() -> Topology {
        let mut topo = Topology::new();
        topo.add_switch("s1");
        topo.add_switch("s2");
        topo.add_device("a").with_mac("02:00:00:00:00:0a");
        topo.add_device("b").with_mac("02:00:00:00:00:0b");
        topo.connect("l12", ("s1", "p1"), ("s2", "p1"), 1000.0);
        topo.connect("la", ("s1", "p2"), ("a", "eth0"), 100.0);
        topo.connect("lb", ("s2", "p2"), ("b", "eth0"), 100.0);
        topo.add_unicast("t1", "a", "b", 10.0);
        topo
    }

    #[test]
    fn test_engine_end_to_end() {
        let engine = Engine::new(topology(), EngineConfig::default()).unwrap();
        assert_eq!(
            engine.classification().link_impact(&LinkId::new("l12")),
            Some(FailureImpact::Type2)
        );

        let tree = engine.route_tree(&NodeId::new("b"), None, None).unwrap();
        assert_eq!(tree.depth(&NodeId::new("a")), Some(3));

        let results = engine.query_routes(&RouteQuery::unicast()).unwrap();
        assert_eq!(results[0].links.len(), 3);

        let overview = engine.query_bandwidth(None, None).unwrap();
        assert_eq!(overview.len(), 3);

        let feed = engine.forwarding_feed().unwrap();
        assert_eq!(feed.table(&NodeId::new("s1")).unwrap().len(), 1);
    }

    #[test]
    fn test_failure_arguments_are_checked() {
        let engine = Engine::new(topology(), EngineConfig::default()).unwrap();
        assert!(engine
            .route_tree(&NodeId::new("b"), Some("l12".into()), Some("s1".into()))
            .unwrap_err()
            .is_caller_error());
        assert!(engine.failure(Some("ghost".into()), None).is_err());
        assert_eq!(
            engine.failure(None, Some("s1".into())).unwrap(),
            Some(Failure::Node(NodeId::new("s1")))
        );
    }

    #[test]
    fn test_cache_shared_between_engines() {
        let cache = ClassificationCache::new();
        let first = Engine::with_cache(topology(), EngineConfig::default(), &cache).unwrap();
        let second = Engine::with_cache(topology(), EngineConfig::default(), &cache).unwrap();
        assert_eq!(first.snapshot(), second.snapshot());
        assert_eq!(cache.len(), 1);

        let mut changed = topology();
        changed.add_switch("s3");
        let third = Engine::with_cache(changed, EngineConfig::default(), &cache).unwrap();
        assert_ne!(third.snapshot(), first.snapshot());
        assert_eq!(cache.len(), 2);
        cache.retain_only(&third.snapshot());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalid_snapshot_is_rejected() {
        let mut topo = topology();
        topo.add_group("g", ["b"]);
        topo.add_multicast("m1", "a", "g", 1.0);
        topo.add_multicast("m2", "b", "g", 1.0);
        let err = Engine::new(topo, EngineConfig::default()).unwrap_err();
        assert!(err.is_invariant_violation());
    }
}
