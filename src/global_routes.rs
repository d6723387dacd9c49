//! Global route planner
//!
//! Computes one shortest-route tree per destination, searching backward from the
//! destination over incoming adjacency. Candidate hops are ordered by
//! (accumulated hops, link speed descending, inbound port-bit), with the hop's
//! (from, to, link) IDs as the last resort so every tree is fully deterministic.
//!
//! Multicast delivery trees are derived from the unicast trees of the group members,
//! and the overview pass aggregates traffic and bandwidth per directed link.

use crate::adjacency::{Adjacency, AdjacencyEntry, AdjacencyView, Failure, TrafficCluster, TrafficDemand, TrafficShare};
use crate::bridges::Classification;
use crate::config::EngineConfig;
use crate::topology::{GroupId, LinkId, NodeId};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// A frontier hop waiting in the search queue
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate<'a> {
    /// Hops from the entry's sender to the root
    pub cost: u32,
    pub entry: &'a AdjacencyEntry,
}

impl<'a> Candidate<'a> {
    pub fn new(cost: u32, entry: &'a AdjacencyEntry) -> Self {
        Self { cost, entry }
    }
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .cmp(&other.cost)
            .then_with(|| other.entry.speed.total_cmp(&self.entry.speed))
            .then_with(|| self.entry.to_port_bit.cmp(&other.entry.to_port_bit))
            .then_with(|| self.entry.from.cmp(&other.entry.from))
            .then_with(|| self.entry.to.cmp(&other.entry.to))
            .then_with(|| self.entry.link.cmp(&other.entry.link))
    }
}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

/// Min-first frontier that ignores entries for already finalized nodes
pub(crate) struct Frontier<'a> {
    heap: BinaryHeap<Reverse<Candidate<'a>>>,
    finalized: HashSet<&'a NodeId>,
}

impl<'a> Frontier<'a> {
    /// Start a search rooted at `root`, which counts as finalized
    pub fn new(root: &'a NodeId) -> Self {
        Self {
            heap: BinaryHeap::new(),
            finalized: HashSet::from([root]),
        }
    }

    pub fn push(&mut self, candidate: Candidate<'a>) {
        if !self.finalized.contains(&candidate.entry.from) {
            self.heap.push(Reverse(candidate));
        }
    }

    /// Pop the best candidate whose sender is not finalized yet, finalizing it
    pub fn pop(&mut self) -> Option<Candidate<'a>> {
        while let Some(Reverse(candidate)) = self.heap.pop() {
            if self.finalized.insert(&candidate.entry.from) {
                return Some(candidate);
            }
        }
        None
    }
}

/// How a tree node reaches the next node toward the root
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Hop {
    pub next: NodeId,
    pub link: LinkId,
    pub outbound_port: String,
    pub inbound_port: String,
}

impl From<&AdjacencyEntry> for Hop {
    fn from(entry: &AdjacencyEntry) -> Self {
        Self {
            next: entry.to.clone(),
            link: entry.link.clone(),
            outbound_port: entry.from_port.clone(),
            inbound_port: entry.to_port.clone(),
        }
    }
}

/// One traversed hop of a route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteStep {
    pub from: NodeId,
    pub to: NodeId,
    pub link: LinkId,
}

/// Shortest-route tree rooted at a destination
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RouteTree {
    root: NodeId,
    hops: BTreeMap<NodeId, Hop>,
}

impl RouteTree {
    pub fn new(root: NodeId) -> Self {
        Self {
            root,
            hops: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &NodeId {
        &self.root
    }

    pub fn hop(&self, node: &NodeId) -> Option<&Hop> {
        self.hops.get(node)
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.hops.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Hop)> {
        self.hops.iter()
    }

    /// Hops from `source` toward the root, stopping before the failed entity.
    ///
    /// Empty when the source is not in the tree or is itself the failed node.
    pub fn path(&self, source: &NodeId, failure: Option<&Failure>) -> Vec<RouteStep> {
        let mut steps = Vec::new();
        if matches!(failure, Some(Failure::Node(failed)) if failed == source) {
            return steps;
        }

        let mut current = source;
        while current != &self.root && steps.len() <= self.hops.len() {
            let Some(hop) = self.hops.get(current) else {
                break;
            };
            if failure.is_some_and(|f| f.blocks(&hop.link, &hop.next)) {
                break;
            }
            steps.push(RouteStep {
                from: current.clone(),
                to: hop.next.clone(),
                link: hop.link.clone(),
            });
            current = &hop.next;
        }
        steps
    }

    /// Number of hops from `node` to the root
    pub fn depth(&self, node: &NodeId) -> Option<usize> {
        if node == &self.root {
            return Some(0);
        }
        self.contains(node).then(|| self.path(node, None).len())
    }
}

/// Delivery tree of one multicast group, possibly branching
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MulticastTree {
    source: NodeId,
    edges: BTreeMap<NodeId, BTreeSet<Hop>>,
}

impl MulticastTree {
    /// Union of the source's paths in every member's unicast tree.
    ///
    /// Members whose tree does not contain the source are skipped.
    pub fn derive(source: &NodeId, members: &[NodeId], trees: &BTreeMap<NodeId, RouteTree>) -> Self {
        let mut edges: BTreeMap<NodeId, BTreeSet<Hop>> = BTreeMap::new();

        for member in members {
            let Some(tree) = trees.get(member) else {
                continue;
            };
            if !tree.contains(source) {
                continue;
            }

            let mut current = source;
            while current != member {
                let Some(hop) = tree.hop(current) else {
                    break;
                };
                edges.entry(current.clone()).or_default().insert(hop.clone());
                current = &hop.next;
            }
        }

        Self {
            source: source.clone(),
            edges,
        }
    }

    pub fn source(&self) -> &NodeId {
        &self.source
    }

    /// Outgoing hops of a tree node
    pub fn hops(&self, node: &NodeId) -> Option<&BTreeSet<Hop>> {
        self.edges.get(node)
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Every node on the tree, branch points and leaves included
    pub fn nodes(&self) -> BTreeSet<&NodeId> {
        self.edges
            .iter()
            .flat_map(|(from, hops)| std::iter::once(from).chain(hops.iter().map(|hop| &hop.next)))
            .collect()
    }

    /// Breadth-first walk from the source, skipping hops into the failed entity
    pub fn walk(&self, failure: Option<&Failure>) -> Vec<RouteStep> {
        let mut steps = Vec::new();
        if !self.edges.contains_key(&self.source) {
            return steps;
        }

        let mut queue = VecDeque::from([&self.source]);
        let mut seen = HashSet::from([&self.source]);
        while let Some(from) = queue.pop_front() {
            for hop in self.edges.get(from).into_iter().flatten() {
                if failure.is_some_and(|f| f.blocks(&hop.link, &hop.next)) {
                    continue;
                }
                steps.push(RouteStep {
                    from: from.clone(),
                    to: hop.next.clone(),
                    link: hop.link.clone(),
                });
                if self.edges.contains_key(&hop.next) && seen.insert(&hop.next) {
                    queue.push_back(&hop.next);
                }
            }
        }
        steps
    }
}

/// Every route tree for one failure scenario
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RouteSet {
    /// Per destination device (unicast destinations and multicast members)
    pub trees: BTreeMap<NodeId, RouteTree>,
    pub multicast: BTreeMap<GroupId, MulticastTree>,
}

impl RouteSet {
    pub fn tree(&self, destination: &NodeId) -> Option<&RouteTree> {
        self.trees.get(destination)
    }

    pub fn multicast_tree(&self, group: &GroupId) -> Option<&MulticastTree> {
        self.multicast.get(group)
    }
}

/// Traffic carried over one link in one direction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkLoad {
    pub from: NodeId,
    pub to: NodeId,
    pub traffic: Vec<TrafficShare>,
    pub bandwidth: f64,
}

/// Per-link traffic overview: `{link → [{from, to, traffic, bandwidth}]}`
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct BandwidthOverview {
    links: BTreeMap<LinkId, Vec<LinkLoad>>,
}

impl BandwidthOverview {
    pub fn link(&self, link: &LinkId) -> Option<&[LinkLoad]> {
        self.links.get(link).map(Vec::as_slice)
    }

    /// Load of `link` in the `from → to` direction
    pub fn direction(&self, link: &LinkId, from: &NodeId, to: &NodeId) -> Option<&LinkLoad> {
        self.link(link)?
            .iter()
            .find(|load| &load.from == from && &load.to == to)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LinkId, &[LinkLoad])> {
        self.links.iter().map(|(id, loads)| (id, loads.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[derive(Default)]
struct OverviewBuilder {
    links: BTreeMap<LinkId, BTreeMap<(NodeId, NodeId), TrafficCluster>>,
}

impl OverviewBuilder {
    fn add(&mut self, steps: Vec<RouteStep>, cluster: &TrafficCluster) {
        for step in steps {
            self.links
                .entry(step.link)
                .or_default()
                .entry((step.from, step.to))
                .or_default()
                .merge(cluster);
        }
    }

    fn build(self) -> BandwidthOverview {
        let links = self
            .links
            .into_iter()
            .map(|(link, directions)| {
                let loads = directions
                    .into_iter()
                    .map(|((from, to), cluster)| LinkLoad {
                        from,
                        to,
                        traffic: cluster.traffic,
                        bandwidth: cluster.bandwidth,
                    })
                    .collect();
                (link, loads)
            })
            .collect();
        BandwidthOverview { links }
    }
}

/// Route planner bound to one snapshot
pub struct GlobalPlanner<'a> {
    adjacency: &'a Adjacency,
    demand: &'a TrafficDemand,
    classification: &'a Classification,
    config: &'a EngineConfig,
    primary: Arc<RouteSet>,
}

impl<'a> GlobalPlanner<'a> {
    /// Create the planner and compute the no-failure route set
    pub fn new(
        adjacency: &'a Adjacency,
        demand: &'a TrafficDemand,
        classification: &'a Classification,
        config: &'a EngineConfig,
    ) -> Self {
        let mut planner = Self::with_primary(adjacency, demand, classification, config, Arc::default());
        planner.primary = Arc::new(planner.compute_routes(None));
        planner
    }

    /// Create the planner around an already computed no-failure route set
    pub fn with_primary(
        adjacency: &'a Adjacency,
        demand: &'a TrafficDemand,
        classification: &'a Classification,
        config: &'a EngineConfig,
        primary: Arc<RouteSet>,
    ) -> Self {
        Self {
            adjacency,
            demand,
            classification,
            config,
            primary,
        }
    }

    pub fn primary(&self) -> &Arc<RouteSet> {
        &self.primary
    }

    fn short_circuits(&self, failure: Option<&Failure>) -> bool {
        self.config.bridge_short_circuit
            && failure.is_some_and(|f| self.classification.keeps_primary_routes(f))
    }

    /// Route tree toward `destination` under an optional failure
    pub fn route_tree(&self, destination: &NodeId, failure: Option<&Failure>) -> RouteTree {
        if failure.is_none() || self.short_circuits(failure) {
            if let Some(tree) = self.primary.tree(destination) {
                return tree.clone();
            }
        }
        self.shortest_route_tree(destination, failure)
    }

    /// All route trees under an optional failure.
    ///
    /// A failure classified TYPE2 reuses the primary routes unchanged.
    pub fn routes(&self, failure: Option<&Failure>) -> Arc<RouteSet> {
        match failure {
            None => Arc::clone(&self.primary),
            Some(f) if self.short_circuits(failure) => {
                debug!(failure = %f, "failure keeps primary routes");
                Arc::clone(&self.primary)
            }
            Some(_) => Arc::new(self.compute_routes(failure)),
        }
    }

    fn compute_routes(&self, failure: Option<&Failure>) -> RouteSet {
        let destinations: Vec<&NodeId> = self.demand.sources.keys().collect();
        let trees: BTreeMap<NodeId, RouteTree> = if self.config.parallel_trees {
            destinations
                .par_iter()
                .map(|dst| ((*dst).clone(), self.shortest_route_tree(dst, failure)))
                .collect()
        } else {
            destinations
                .iter()
                .map(|dst| ((*dst).clone(), self.shortest_route_tree(dst, failure)))
                .collect()
        };

        let multicast = self
            .demand
            .multicast
            .keys()
            .filter_map(|group| {
                let (source, _) = self.demand.multicast_source(group)?;
                let members = self.demand.members.get(group)?;
                Some((group.clone(), MulticastTree::derive(source, members, &trees)))
            })
            .collect();

        info!(
            failure = ?failure.map(ToString::to_string),
            trees = trees.len(),
            "computed route set"
        );
        RouteSet { trees, multicast }
    }

    /// Backward shortest-route search from `destination`.
    ///
    /// Stops once every source sharing the destination's component is finalized;
    /// the result keeps only the chains from reached sources to the root.
    fn shortest_route_tree(&self, destination: &NodeId, failure: Option<&Failure>) -> RouteTree {
        let view = self.adjacency.view(failure);
        let mut pending: BTreeSet<&NodeId> = self
            .demand
            .sources
            .get(destination)
            .into_iter()
            .flatten()
            .filter(|src| *src != destination && self.classification.same_component(destination, src))
            .collect();

        let mut frontier = Frontier::new(destination);
        push_incoming(&mut frontier, &view, destination, 0);

        let mut reached: HashMap<&NodeId, &AdjacencyEntry> = HashMap::new();
        let mut on_tree: BTreeSet<&NodeId> = BTreeSet::new();

        while !pending.is_empty() {
            let Some(Candidate { cost, entry }) = frontier.pop() else {
                break;
            };
            let node = &entry.from;
            reached.insert(node, entry);

            if pending.remove(node) {
                let mut current = node;
                while current != destination && on_tree.insert(current) {
                    match reached.get(current).copied() {
                        Some(entry) => current = &entry.to,
                        None => break,
                    }
                }
            }

            push_incoming(&mut frontier, &view, node, cost);
        }

        if !pending.is_empty() {
            debug!(
                destination = %destination,
                unreached = pending.len(),
                "sources left out of route tree"
            );
        }

        let mut tree = RouteTree::new(destination.clone());
        tree.hops = on_tree
            .into_iter()
            .filter_map(|node| reached.get(node).map(|entry| (node.clone(), Hop::from(*entry))))
            .collect();
        tree
    }

    /// Per-link traffic under `failure`, walking `routes` and stopping at the failure
    pub fn overview(&self, routes: &RouteSet, failure: Option<&Failure>) -> BandwidthOverview {
        let mut builder = OverviewBuilder::default();

        for (dst, sources) in &self.demand.unicast {
            let Some(tree) = routes.tree(dst) else {
                continue;
            };
            for (src, cluster) in sources {
                if tree.contains(src) {
                    builder.add(tree.path(src, failure), cluster);
                }
            }
        }

        for group in self.demand.multicast.keys() {
            let (Some(tree), Some((_, cluster))) =
                (routes.multicast_tree(group), self.demand.multicast_source(group))
            else {
                continue;
            };
            builder.add(tree.walk(failure), cluster);
        }

        builder.build()
    }
}

fn push_incoming<'a>(frontier: &mut Frontier<'a>, view: &AdjacencyView<'a>, node: &NodeId, cost: u32) {
    for entry in view.incoming(node) {
        frontier.push(Candidate::new(cost + entry.weight, entry));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Topology;

    struct Fixture {
        adjacency: Adjacency,
        demand: TrafficDemand,
        classification: Classification,
        config: EngineConfig,
    }

    impl Fixture {
        fn new(topo: &Topology) -> Self {
            let config = EngineConfig::default();
            let adjacency = Adjacency::from_topology(topo, &config).unwrap();
            let demand = TrafficDemand::from_topology(topo).unwrap();
            let classification = Classification::classify(&adjacency);
            Self {
                adjacency,
                demand,
                classification,
                config,
            }
        }

        fn planner(&self) -> GlobalPlanner<'_> {
            GlobalPlanner::new(&self.adjacency, &self.demand, &self.classification, &self.config)
        }
    }

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    /// Square s1-s2-s4 / s1-s3-s4 with devices on s1 and s4
    fn square(speed_via_s2: f64, speed_via_s3: f64) -> Topology {
        let mut topo = Topology::new();
        for s in ["s1", "s2", "s3", "s4"] {
            topo.add_switch(s);
        }
        topo.add_device("src");
        topo.add_device("dst");
        topo.connect("a", ("s1", "p1"), ("s2", "p1"), speed_via_s2);
        topo.connect("b", ("s2", "p2"), ("s4", "p1"), speed_via_s2);
        topo.connect("c", ("s1", "p2"), ("s3", "p1"), speed_via_s3);
        topo.connect("d", ("s3", "p2"), ("s4", "p2"), speed_via_s3);
        topo.connect("ls", ("s1", "p3"), ("src", "eth0"), 100.0);
        topo.connect("ld", ("s4", "p3"), ("dst", "eth0"), 100.0);
        topo.add_unicast("t1", "src", "dst", 10.0);
        topo
    }

    fn via(tree: &RouteTree) -> Vec<String> {
        tree.path(&id("src"), None)
            .into_iter()
            .map(|step| step.to.to_string())
            .collect()
    }

    #[test]
    fn test_candidate_ordering() {
        let entry = |speed: f64, bit: i64, from: &str| AdjacencyEntry {
            weight: 1,
            from: id(from),
            to: id("x"),
            speed,
            from_port: "p".into(),
            from_port_bit: 0,
            to_port: "q".into(),
            to_port_bit: bit,
            link: LinkId::new(format!("{from}-x")),
        };
        let (slow, fast, low_bit, other) = (
            entry(10.0, 0, "a"),
            entry(100.0, 5, "a"),
            entry(100.0, 1, "a"),
            entry(100.0, 1, "b"),
        );

        assert!(Candidate::new(1, &slow) < Candidate::new(2, &fast));
        assert!(Candidate::new(1, &fast) < Candidate::new(1, &slow));
        assert!(Candidate::new(1, &low_bit) < Candidate::new(1, &fast));
        assert!(Candidate::new(1, &low_bit) < Candidate::new(1, &other));
    }

    #[test]
    fn test_faster_branch_wins_tie() {
        let fx = Fixture::new(&square(100.0, 1000.0));
        let tree = fx.planner().route_tree(&id("dst"), None);
        assert_eq!(via(&tree), ["s1", "s3", "s4", "dst"]);

        let fx = Fixture::new(&square(1000.0, 100.0));
        let tree = fx.planner().route_tree(&id("dst"), None);
        assert_eq!(via(&tree), ["s1", "s2", "s4", "dst"]);
    }

    #[test]
    fn test_lower_port_bit_wins_tie() {
        // equal speeds: s4 receives from s2 on p1 (bit 0) and from s3 on p2 (bit 1)
        let fx = Fixture::new(&square(100.0, 100.0));
        let tree = fx.planner().route_tree(&id("dst"), None);
        assert_eq!(via(&tree), ["s1", "s2", "s4", "dst"]);
        assert_eq!(tree.depth(&id("src")), Some(4));
    }

    #[test]
    fn test_tree_is_pruned_to_source_chains() {
        let mut topo = square(100.0, 100.0);
        topo.add_device("idle");
        topo.connect("li", ("s3", "p9"), ("idle", "eth0"), 100.0);
        let fx = Fixture::new(&topo);
        let tree = fx.planner().route_tree(&id("dst"), None);

        let nodes: Vec<&str> = tree.iter().map(|(node, _)| node.as_str()).collect();
        assert_eq!(nodes, ["s1", "s2", "s4", "src"]);
        assert_eq!(tree.hop(&id("s4")).unwrap().outbound_port, "p3");
        assert_eq!(tree.hop(&id("s4")).unwrap().inbound_port, "eth0");
    }

    #[test]
    fn test_failure_forces_other_branch() {
        let fx = Fixture::new(&square(100.0, 100.0));
        let planner = fx.planner();

        let link_down = Failure::Link(LinkId::new("b"));
        assert_eq!(via(&planner.route_tree(&id("dst"), Some(&link_down))), ["s1", "s3", "s4", "dst"]);

        let node_down = Failure::Node(id("s2"));
        let routes = planner.routes(Some(&node_down));
        assert_eq!(via(routes.tree(&id("dst")).unwrap()), ["s1", "s3", "s4", "dst"]);
    }

    #[test]
    fn test_type2_failure_reuses_primary() {
        let fx = Fixture::new(&square(100.0, 100.0));
        let planner = fx.planner();
        let failure = Failure::Link(LinkId::new("ld"));

        let routes = planner.routes(Some(&failure));
        assert!(Arc::ptr_eq(&routes, planner.primary()));
        assert_eq!(
            planner.route_tree(&id("dst"), Some(&failure)),
            planner.route_tree(&id("dst"), None)
        );
    }

    #[test]
    fn test_disabled_short_circuit_recomputes() {
        let fx = Fixture::new(&square(100.0, 100.0));
        let planner = fx.planner();
        let failure = Failure::Link(LinkId::new("ld"));

        let config = EngineConfig {
            bridge_short_circuit: false,
            parallel_trees: false,
            ..EngineConfig::default()
        };
        let slow = GlobalPlanner::new(&fx.adjacency, &fx.demand, &fx.classification, &config);
        let recomputed = slow.routes(Some(&failure));

        // the bridge to the destination is gone, so nothing reaches it
        assert!(recomputed.tree(&id("dst")).unwrap().is_empty());
        // but walking the primary tree stops at the same place
        let primary_path = planner.primary().tree(&id("dst")).unwrap().path(&id("src"), Some(&failure));
        assert_eq!(primary_path.len(), 3);
    }

    #[test]
    fn test_unreachable_source_is_absent() {
        let mut topo = square(100.0, 100.0);
        topo.add_switch("s9");
        topo.add_device("far");
        topo.connect("lf", ("s9", "p1"), ("far", "eth0"), 100.0);
        topo.add_unicast("t2", "far", "dst", 1.0);
        let fx = Fixture::new(&topo);
        let tree = fx.planner().route_tree(&id("dst"), None);

        assert!(tree.contains(&id("src")));
        assert!(!tree.contains(&id("far")));
        assert!(tree.path(&id("far"), None).is_empty());
    }

    /// s1 hub with src; s1-s2 and s1-s3 branches; m1,m2 on s2; m3 on s3
    fn multicast_topology() -> Topology {
        let mut topo = Topology::new();
        for s in ["s1", "s2", "s3", "s4"] {
            topo.add_switch(s);
        }
        for d in ["src", "m1", "m2", "m3", "bystander"] {
            topo.add_device(d);
        }
        topo.connect("l12", ("s1", "p1"), ("s2", "p1"), 100.0);
        topo.connect("l13", ("s1", "p2"), ("s3", "p1"), 100.0);
        topo.connect("l14", ("s1", "p3"), ("s4", "p1"), 100.0);
        topo.connect("ls", ("s1", "p4"), ("src", "eth0"), 100.0);
        topo.connect("lm1", ("s2", "p2"), ("m1", "eth0"), 100.0);
        topo.connect("lm2", ("s2", "p3"), ("m2", "eth0"), 100.0);
        topo.connect("lm3", ("s3", "p2"), ("m3", "eth0"), 100.0);
        topo.connect("lb", ("s4", "p2"), ("bystander", "eth0"), 100.0);
        topo.add_group("g", ["m1", "m2", "m3"]);
        topo.add_multicast("t", "src", "g", 5.0);
        topo
    }

    #[test]
    fn test_multicast_tree_branches() {
        let fx = Fixture::new(&multicast_topology());
        let planner = fx.planner();
        let tree = planner.primary().multicast_tree(&GroupId::new("g")).unwrap();

        assert_eq!(tree.source(), &id("src"));
        assert_eq!(tree.hops(&id("s1")).unwrap().len(), 2);
        assert_eq!(tree.hops(&id("s2")).unwrap().len(), 2);

        let nodes: Vec<&str> = tree.nodes().into_iter().map(NodeId::as_str).collect();
        assert_eq!(nodes, ["m1", "m2", "m3", "s1", "s2", "s3", "src"]);

        let walk = tree.walk(None);
        assert_eq!(walk.len(), 6);
        assert_eq!(walk[0].link, LinkId::new("ls"));
    }

    #[test]
    fn test_multicast_skips_other_components() {
        let mut topo = multicast_topology();
        topo.add_switch("s9");
        topo.add_device("m4");
        topo.connect("l9", ("s9", "p1"), ("m4", "eth0"), 100.0);
        topo.add_group("g", ["m1", "m4"]);
        let fx = Fixture::new(&topo);
        let tree = fx.planner().primary().multicast_tree(&GroupId::new("g")).unwrap().clone();

        assert!(tree.nodes().contains(&id("m1")));
        assert!(!tree.nodes().contains(&id("m4")));
    }

    #[test]
    fn test_overview_aggregates_and_stops_at_failure() {
        let mut topo = multicast_topology();
        topo.add_unicast("u1", "m1", "m3", 1.0);
        topo.add_unicast("u2", "m2", "m3", 2.0);
        let fx = Fixture::new(&topo);
        let planner = fx.planner();

        let overview = planner.overview(planner.primary(), None);
        let s1_to_s3 = overview
            .direction(&LinkId::new("l13"), &id("s1"), &id("s3"))
            .unwrap();
        // two unicast flows plus the multicast flow
        assert_eq!(s1_to_s3.traffic.len(), 3);
        assert_eq!(s1_to_s3.bandwidth, 8.0);
        assert!(overview.link(&LinkId::new("lb")).is_none());

        // s1-s3 is a bridge: primary routes stay, walks stop in front of it
        let failure = Failure::Link(LinkId::new("l13"));
        let routes = planner.routes(Some(&failure));
        assert!(Arc::ptr_eq(&routes, planner.primary()));
        let overview = planner.overview(&routes, Some(&failure));
        assert!(overview.link(&LinkId::new("l13")).is_none());
        assert!(overview.link(&LinkId::new("lm3")).is_none());
        assert_eq!(
            overview
                .direction(&LinkId::new("lm1"), &id("m1"), &id("s2"))
                .unwrap()
                .bandwidth,
            1.0
        );
        let s2_to_s1 = overview
            .direction(&LinkId::new("l12"), &id("s2"), &id("s1"))
            .unwrap();
        assert_eq!(s2_to_s1.bandwidth, 3.0);
    }

    #[test]
    fn test_sequential_and_parallel_agree() {
        let fx = Fixture::new(&multicast_topology());
        let config = EngineConfig {
            parallel_trees: false,
            ..EngineConfig::default()
        };
        let sequential = GlobalPlanner::new(&fx.adjacency, &fx.demand, &fx.classification, &config);
        assert_eq!(sequential.primary(), fx.planner().primary());
    }
}
