//! Bridge classifier
//!
//! Splits the topology into connected components and tags every link and node with
//! the impact its failure has on routing:
//!
//! | Tag   | Reachability lost? | New routes needed? |
//! |-------|--------------------|--------------------|
//! | TYPE1 | no                 | yes                |
//! | TYPE2 | yes                | no                 |
//! | TYPE3 | yes                | yes                |
//!
//! The search is the low-link bridge search, run once per component from the lowest
//! unvisited switch ID, with an explicit stack instead of recursion. Back edges lower
//! a node's low-link to the *low-link* of the neighbor it reaches (not its order),
//! which can only make the classification more conservative.
//!
//! A TYPE2 tag lets the global planner reuse the primary routes unchanged, so it is
//! only ever given to entities whose failure cannot reroute reachable traffic.

use crate::adjacency::{Adjacency, AdjacencyEntry, Failure};
use crate::topology::{LinkId, NodeId, SnapshotId};
use dashmap::DashMap;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Failure-impact category of a link or node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureImpact {
    /// Everything stays reachable, traffic takes failover routes
    #[serde(rename = "TYPE1")]
    Type1,
    /// Some traffic becomes unreachable, the rest keeps its primary route
    #[serde(rename = "TYPE2")]
    Type2,
    /// Some traffic becomes unreachable, some needs failover routes
    #[serde(rename = "TYPE3")]
    Type3,
}

impl std::fmt::Display for FailureImpact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureImpact::Type1 => write!(f, "TYPE1"),
            FailureImpact::Type2 => write!(f, "TYPE2"),
            FailureImpact::Type3 => write!(f, "TYPE3"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ComponentId(pub usize);

/// Per-snapshot classification of links and nodes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    nodes: BTreeMap<NodeId, FailureImpact>,
    links: BTreeMap<LinkId, FailureImpact>,
    node_components: BTreeMap<NodeId, ComponentId>,
    link_components: BTreeMap<LinkId, ComponentId>,
    members: BTreeMap<ComponentId, BTreeSet<NodeId>>,
}

impl Classification {
    /// Classify every link and node of the adjacency.
    ///
    /// Every node starts in its own component and devices start as TYPE2; each DFS
    /// then merges what it reaches into the root's component and overrides the tags.
    pub fn classify(adjacency: &Adjacency) -> Self {
        let mut node_components: BTreeMap<NodeId, ComponentId> = adjacency
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), ComponentId(i)))
            .collect();
        let mut next_component = node_components.len();

        let mut nodes: BTreeMap<NodeId, FailureImpact> = adjacency
            .nodes()
            .iter()
            .filter(|id| !adjacency.is_switch(id))
            .map(|id| (id.clone(), FailureImpact::Type2))
            .collect();
        let mut links = BTreeMap::new();
        let mut link_components = BTreeMap::new();

        let mut untraversed: BTreeSet<NodeId> = adjacency.switches().clone();
        while let Some(root) = untraversed.pop_first() {
            let component = match node_components.get(&root) {
                Some(component) => *component,
                None => {
                    next_component += 1;
                    ComponentId(next_component - 1)
                }
            };

            let result = BridgeSearch::new(adjacency).run(&root);
            debug!(
                root = %root,
                nodes = result.nodes.len(),
                links = result.links.len(),
                cut_links = result.cut_links.len(),
                "classified component"
            );

            for (node, impact) in result.nodes {
                untraversed.remove(&node);
                node_components.insert(node.clone(), component);
                nodes.insert(node, impact);
            }
            for link in result.links {
                let impact = if result.cut_links.contains(&link) {
                    FailureImpact::Type2
                } else {
                    FailureImpact::Type1
                };
                link_components.insert(link.clone(), component);
                links.insert(link, impact);
            }
        }

        let mut members: BTreeMap<ComponentId, BTreeSet<NodeId>> = BTreeMap::new();
        for (node, component) in &node_components {
            members.entry(*component).or_default().insert(node.clone());
        }

        Self {
            nodes,
            links,
            node_components,
            link_components,
            members,
        }
    }

    pub fn node_impact(&self, node: &NodeId) -> Option<FailureImpact> {
        self.nodes.get(node).copied()
    }

    pub fn link_impact(&self, link: &LinkId) -> Option<FailureImpact> {
        self.links.get(link).copied()
    }

    pub fn impact_of(&self, failure: &Failure) -> Option<FailureImpact> {
        match failure {
            Failure::Link(link) => self.link_impact(link),
            Failure::Node(node) => self.node_impact(node),
        }
    }

    /// Whether the primary routes are still valid under this failure
    pub fn keeps_primary_routes(&self, failure: &Failure) -> bool {
        self.impact_of(failure) == Some(FailureImpact::Type2)
    }

    pub fn component_of(&self, node: &NodeId) -> Option<ComponentId> {
        self.node_components.get(node).copied()
    }

    pub fn link_component(&self, link: &LinkId) -> Option<ComponentId> {
        self.link_components.get(link).copied()
    }

    /// Nodes sharing a component with `node` (including itself)
    pub fn component_members(&self, node: &NodeId) -> Option<&BTreeSet<NodeId>> {
        self.component_of(node)
            .and_then(|component| self.members.get(&component))
    }

    pub fn same_component(&self, a: &NodeId, b: &NodeId) -> bool {
        match (self.component_of(a), self.component_of(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    pub fn component_count(&self) -> usize {
        self.members.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, FailureImpact)> {
        self.nodes.iter().map(|(id, impact)| (id, *impact))
    }

    pub fn links(&self) -> impl Iterator<Item = (&LinkId, FailureImpact)> {
        self.links.iter().map(|(id, impact)| (id, *impact))
    }
}

/// What one DFS found in its component
struct SearchResult {
    nodes: Vec<(NodeId, FailureImpact)>,
    links: BTreeSet<LinkId>,
    cut_links: BTreeSet<LinkId>,
}

/// DFS bookkeeping for a single node
#[derive(Debug, Clone, Copy)]
struct NodeInfo<'a> {
    order: usize,
    low: usize,
    parent: Option<&'a NodeId>,
}

/// Explicit-stack frame: a node and the position in its adjacency list.
struct Frame<'a> {
    node: &'a NodeId,
    entries: &'a [AdjacencyEntry],
    next: usize,
    /// Each tree child's low-link compared with this node's order
    child_orders: Vec<Ordering>,
    /// Whether a non-tree edge leads to an ancestor
    reaches_above: bool,
}

struct BridgeSearch<'a> {
    adjacency: &'a Adjacency,
    info: HashMap<&'a NodeId, NodeInfo<'a>>,
    counter: usize,
    links: BTreeSet<LinkId>,
    cut_links: BTreeSet<LinkId>,
    nodes: Vec<(NodeId, FailureImpact)>,
}

impl<'a> BridgeSearch<'a> {
    fn new(adjacency: &'a Adjacency) -> Self {
        Self {
            adjacency,
            info: HashMap::new(),
            counter: 0,
            links: BTreeSet::new(),
            cut_links: BTreeSet::new(),
            nodes: Vec::new(),
        }
    }

    fn visit(&mut self, node: &'a NodeId, parent: Option<&'a NodeId>) -> Frame<'a> {
        self.info.insert(
            node,
            NodeInfo {
                order: self.counter,
                low: self.counter,
                parent,
            },
        );
        Frame {
            node,
            entries: self.adjacency.incoming(node),
            next: 0,
            child_orders: Vec::new(),
            reaches_above: false,
        }
    }

    fn run(mut self, root: &'a NodeId) -> SearchResult {
        let mut stack = vec![self.visit(root, None)];

        while let Some(top) = stack.len().checked_sub(1) {
            let (node, entries, next) = (stack[top].node, stack[top].entries, stack[top].next);

            if next == entries.len() {
                let Some(done) = stack.pop() else { break };
                let impact = self.impact(&done);
                self.nodes.push((done.node.clone(), impact));

                if let Some(parent) = stack.last_mut() {
                    self.finish_tree_edge(parent, done.node);
                }
                continue;
            }

            let entry = &entries[next];
            let child = &entry.from;
            self.links.insert(entry.link.clone());

            if !self.info.contains_key(child) {
                self.counter += 1;
                let frame = self.visit(child, Some(node));
                stack.push(frame);
                continue;
            }

            let (node_info, child_info) = (self.info[node], self.info[child]);
            if node_info.parent != Some(child) {
                self.lower(node, child_info.low);
                if child_info.order < node_info.order {
                    stack[top].reaches_above = true;
                }
            }
            if child_info.low > node_info.order {
                self.cut_links.insert(entry.link.clone());
            }
            stack[top].next += 1;
        }

        SearchResult {
            nodes: self.nodes,
            links: self.links,
            cut_links: self.cut_links,
        }
    }

    /// Account for a finished tree child at the parent's current entry
    fn finish_tree_edge(&mut self, parent: &mut Frame<'a>, child: &'a NodeId) {
        let child_low = self.info[child].low;
        self.lower(parent.node, child_low);

        let parent_order = self.info[parent.node].order;
        parent.child_orders.push(child_low.cmp(&parent_order));
        if child_low > parent_order {
            self.cut_links
                .insert(parent.entries[parent.next].link.clone());
        }
        parent.next += 1;
    }

    fn lower(&mut self, node: &'a NodeId, value: usize) {
        if let Some(info) = self.info.get_mut(node) {
            info.low = info.low.min(value);
        }
    }

    fn impact(&self, frame: &Frame<'a>) -> FailureImpact {
        let orders = &frame.child_orders;
        let all = |wanted: Ordering| orders.iter().all(|o| *o == wanted);
        let is_root = self.info[frame.node].parent.is_none();

        if is_root {
            if orders.as_slice() == [Ordering::Equal] {
                FailureImpact::Type1
            } else if all(Ordering::Greater) {
                FailureImpact::Type2
            } else {
                FailureImpact::Type3
            }
        } else if all(Ordering::Less) {
            FailureImpact::Type1
        } else if all(Ordering::Greater) {
            // Children only hang off this node, but a node that also sits on a cycle
            // carries transit traffic that would need rerouting.
            if frame.reaches_above {
                FailureImpact::Type3
            } else {
                FailureImpact::Type2
            }
        } else {
            FailureImpact::Type3
        }
    }
}

/// Classification results shared between computations on the same snapshot.
///
/// Keyed by snapshot fingerprint, so a changed topology never hits a stale entry.
#[derive(Debug, Default)]
pub struct ClassificationCache {
    entries: DashMap<SnapshotId, Arc<Classification>>,
}

impl ClassificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached classification for `snapshot`, classifying on a miss
    pub fn get_or_classify(&self, snapshot: SnapshotId, adjacency: &Adjacency) -> Arc<Classification> {
        if let Some(hit) = self.entries.get(&snapshot) {
            debug!(snapshot = %snapshot, "classification cache hit");
            return Arc::clone(hit.value());
        }

        let classification = Arc::new(Classification::classify(adjacency));
        Arc::clone(self.entries.entry(snapshot).or_insert(classification).value())
    }

    pub fn get(&self, snapshot: &SnapshotId) -> Option<Arc<Classification>> {
        self.entries.get(snapshot).map(|hit| Arc::clone(hit.value()))
    }

    /// Drop every entry except the one for the current snapshot
    pub fn retain_only(&self, snapshot: &SnapshotId) {
        self.entries.retain(|id, _| id == snapshot);
    }

    pub fn invalidate(&self, snapshot: &SnapshotId) {
        self.entries.remove(snapshot);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
