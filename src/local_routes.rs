//! Local route planner
//!
//! Pre-provisions, for every switch and destination, the primary outbound port and
//! one backup port the switch can switch to the moment it sees its primary port go
//! down, before any controller has recomputed anything.
//!
//! The primary tree is a full (unpruned) backward search from the destination over
//! the failure-free topology, kept in an arena with parent indices so ancestor
//! checks are a walk up the tree.
//!
//! Backup ports only account for link failures. Multicast traffic gets no backups:
//! a local detour on one switch can diverge from the delivery tree elsewhere and
//! loop until the controller steps in.

use crate::adjacency::{Adjacency, AdjacencyEntry, TrafficDemand};
use crate::bridges::Classification;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::global_routes::{Candidate, Frontier};
use crate::topology::{LinkId, NodeId};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// An outbound port together with where it leads
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortChoice {
    pub outbound_port: String,
    pub next: NodeId,
    pub link: LinkId,
}

/// How a backup port was picked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupOrigin {
    /// Best neighbor outside the switch's own subtree
    Alternate,
    /// No alternate exists; hand the traffic to a downstream child
    Downstream,
}

/// Forwarding choice of one node toward one destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalRoute {
    pub primary: PortChoice,
    pub backup: Option<PortChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_origin: Option<BackupOrigin>,
}

/// Local routes of every node, per destination
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct LocalRoutes {
    destinations: BTreeMap<NodeId, BTreeMap<NodeId, LocalRoute>>,
}

impl LocalRoutes {
    /// Routes toward `destination`, keyed by forwarding node
    pub fn toward(&self, destination: &NodeId) -> Option<&BTreeMap<NodeId, LocalRoute>> {
        self.destinations.get(destination)
    }

    pub fn route(&self, destination: &NodeId, node: &NodeId) -> Option<&LocalRoute> {
        self.toward(destination)?.get(node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &BTreeMap<NodeId, LocalRoute>)> {
        self.destinations.iter()
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct TreeNode<'a> {
    cost: u32,
    parent: Option<usize>,
    entry: &'a AdjacencyEntry,
}

/// Unpruned shortest-route tree in arena form
struct LocalTree<'a> {
    root: &'a NodeId,
    arena: Vec<TreeNode<'a>>,
    index: HashMap<&'a NodeId, usize>,
}

impl<'a> LocalTree<'a> {
    fn node(&self, id: &NodeId) -> Option<&TreeNode<'a>> {
        self.index.get(id).map(|&i| &self.arena[i])
    }

    /// Hops to the root; zero for the root itself
    fn cost(&self, id: &NodeId) -> Option<u32> {
        if id == self.root {
            return Some(0);
        }
        self.node(id).map(|node| node.cost)
    }

    fn parent(&self, id: &NodeId) -> Option<&'a NodeId> {
        self.node(id).map(|node| &node.entry.to)
    }

    /// Whether `ancestor` lies strictly above `id` on its path to the root
    fn is_below(&self, id: &NodeId, ancestor: &NodeId) -> bool {
        let mut cursor = self.index.get(id).and_then(|&i| self.arena[i].parent);
        while let Some(i) = cursor {
            let node = &self.arena[i];
            if &node.entry.from == ancestor {
                return true;
            }
            cursor = node.parent;
        }
        false
    }
}

/// Local route planner bound to one snapshot
pub struct LocalPlanner<'a> {
    adjacency: &'a Adjacency,
    demand: &'a TrafficDemand,
    classification: &'a Classification,
    config: &'a EngineConfig,
}

impl<'a> LocalPlanner<'a> {
    pub fn new(
        adjacency: &'a Adjacency,
        demand: &'a TrafficDemand,
        classification: &'a Classification,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            adjacency,
            demand,
            classification,
            config,
        }
    }

    /// Local routes toward every destination with demand.
    ///
    /// Fails with [`EngineError::ExhaustedSearch`] when some source or switch in a
    /// destination's component cannot be reached.
    pub fn plan(&self) -> Result<LocalRoutes, EngineError> {
        let destinations: Vec<&NodeId> = self.demand.sources.keys().collect();
        let destinations = if self.config.parallel_trees {
            destinations
                .par_iter()
                .map(|dst| self.routes_toward(dst).map(|routes| ((*dst).clone(), routes)))
                .collect::<Result<BTreeMap<_, _>, EngineError>>()?
        } else {
            destinations
                .iter()
                .map(|dst| self.routes_toward(dst).map(|routes| ((*dst).clone(), routes)))
                .collect::<Result<BTreeMap<_, _>, EngineError>>()?
        };

        info!(destinations = destinations.len(), "computed local routes");
        Ok(LocalRoutes { destinations })
    }

    /// Primary and backup ports of every source and switch toward `destination`
    pub fn routes_toward(&self, destination: &NodeId) -> Result<BTreeMap<NodeId, LocalRoute>, EngineError> {
        let (sources, switches) = self.demand_nodes(destination);
        let tree = self.search(destination, &sources, &switches)?;
        let mut routes = BTreeMap::new();

        for src in &sources {
            if let Some(node) = tree.node(src) {
                routes.insert((*src).clone(), LocalRoute {
                    primary: primary_choice(node.entry),
                    backup: None,
                    backup_origin: None,
                });
            }
        }

        for sw in &switches {
            let Some(node) = tree.node(sw) else {
                continue;
            };
            let parent = &node.entry.to;
            let choice = match self.alternate(&tree, sw, parent) {
                Some(choice) => Some((choice, BackupOrigin::Alternate)),
                None if parent == destination => None,
                None => self
                    .downstream(&tree, sw)
                    .map(|choice| (choice, BackupOrigin::Downstream)),
            };
            if choice.is_none() {
                debug!(switch = %sw, destination = %destination, "no backup port");
            }
            let (backup, backup_origin) = choice.unzip();
            routes.insert((*sw).clone(), LocalRoute {
                primary: primary_choice(node.entry),
                backup,
                backup_origin,
            });
        }

        Ok(routes)
    }

    /// Sources and switches sharing the destination's component
    fn demand_nodes(&self, destination: &NodeId) -> (BTreeSet<&'a NodeId>, BTreeSet<&'a NodeId>) {
        let Some(members) = self.classification.component_members(destination) else {
            return (BTreeSet::new(), BTreeSet::new());
        };
        let sources = self
            .demand
            .sources
            .get(destination)
            .into_iter()
            .flatten()
            .filter(|src| *src != destination && members.contains(*src))
            .collect();
        let switches = self
            .adjacency
            .switches()
            .iter()
            .filter(|sw| *sw != destination && members.contains(*sw))
            .collect();
        (sources, switches)
    }

    fn search<'t>(
        &self,
        destination: &'t NodeId,
        sources: &BTreeSet<&'t NodeId>,
        switches: &BTreeSet<&'t NodeId>,
    ) -> Result<LocalTree<'t>, EngineError>
    where
        'a: 't,
    {
        let mut untraversed: BTreeSet<&NodeId> = sources.union(switches).copied().collect();
        let mut tree = LocalTree {
            root: destination,
            arena: Vec::new(),
            index: HashMap::new(),
        };

        let mut frontier = Frontier::new(destination);
        for entry in self.adjacency.incoming(destination) {
            frontier.push(Candidate::new(entry.weight, entry));
        }

        while !untraversed.is_empty() {
            let Some(Candidate { cost, entry }) = frontier.pop() else {
                let missing: Vec<NodeId> = untraversed.into_iter().cloned().collect();
                warn!(
                    destination = %destination,
                    missing = missing.len(),
                    "local route search exhausted"
                );
                return Err(EngineError::ExhaustedSearch {
                    destination: destination.clone(),
                    missing,
                });
            };

            let node = &entry.from;
            untraversed.remove(node);
            tree.index.insert(node, tree.arena.len());
            tree.arena.push(TreeNode {
                cost,
                parent: tree.index.get(&entry.to).copied(),
                entry,
            });

            for next in self.adjacency.incoming(node) {
                frontier.push(Candidate::new(cost + next.weight, next));
            }
        }

        Ok(tree)
    }

    /// Cheapest switch neighbor that is neither the parent nor below `sw`
    fn alternate(&self, tree: &LocalTree<'_>, sw: &NodeId, parent: &NodeId) -> Option<PortChoice> {
        self.adjacency
            .incoming(sw)
            .iter()
            .filter(|entry| self.adjacency.is_switch(&entry.from))
            .filter(|entry| &entry.from != parent && !tree.is_below(&entry.from, sw))
            .filter_map(|entry| Some((tree.cost(&entry.from)? + entry.weight, entry)))
            .min_by(|(a_cost, a), (b_cost, b)| {
                a_cost
                    .cmp(b_cost)
                    .then_with(|| b.speed.total_cmp(&a.speed))
                    .then_with(|| a.to_port_bit.cmp(&b.to_port_bit))
                    .then_with(|| a.to_port.cmp(&b.to_port))
                    .then_with(|| a.from.cmp(&b.from))
                    .then_with(|| a.link.cmp(&b.link))
            })
            .map(|(_, entry)| backup_choice(entry))
    }

    /// First switch neighbor whose primary route goes through `sw`
    fn downstream(&self, tree: &LocalTree<'_>, sw: &NodeId) -> Option<PortChoice> {
        self.adjacency
            .incoming(sw)
            .iter()
            .filter(|entry| self.adjacency.is_switch(&entry.from))
            .find(|entry| tree.parent(&entry.from) == Some(sw))
            .map(backup_choice)
    }
}

fn primary_choice(entry: &AdjacencyEntry) -> PortChoice {
    PortChoice {
        outbound_port: entry.from_port.clone(),
        next: entry.to.clone(),
        link: entry.link.clone(),
    }
}

/// `entry` arrives at the switch, so the switch sends out of its `to_port`
fn backup_choice(entry: &AdjacencyEntry) -> PortChoice {
    PortChoice {
        outbound_port: entry.to_port.clone(),
        next: entry.from.clone(),
        link: entry.link.clone(),
    }
}
