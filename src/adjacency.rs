//! Topology adapter
//!
//! Turns a [`Topology`] snapshot into the structures the planners search over:
//! - a directed adjacency keyed by the *receiving* node (two entries per link)
//! - traffic demand clustered by destination, then source
//! - the destination → eligible-source mapping covering unicast and multicast demand

use crate::config::EngineConfig;
use crate::error::{EngineError, EntityKind};
use crate::topology::{
    Endpoint, GroupId, LinkId, NodeId, Protocol, Topology, TrafficId, TrafficTarget,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Every link costs one hop.
pub const HOP_WEIGHT: u32 = 1;

/// One direction of a link, as seen from the node it arrives at.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjacencyEntry {
    pub weight: u32,
    pub from: NodeId,
    pub to: NodeId,
    /// Available bandwidth of the link
    pub speed: f64,
    pub from_port: String,
    pub from_port_bit: i64,
    pub to_port: String,
    pub to_port_bit: i64,
    pub link: LinkId,
}

/// A single failed entity. At most one may be active per computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Failure {
    Link(LinkId),
    Node(NodeId),
}

impl Failure {
    /// Combine the optional failed link and failed node of a request.
    pub fn from_parts(
        link: Option<LinkId>,
        node: Option<NodeId>,
    ) -> Result<Option<Failure>, EngineError> {
        match (link, node) {
            (Some(link), Some(node)) => Err(EngineError::InputConflict { link, node }),
            (Some(link), None) => Ok(Some(Failure::Link(link))),
            (None, Some(node)) => Ok(Some(Failure::Node(node))),
            (None, None) => Ok(None),
        }
    }

    /// Whether walking `link` into `next` would cross this failure
    pub fn blocks(&self, link: &LinkId, next: &NodeId) -> bool {
        match self {
            Failure::Link(failed) => failed == link,
            Failure::Node(failed) => failed == next,
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Link(id) => write!(f, "link {}", id),
            Failure::Node(id) => write!(f, "node {}", id),
        }
    }
}

/// Directed adjacency of the whole snapshot
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    incoming: BTreeMap<NodeId, Vec<AdjacencyEntry>>,
    switches: BTreeSet<NodeId>,
    nodes: Vec<NodeId>,
}

impl Adjacency {
    /// Build the adjacency, two entries per link (one per direction)
    pub fn from_topology(topology: &Topology, config: &EngineConfig) -> Result<Self, EngineError> {
        let mut incoming: BTreeMap<NodeId, Vec<AdjacencyEntry>> = BTreeMap::new();

        for (link_id, link) in &topology.links {
            let [x, y] = &link.endpoints;
            let x_bit = port_bit(topology, x, config)?;
            let y_bit = port_bit(topology, y, config)?;

            incoming.entry(y.node.clone()).or_default().push(AdjacencyEntry {
                weight: HOP_WEIGHT,
                from: x.node.clone(),
                to: y.node.clone(),
                speed: link.available_bandwidth,
                from_port: x.port.clone(),
                from_port_bit: x_bit,
                to_port: y.port.clone(),
                to_port_bit: y_bit,
                link: link_id.clone(),
            });
            incoming.entry(x.node.clone()).or_default().push(AdjacencyEntry {
                weight: HOP_WEIGHT,
                from: y.node.clone(),
                to: x.node.clone(),
                speed: link.available_bandwidth,
                from_port: y.port.clone(),
                from_port_bit: y_bit,
                to_port: x.port.clone(),
                to_port_bit: x_bit,
                link: link_id.clone(),
            });
        }

        let switches = topology.switches().cloned().collect();
        let nodes = topology
            .nodes
            .iter()
            .filter(|(_, node)| node.protocol == Protocol::Eth)
            .map(|(id, _)| id.clone())
            .collect();

        Ok(Self {
            incoming,
            switches,
            nodes,
        })
    }

    /// All entries arriving at `node` (equivalently, all of its neighbors)
    pub fn incoming(&self, node: &NodeId) -> &[AdjacencyEntry] {
        self.incoming.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn switches(&self) -> &BTreeSet<NodeId> {
        &self.switches
    }

    pub fn is_switch(&self, node: &NodeId) -> bool {
        self.switches.contains(node)
    }

    /// ETH nodes in snapshot order
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Number of directed entries (twice the link count)
    pub fn entry_count(&self) -> usize {
        self.incoming.values().map(Vec::len).sum()
    }

    /// View of the adjacency with one failed entity pruned
    pub fn view<'a>(&'a self, failure: Option<&'a Failure>) -> AdjacencyView<'a> {
        AdjacencyView {
            adjacency: self,
            failure,
        }
    }
}

fn known_node<'a>(topology: &Topology, id: &'a NodeId) -> Result<&'a NodeId, EngineError> {
    if topology.nodes.contains_key(id) {
        Ok(id)
    } else {
        Err(EngineError::unknown(EntityKind::Node, id))
    }
}

fn port_bit(topology: &Topology, endpoint: &Endpoint, config: &EngineConfig) -> Result<i64, EngineError> {
    let node = topology
        .node(&endpoint.node)
        .ok_or_else(|| EngineError::unknown(EntityKind::Node, &endpoint.node))?;
    let port = node.ports.get(&endpoint.port).ok_or_else(|| {
        EngineError::unknown(
            EntityKind::Port,
            format!("{}:{}", endpoint.node, endpoint.port),
        )
    })?;
    Ok(port.port_bit.unwrap_or(config.device_port_bit))
}

/// Adjacency with the failed link, or the failed node and its incident links, removed.
#[derive(Debug, Clone, Copy)]
pub struct AdjacencyView<'a> {
    adjacency: &'a Adjacency,
    failure: Option<&'a Failure>,
}

impl<'a> AdjacencyView<'a> {
    pub fn failure(&self) -> Option<&'a Failure> {
        self.failure
    }

    pub fn incoming(&self, node: &NodeId) -> impl Iterator<Item = &'a AdjacencyEntry> + 'a {
        let failure = self.failure;
        let entries = match failure {
            Some(Failure::Node(failed)) if failed == node => &[][..],
            _ => self.adjacency.incoming(node),
        };
        entries.iter().filter(move |entry| match failure {
            Some(Failure::Link(failed)) => &entry.link != failed,
            Some(Failure::Node(failed)) => &entry.from != failed,
            None => true,
        })
    }
}

/// One traffic entry's contribution to a cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficShare {
    #[serde(rename = "ID")]
    pub id: TrafficId,
    pub bandwidth: f64,
}

/// Traffic entries sharing one (destination, source) pair
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TrafficCluster {
    pub traffic: Vec<TrafficShare>,
    pub bandwidth: f64,
}

impl TrafficCluster {
    pub fn push(&mut self, id: TrafficId, bandwidth: f64) {
        self.traffic.push(TrafficShare { id, bandwidth });
        self.bandwidth += bandwidth;
    }

    pub fn merge(&mut self, other: &TrafficCluster) {
        self.traffic.extend(other.traffic.iter().cloned());
        self.bandwidth += other.bandwidth;
    }
}

/// Clustered traffic demand of a snapshot
#[derive(Debug, Clone, Default)]
pub struct TrafficDemand {
    /// destination device → source device → cluster
    pub unicast: BTreeMap<NodeId, BTreeMap<NodeId, TrafficCluster>>,
    /// multicast group → source device → cluster
    pub multicast: BTreeMap<GroupId, BTreeMap<NodeId, TrafficCluster>>,
    /// destination device → every source that sends to it, unicast or multicast
    pub sources: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// member devices of every group carrying traffic
    pub members: BTreeMap<GroupId, Vec<NodeId>>,
}

impl TrafficDemand {
    /// Cluster the snapshot's traffic.
    ///
    /// A multicast group carrying traffic must have exactly one source device;
    /// anything else is rejected with [`EngineError::MissingSingleSource`].
    /// Sources, unicast destinations and members of those groups must name
    /// nodes of the snapshot.
    pub fn from_topology(topology: &Topology) -> Result<Self, EngineError> {
        let mut demand = TrafficDemand::default();

        for (traffic_id, traffic) in &topology.traffic {
            let source = known_node(topology, &traffic.source.device)?.clone();
            match traffic.target() {
                Some(TrafficTarget::Device(dst)) => {
                    known_node(topology, dst)?;
                    demand
                        .unicast
                        .entry(dst.clone())
                        .or_default()
                        .entry(source)
                        .or_default()
                        .push(traffic_id.clone(), traffic.bandwidth);
                }
                Some(TrafficTarget::Group(group)) => {
                    if !topology.multicast_groups.contains_key(group) {
                        return Err(EngineError::unknown(EntityKind::MulticastGroup, group));
                    }
                    demand
                        .multicast
                        .entry(group.clone())
                        .or_default()
                        .entry(source)
                        .or_default()
                        .push(traffic_id.clone(), traffic.bandwidth);
                }
                None => {
                    return Err(EngineError::InvalidTraffic {
                        traffic: traffic_id.clone(),
                        reason: format!(
                            "{} traffic without a matching destination",
                            traffic.address_method
                        ),
                    })
                }
            }
        }

        for (dst, srcs) in &demand.unicast {
            demand
                .sources
                .entry(dst.clone())
                .or_default()
                .extend(srcs.keys().cloned());
        }

        for (group, srcs) in &demand.multicast {
            if srcs.len() != 1 {
                return Err(EngineError::MissingSingleSource {
                    group: group.clone(),
                    found: srcs.len(),
                });
            }
            let members = topology
                .multicast_groups
                .get(group)
                .map(|g| g.devices.clone())
                .unwrap_or_default();
            for dst in &members {
                known_node(topology, dst)?;
                demand
                    .sources
                    .entry(dst.clone())
                    .or_default()
                    .extend(srcs.keys().cloned());
            }
            demand.members.insert(group.clone(), members);
        }

        Ok(demand)
    }

    /// The single source of a multicast group and its cluster
    pub fn multicast_source(&self, group: &GroupId) -> Option<(&NodeId, &TrafficCluster)> {
        self.multicast.get(group).and_then(|srcs| srcs.iter().next())
    }

    pub fn is_empty(&self) -> bool {
        self.unicast.is_empty() && self.multicast.is_empty()
    }
}
