//! Topology snapshot: nodes, links, traffic and multicast groups
//!
//! This is the read-only view of the entity store that every engine call works from.
//! The record shapes follow the store's JSON layout so a snapshot can be decoded
//! directly with `serde_json`. All collections are ordered maps, which keeps every
//! derived structure (and its iteration order) deterministic for a given snapshot.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

entity_id!(
    /// Node identifier (switch or device)
    NodeId
);
entity_id!(
    /// Link identifier
    LinkId
);
entity_id!(
    /// Traffic identifier
    TrafficId
);
entity_id!(
    /// Multicast group identifier
    GroupId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    /// Traffic endpoint
    Device,
    /// Forwarding element
    Switch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    #[serde(rename = "ETH")]
    Eth,
    /// Anything the engine does not route over
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressMethod {
    Unicast,
    Multicast,
}

impl std::fmt::Display for AddressMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressMethod::Unicast => write!(f, "UNICAST"),
            AddressMethod::Multicast => write!(f, "MULTICAST"),
        }
    }
}

/// Attributes of a single port on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    #[serde(default)]
    pub available_bandwidth: f64,
    /// Small tie-break key, lower preferred. Devices usually leave it unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_bit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
}

impl Port {
    pub fn new(available_bandwidth: f64, port_bit: Option<i64>) -> Self {
        Self {
            available_bandwidth,
            port_bit,
            port_type: None,
            protocol: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "MAC", default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default)]
    pub ports: BTreeMap<String, Port>,
}

impl Node {
    pub fn new(node_type: NodeType) -> Self {
        Self {
            node_type,
            protocol: Protocol::Eth,
            name: None,
            mac: None,
            ports: BTreeMap::new(),
        }
    }

    pub fn is_switch(&self) -> bool {
        self.node_type == NodeType::Switch
    }

    /// Add (or replace) a port
    pub fn add_port(
        &mut self,
        name: impl Into<String>,
        available_bandwidth: f64,
        port_bit: Option<i64>,
    ) -> &mut Self {
        self.ports
            .insert(name.into(), Port::new(available_bandwidth, port_bit));
        self
    }

    pub fn with_mac(&mut self, mac: impl Into<String>) -> &mut Self {
        self.mac = Some(mac.into());
        self
    }

    pub fn with_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }
}

/// One side of a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub node: NodeId,
    pub port: String,
}

impl Endpoint {
    pub fn new(node: impl Into<NodeId>, port: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            port: port.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub endpoints: [Endpoint; 2],
    pub available_bandwidth: f64,
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSource {
    pub device: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrafficDestination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multicast_group: Option<GroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Traffic {
    pub address_method: AddressMethod,
    pub source: TrafficSource,
    pub destination: TrafficDestination,
    pub bandwidth: f64,
}

/// Where a traffic entry is delivered, resolved against its address method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficTarget<'a> {
    Device(&'a NodeId),
    Group(&'a GroupId),
}

impl std::fmt::Display for TrafficTarget<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrafficTarget::Device(id) => write!(f, "{}", id),
            TrafficTarget::Group(id) => write!(f, "{}", id),
        }
    }
}

impl Traffic {
    /// Resolve the destination that matches the address method, if present.
    pub fn target(&self) -> Option<TrafficTarget<'_>> {
        match self.address_method {
            AddressMethod::Unicast => self.destination.device.as_ref().map(TrafficTarget::Device),
            AddressMethod::Multicast => self
                .destination
                .multicast_group
                .as_ref()
                .map(TrafficTarget::Group),
        }
    }

    /// Destination identity as a plain string (device or group ID).
    pub fn target_key(&self) -> Option<&str> {
        self.target().map(|target| match target {
            TrafficTarget::Device(id) => id.as_str(),
            TrafficTarget::Group(id) => id.as_str(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MulticastGroup {
    #[serde(default)]
    pub devices: Vec<NodeId>,
}

/// Identity of a topology snapshot (SHA-256 of its canonical JSON encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotId(pub [u8; 32]);

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Immutable topology snapshot handed to every engine call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default, alias = "node")]
    pub nodes: BTreeMap<NodeId, Node>,
    #[serde(default, alias = "link")]
    pub links: BTreeMap<LinkId, Link>,
    #[serde(default)]
    pub traffic: BTreeMap<TrafficId, Traffic>,
    #[serde(default, alias = "multicast_group")]
    pub multicast_groups: BTreeMap<GroupId, MulticastGroup>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a snapshot from the entity store's JSON export
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Compute the snapshot identity. Equal snapshots always share a fingerprint.
    pub fn fingerprint(&self) -> Result<SnapshotId, EngineError> {
        let encoded = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        Ok(SnapshotId(hasher.finalize().into()))
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn is_switch(&self, id: &NodeId) -> bool {
        self.nodes.get(id).is_some_and(Node::is_switch)
    }

    /// All switch IDs in ascending order
    pub fn switches(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.is_switch())
            .map(|(id, _)| id)
    }

    /// Add a switch, or return the node already stored under `id` untouched
    pub fn add_switch(&mut self, id: impl Into<NodeId>) -> &mut Node {
        self.nodes
            .entry(id.into())
            .or_insert_with(|| Node::new(NodeType::Switch))
    }

    /// Add a device, or return the node already stored under `id` untouched
    pub fn add_device(&mut self, id: impl Into<NodeId>) -> &mut Node {
        self.nodes
            .entry(id.into())
            .or_insert_with(|| Node::new(NodeType::Device))
    }

    /// Link two existing nodes, creating any missing port on either side.
    ///
    /// New switch ports get the next free port-bit (the number of ports already on the
    /// switch); new device ports get none. Ports declared beforehand are kept as-is,
    /// which is how tests engineer port-bit ties.
    pub fn connect(
        &mut self,
        id: impl Into<LinkId>,
        a: (&str, &str),
        b: (&str, &str),
        available_bandwidth: f64,
    ) -> &mut Link {
        for (node_id, port) in [a, b] {
            if let Some(node) = self.nodes.get_mut(&NodeId::new(node_id)) {
                if !node.ports.contains_key(port) {
                    let port_bit = node.is_switch().then_some(node.ports.len() as i64);
                    node.add_port(port, available_bandwidth, port_bit);
                }
            }
        }
        let link = Link {
            endpoints: [Endpoint::new(a.0, a.1), Endpoint::new(b.0, b.1)],
            available_bandwidth,
            protocol: Protocol::Eth,
        };
        upsert(&mut self.links, id.into(), link)
    }

    pub fn add_unicast(
        &mut self,
        id: impl Into<TrafficId>,
        source: impl Into<NodeId>,
        destination: impl Into<NodeId>,
        bandwidth: f64,
    ) -> &mut Traffic {
        self.insert_traffic(
            id.into(),
            Traffic {
                address_method: AddressMethod::Unicast,
                source: TrafficSource {
                    device: source.into(),
                    port: None,
                },
                destination: TrafficDestination {
                    device: Some(destination.into()),
                    ..Default::default()
                },
                bandwidth,
            },
        )
    }

    pub fn add_multicast(
        &mut self,
        id: impl Into<TrafficId>,
        source: impl Into<NodeId>,
        group: impl Into<GroupId>,
        bandwidth: f64,
    ) -> &mut Traffic {
        self.insert_traffic(
            id.into(),
            Traffic {
                address_method: AddressMethod::Multicast,
                source: TrafficSource {
                    device: source.into(),
                    port: None,
                },
                destination: TrafficDestination {
                    multicast_group: Some(group.into()),
                    ..Default::default()
                },
                bandwidth,
            },
        )
    }

    pub fn add_group<I, N>(&mut self, id: impl Into<GroupId>, devices: I) -> &mut MulticastGroup
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        let group = MulticastGroup {
            devices: devices.into_iter().map(Into::into).collect(),
        };
        upsert(&mut self.multicast_groups, id.into(), group)
    }

    fn insert_traffic(&mut self, id: TrafficId, traffic: Traffic) -> &mut Traffic {
        upsert(&mut self.traffic, id, traffic)
    }
}

/// Insert or replace, handing back the stored value
fn upsert<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, value: V) -> &mut V {
    match map.entry(key) {
        Entry::Occupied(mut slot) => {
            slot.insert(value);
            slot.into_mut()
        }
        Entry::Vacant(slot) => slot.insert(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_store_records() {
        let json = r#"{
            "nodes": {
                "s1": {"type": "SWITCH", "protocol": "ETH", "ports": {
                    "p0": {"available_bandwidth": 1000.0, "port_bit": 0, "port_type": "RJ45"}
                }},
                "d1": {"type": "DEVICE", "MAC": "aa:bb:cc:00:00:01", "ports": {
                    "eth0": {"available_bandwidth": 1000.0}
                }}
            },
            "links": {
                "l1": {"endpoints": [{"node": "s1", "port": "p0"}, {"node": "d1", "port": "eth0"}],
                       "available_bandwidth": 1000.0, "protocol": "ETH"}
            },
            "traffic": {
                "t1": {"address_method": "UNICAST",
                       "source": {"device": "d1"},
                       "destination": {"device": "d2"},
                       "bandwidth": 10.0}
            },
            "multicast_groups": {"g1": {"devices": ["d1"]}}
        }"#;

        let topo = Topology::from_json_str(json).unwrap();
        assert_eq!(topo.nodes.len(), 2);
        assert!(topo.is_switch(&NodeId::new("s1")));
        assert_eq!(
            topo.node(&NodeId::new("d1")).unwrap().mac.as_deref(),
            Some("aa:bb:cc:00:00:01")
        );
        assert_eq!(topo.nodes[&NodeId::new("s1")].ports["p0"].port_bit, Some(0));
        assert_eq!(topo.nodes[&NodeId::new("d1")].ports["eth0"].port_bit, None);

        let traffic = &topo.traffic[&TrafficId::new("t1")];
        assert_eq!(
            traffic.target(),
            Some(TrafficTarget::Device(&NodeId::new("d2")))
        );
    }

    #[test]
    fn test_unknown_protocol_is_tolerated() {
        let json = r#"{"nodes": {"x": {"type": "SWITCH", "protocol": "CAN"}}}"#;
        let topo = Topology::from_json_str(json).unwrap();
        assert_eq!(topo.nodes[&NodeId::new("x")].protocol, Protocol::Other);
    }

    #[test]
    fn test_multicast_target_requires_group() {
        let mut topo = Topology::new();
        topo.add_multicast("t1", "d1", "g1", 5.0);
        let traffic = topo.traffic.get_mut(&TrafficId::new("t1")).unwrap();
        assert_eq!(traffic.target_key(), Some("g1"));

        traffic.destination.multicast_group = None;
        traffic.destination.device = Some(NodeId::new("d2"));
        assert_eq!(traffic.target(), None);
    }

    #[test]
    fn test_connect_assigns_port_bits() {
        let mut topo = Topology::new();
        topo.add_switch("s1");
        topo.add_switch("s2");
        topo.add_device("d1");
        topo.connect("l1", ("s1", "p1"), ("s2", "p1"), 100.0);
        topo.connect("l2", ("s1", "p2"), ("d1", "eth0"), 100.0);

        let s1 = &topo.nodes[&NodeId::new("s1")];
        assert_eq!(s1.ports["p1"].port_bit, Some(0));
        assert_eq!(s1.ports["p2"].port_bit, Some(1));
        assert_eq!(topo.nodes[&NodeId::new("d1")].ports["eth0"].port_bit, None);
    }

    #[test]
    fn test_adding_a_node_twice_keeps_it() {
        let mut topo = Topology::new();
        topo.add_device("d1").with_mac("02:00:00:00:00:01");
        topo.add_switch("s1");
        topo.connect("l1", ("s1", "p0"), ("d1", "eth0"), 100.0);

        topo.add_switch("s1").with_name("edge");
        topo.add_device("d1");

        let s1 = topo.node(&NodeId::new("s1")).unwrap();
        assert!(s1.ports.contains_key("p0"));
        assert_eq!(s1.name.as_deref(), Some("edge"));
        let d1 = topo.node(&NodeId::new("d1")).unwrap();
        assert_eq!(d1.mac.as_deref(), Some("02:00:00:00:00:01"));
        assert!(d1.ports.contains_key("eth0"));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let mut a = Topology::new();
        a.add_switch("s1");
        let mut b = a.clone();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        b.add_switch("s2");
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        a.add_switch("s2");
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }
}
