//! Forwarding-table feed
//!
//! Flattens the local routes into one ordered table per switch: for every
//! destination MAC, the primary outbound port and the backup port if there is one.
//! Writing the tables out for switch programming is up to the exporter.

use crate::config::EngineConfig;
use crate::error::{EngineError, EntityKind};
use crate::local_routes::{LocalRoutes, PortChoice};
use crate::topology::{NodeId, Topology};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortEntry {
    pub outbound_port: String,
    pub outbound_port_bit: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardingEntry {
    /// MAC address of the destination device
    pub destination: String,
    pub primary: PortEntry,
    pub backup: Option<PortEntry>,
}

/// Forwarding tables of every switch in the snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct ForwardingFeed {
    tables: BTreeMap<NodeId, Vec<ForwardingEntry>>,
}

impl ForwardingFeed {
    /// Build the feed. Every switch gets a table, possibly empty.
    pub fn build(
        topology: &Topology,
        local: &LocalRoutes,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let mut tables: BTreeMap<NodeId, Vec<ForwardingEntry>> = topology
            .switches()
            .map(|sw| (sw.clone(), Vec::new()))
            .collect();

        for (destination, routes) in local.iter() {
            let switch_routes: Vec<_> = routes
                .iter()
                .filter(|(node, _)| tables.contains_key(*node))
                .collect();
            if switch_routes.is_empty() {
                continue;
            }

            let mac = topology
                .node(destination)
                .ok_or_else(|| EngineError::unknown(EntityKind::Node, destination))?
                .mac
                .clone()
                .ok_or_else(|| EngineError::MissingMac(destination.clone()))?;

            for (sw, route) in switch_routes {
                let entry = ForwardingEntry {
                    destination: mac.clone(),
                    primary: port_entry(topology, sw, &route.primary, config)?,
                    backup: route
                        .backup
                        .as_ref()
                        .map(|backup| port_entry(topology, sw, backup, config))
                        .transpose()?,
                };
                if let Some(table) = tables.get_mut(sw) {
                    table.push(entry);
                }
            }
        }

        debug!(switches = tables.len(), "built forwarding feed");
        Ok(Self { tables })
    }

    pub fn table(&self, switch: &NodeId) -> Option<&[ForwardingEntry]> {
        self.tables.get(switch).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &[ForwardingEntry])> {
        self.tables.iter().map(|(sw, table)| (sw, table.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

fn port_entry(
    topology: &Topology,
    switch: &NodeId,
    choice: &PortChoice,
    config: &EngineConfig,
) -> Result<PortEntry, EngineError> {
    let port = topology
        .node(switch)
        .and_then(|node| node.ports.get(&choice.outbound_port))
        .ok_or_else(|| {
            EngineError::unknown(EntityKind::Port, format!("{}:{}", switch, choice.outbound_port))
        })?;
    Ok(PortEntry {
        outbound_port: choice.outbound_port.clone(),
        outbound_port_bit: port.port_bit.unwrap_or(config.device_port_bit),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjacency::{Adjacency, TrafficDemand};
    use crate::bridges::Classification;
    use crate::local_routes::LocalPlanner;

    fn triangle() -> Topology {
        let mut topo = Topology::new();
        for s in ["s1", "s2", "s3", "spare"] {
            topo.add_switch(s);
        }
        topo.add_device("a").with_mac("aa:aa:aa:aa:aa:aa");
        topo.add_device("b").with_mac("bb:bb:bb:bb:bb:bb");
        topo.connect("l12", ("s1", "p1"), ("s2", "p1"), 100.0);
        topo.connect("l23", ("s2", "p2"), ("s3", "p1"), 100.0);
        topo.connect("l31", ("s3", "p2"), ("s1", "p2"), 100.0);
        topo.connect("la", ("s1", "p3"), ("a", "eth0"), 100.0);
        topo.connect("lb", ("s2", "p3"), ("b", "eth0"), 100.0);
        topo.add_unicast("t1", "a", "b", 1.0);
        topo
    }

    fn feed(topo: &Topology) -> Result<ForwardingFeed, EngineError> {
        let config = EngineConfig::default();
        let adjacency = Adjacency::from_topology(topo, &config).unwrap();
        let demand = TrafficDemand::from_topology(topo).unwrap();
        let classification = Classification::classify(&adjacency);
        let local = LocalPlanner::new(&adjacency, &demand, &classification, &config).plan()?;
        ForwardingFeed::build(topo, &local, &config)
    }

    #[test]
    fn test_every_switch_has_a_table() {
        let feed = feed(&triangle()).unwrap();
        assert_eq!(feed.len(), 4);
        assert!(feed.table(&NodeId::new("spare")).unwrap().is_empty());
    }

    #[test]
    fn test_entries_carry_port_bits() {
        let feed = feed(&triangle()).unwrap();
        let s1 = feed.table(&NodeId::new("s1")).unwrap();
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].destination, "bb:bb:bb:bb:bb:bb");
        assert_eq!(
            s1[0].primary,
            PortEntry {
                outbound_port: "p1".into(),
                outbound_port_bit: 0,
            }
        );
        assert_eq!(
            s1[0].backup,
            Some(PortEntry {
                outbound_port: "p2".into(),
                outbound_port_bit: 1,
            })
        );

        let s2 = feed.table(&NodeId::new("s2")).unwrap();
        assert_eq!(s2[0].primary.outbound_port, "p3");
        assert_eq!(s2[0].backup, None);

        let json = serde_json::to_value(&feed).unwrap();
        assert!(json["s2"][0]["backup"].is_null());
    }

    #[test]
    fn test_missing_mac() {
        let mut topo = triangle();
        topo.nodes.get_mut(&NodeId::new("b")).unwrap().mac = None;
        let err = feed(&topo).unwrap_err();
        assert!(matches!(err, EngineError::MissingMac(ref node) if node.as_str() == "b"));
    }
}
