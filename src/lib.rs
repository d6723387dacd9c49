//! netcfg: routing and failover planning for switched Ethernet topologies
//!
//! Core library for failure classification, route planning and forwarding-table
//! generation over an immutable topology snapshot.
//!
//! - [`bridges`] classifies every switch and link by the impact of its failure
//! - [`global_routes`] computes per-destination shortest-path trees and
//!   multicast trees, with or without one failed entity
//! - [`local_routes`] computes per-switch primary and backup output ports
//! - [`query`] answers route and bandwidth queries
//! - [`forwarding`] flattens local routes into per-switch tables
//!
//! [`Engine`] ties these together for a single snapshot.

pub mod adjacency;
pub mod bridges;
pub mod config;
pub mod engine;
pub mod error;
pub mod forwarding;
pub mod global_routes;
pub mod local_routes;
pub mod query;
pub mod telemetry;
pub mod topology;

pub use adjacency::{Adjacency, Failure, TrafficDemand};
pub use bridges::{Classification, ClassificationCache, ComponentId, FailureImpact};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, EntityKind};
pub use forwarding::{ForwardingEntry, ForwardingFeed, PortEntry};
pub use global_routes::{BandwidthOverview, LinkLoad, MulticastTree, RouteSet, RouteStep, RouteTree};
pub use local_routes::{BackupOrigin, LocalRoute, LocalRoutes, PortChoice};
pub use query::{RouteQuery, RouteResult, RouteStatus};
pub use topology::{
    AddressMethod, GroupId, LinkId, NodeId, NodeType, Protocol, SnapshotId, Topology, TrafficId,
};
