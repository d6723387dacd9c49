//! Error taxonomy for the routing engine.
//!
//! Caller misuse, broken data invariants and I/O problems are distinct variants so the
//! embedding layer can map them to its own responses. Unreachable sources and
//! destinations are not errors at all; they surface as empty query results.

use crate::topology::{GroupId, LinkId, NodeId, TrafficId};
use thiserror::Error;

/// Kind of entity named in an [`EngineError::UnknownEntity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Node,
    Port,
    Link,
    Traffic,
    MulticastGroup,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Node => "node",
            EntityKind::Port => "port",
            EntityKind::Link => "link",
            EntityKind::Traffic => "traffic",
            EntityKind::MulticastGroup => "multicast group",
        };
        f.write_str(name)
    }
}

/// Routing engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed link {link} and failed node {node} cannot be supplied together")]
    InputConflict { link: LinkId, node: NodeId },

    #[error("Unknown {kind}: {id}")]
    UnknownEntity { kind: EntityKind, id: String },

    #[error("Multicast group {group} must have exactly one source, found {found}")]
    MissingSingleSource { group: GroupId, found: usize },

    #[error("Route search toward {destination} could not reach {} node(s)", missing.len())]
    ExhaustedSearch {
        destination: NodeId,
        missing: Vec<NodeId>,
    },

    #[error("Invalid traffic {traffic}: {reason}")]
    InvalidTraffic { traffic: TrafficId, reason: String },

    #[error("Node {0} has no MAC address")]
    MissingMac(NodeId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn unknown(kind: EntityKind, id: impl std::fmt::Display) -> Self {
        EngineError::UnknownEntity {
            kind,
            id: id.to_string(),
        }
    }

    /// The request itself was malformed; retrying it unchanged will fail again.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            EngineError::InputConflict { .. } | EngineError::UnknownEntity { .. }
        )
    }

    /// The snapshot violates an assumption the planners rely on.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            EngineError::MissingSingleSource { .. }
                | EngineError::ExhaustedSearch { .. }
                | EngineError::InvalidTraffic { .. }
                | EngineError::MissingMac(_)
        )
    }
}
