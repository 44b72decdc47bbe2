//! Edge types for connecting nodes in a pipeline graph.

use serde::{Deserialize, Serialize};

use super::NodeId;

/// Well-known target port name for a join node's primary input.
pub const JOIN_LEFT_PORT: &str = "left";

/// Well-known target port name for a join node's secondary input.
pub const JOIN_RIGHT_PORT: &str = "right";

/// An edge connecting two nodes in the pipeline graph.
///
/// The carried element type is the source node's output type; the validator
/// checks it against the target node's input type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeDefinition {
    /// Source node ID.
    pub from: NodeId,
    /// Target node ID.
    pub to: NodeId,
    /// Optional port name on the source node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_port: Option<String>,
    /// Optional port name on the target node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_port: Option<String>,
}

impl EdgeDefinition {
    /// Creates a new edge between two nodes.
    pub fn new(from: NodeId, to: NodeId) -> Self {
        Self {
            from,
            to,
            from_port: None,
            to_port: None,
        }
    }

    /// Sets the source port.
    pub fn from_port(mut self, port: impl Into<String>) -> Self {
        self.from_port = Some(port.into());
        self
    }

    /// Sets the target port.
    pub fn to_port(mut self, port: impl Into<String>) -> Self {
        self.to_port = Some(port.into());
        self
    }

    /// Returns whether this edge targets a join node's secondary input.
    pub fn targets_join_right(&self) -> bool {
        self.to_port.as_deref() == Some(JOIN_RIGHT_PORT)
    }

    /// Returns the `(from, to, from_port, to_port)` identity tuple used for
    /// duplicate detection.
    pub fn identity(&self) -> (NodeId, NodeId, Option<&str>, Option<&str>) {
        (
            self.from,
            self.to,
            self.from_port.as_deref(),
            self.to_port.as_deref(),
        )
    }
}
