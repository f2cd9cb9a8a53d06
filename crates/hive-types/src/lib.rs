//! # hive-types
//!
//! Shared domain types used across the HiveMind workspace.

pub mod bus;
pub mod identity;
pub mod session;

use serde::{Deserialize, Serialize};

/// What kind of node sits on the other end of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Potential node, if it manages to connect.
    Candidate,
    /// Anything connected to the hive is a node.
    Node,
    /// Listens for connections and provides an agent.
    Mind,
    /// A mind that pretends to run an agent but uses a different stack.
    Fakecroft,
    /// Node that can be partially controlled by a mind.
    Slave,
    /// User-facing endpoint that does not itself accept connections.
    Terminal,
    /// Connects an external service to the hive.
    Bridge,
    /// Reserved: a collection of nodes.
    Hive,
    /// Reserved: the top-level node, accepting connections only.
    Master,
}

/// Broker protocol versions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProtocolVersion {
    /// JSON only, no handshake, no binary frames.
    Zero = 0,
    /// Handshake key agreement.
    One = 1,
    /// Binary frame support.
    Two = 2,
}

impl ProtocolVersion {
    /// Numeric value carried in the handshake request.
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_wire_names() {
        let json = serde_json::to_string(&NodeType::Terminal).expect("serialize");
        assert_eq!(json, "\"terminal\"");
        let back: NodeType = serde_json::from_str("\"slave\"").expect("deserialize");
        assert_eq!(back, NodeType::Slave);
    }

    #[test]
    fn test_protocol_version_ordering() {
        assert!(ProtocolVersion::Zero < ProtocolVersion::One);
        assert_eq!(ProtocolVersion::Two.as_u8(), 2);
    }
}
