//! Identity types for AIoT nodes
//!
//! A node is named after its factory hardware address. The textual form is
//! the 12 upper-case hex digits of the 6-byte address, and every topic the
//! node uses is namespaced with it.

use std::fmt;

use crate::{AiotError, AiotResult};

/// Root of every topic used by the fleet
pub const TOPIC_ROOT: &str = "aiot";

/// Length of a textual node identity (6 bytes as hex)
pub const NODE_ID_LEN: usize = 12;

/// Node identity - derived once per cycle from the hardware address
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentity(String);

impl NodeIdentity {
    /// Derive the identity from a 6-byte hardware (MAC) address
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let mut id = String::with_capacity(NODE_ID_LEN);
        for byte in mac {
            id.push_str(&format!("{:02X}", byte));
        }
        NodeIdentity(id)
    }

    /// Parse an identity from its textual form
    ///
    /// The identity is embedded in topic names, so it must not contain
    /// topic separators or wildcards.
    pub fn parse(s: &str) -> AiotResult<Self> {
        if s.is_empty() {
            return Err(AiotError::Config("empty node id".into()));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(AiotError::Config(format!("invalid node id: {:?}", s)));
        }
        Ok(NodeIdentity(s.to_string()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four channels owned by a node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicSet {
    /// Retained snapshots and the broker-injected offline announcement
    pub status: String,
    /// Ephemeral sensor and diagnostic payloads
    pub telemetry: String,
    /// Inbound commands (subscribed by the node)
    pub command: String,
    /// Ephemeral acknowledgements and errors
    pub event: String,
}

impl TopicSet {
    /// Compute the topic set for a node
    pub fn for_node(id: &NodeIdentity) -> Self {
        let prefix = format!("{}/{}", TOPIC_ROOT, id);
        TopicSet {
            status: format!("{}/status", prefix),
            telemetry: format!("{}/telemetry", prefix),
            command: format!("{}/cmd", prefix),
            event: format!("{}/event", prefix),
        }
    }

    /// Whether `topic` is exactly this node's command channel
    #[inline]
    pub fn is_command(&self, topic: &str) -> bool {
        topic == self.command
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [
            self.status.as_str(),
            self.telemetry.as_str(),
            self.command.as_str(),
            self.event.as_str(),
        ]
        .into_iter()
    }
}
