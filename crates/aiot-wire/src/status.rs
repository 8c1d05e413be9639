//! Retained status snapshots
//!
//! ```text
//! state=<online|offline|sleep|ota>;id=<node_id>;fw=<semver>[;<key>=<value>]*
//! ```
//!
//! The three leading keys are fixed in order. `offline` is never published
//! by the node itself; it is the registered will, injected by the broker
//! when the session is lost.

use std::fmt;
use std::str::FromStr;

use aiot_core::{AiotError, AiotResult, NodeIdentity};
use bytes::Bytes;

use crate::KvPayload;

pub const STATE_KEY: &str = "state";
pub const ID_KEY: &str = "id";
pub const FW_KEY: &str = "fw";

/// Lifecycle state announced on the status channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeState {
    Online,
    Offline,
    Sleep,
    Ota,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Online => "online",
            NodeState::Offline => "offline",
            NodeState::Sleep => "sleep",
            NodeState::Ota => "ota",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeState {
    type Err = AiotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(NodeState::Online),
            "offline" => Ok(NodeState::Offline),
            "sleep" => Ok(NodeState::Sleep),
            "ota" => Ok(NodeState::Ota),
            _ => Err(AiotError::InvalidPayload(format!("unknown state {:?}", s))),
        }
    }
}

/// A decoded or to-be-encoded status snapshot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusPayload {
    pub state: NodeState,
    pub id: String,
    pub fw: String,
    /// Trailing pairs, in order
    pub extra: KvPayload,
}

impl StatusPayload {
    pub fn new(state: NodeState, id: &NodeIdentity, fw: &str) -> Self {
        StatusPayload {
            state,
            id: id.as_str().to_string(),
            fw: fw.to_string(),
            extra: KvPayload::new(),
        }
    }

    /// Append an extra pair (builder form)
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.extra.push(key, value);
        self
    }

    pub fn with_extra(mut self, extra: &KvPayload) -> Self {
        self.extra.extend(extra);
        self
    }

    pub fn to_kv(&self) -> KvPayload {
        let mut kv = KvPayload::new()
            .with(STATE_KEY, self.state)
            .with(ID_KEY, &self.id)
            .with(FW_KEY, &self.fw);
        kv.extend(&self.extra);
        kv
    }

    pub fn serialize(&self) -> AiotResult<String> {
        self.to_kv().serialize()
    }

    pub fn to_bytes(&self) -> AiotResult<Bytes> {
        self.to_kv().to_bytes()
    }

    /// Parse a status payload, requiring the fixed leading keys
    pub fn parse(text: &str) -> AiotResult<Self> {
        let kv = KvPayload::parse(text)?;
        let mut pairs = kv.iter();

        let state = expect_key(pairs.next(), STATE_KEY)?.parse()?;
        let id = expect_key(pairs.next(), ID_KEY)?.to_string();
        let fw = expect_key(pairs.next(), FW_KEY)?.to_string();

        let mut extra = KvPayload::new();
        for (k, v) in pairs {
            extra.push(k, v);
        }

        Ok(StatusPayload {
            state,
            id,
            fw,
            extra,
        })
    }

    pub fn from_bytes(raw: &[u8]) -> AiotResult<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| AiotError::InvalidPayload("payload is not UTF-8".into()))?;
        Self::parse(text)
    }

    /// Look up a trailing pair
    pub fn get(&self, key: &str) -> Option<&str> {
        self.extra.get(key)
    }
}

fn expect_key<'a>(pair: Option<(&'a str, &'a str)>, key: &str) -> AiotResult<&'a str> {
    match pair {
        Some((k, v)) if k == key => Ok(v),
        Some((k, _)) => Err(AiotError::InvalidPayload(format!(
            "expected {:?}, found {:?}",
            key, k
        ))),
        None => Err(AiotError::InvalidPayload(format!("missing {:?}", key))),
    }
}
