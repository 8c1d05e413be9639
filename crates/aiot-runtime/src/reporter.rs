//! Status, event and telemetry publication
//!
//! Every publish is QoS 1. Only status snapshots are retained.

use aiot_core::{AiotResult, NodeIdentity, TopicSet, WakeReason};
use aiot_transport::{Publication, SessionManager, SessionTransport};
use aiot_wire::{KvPayload, NodeState, StatusPayload, FW_KEY, ID_KEY};
use tracing::debug;

pub const REASON_KEY: &str = "reason";
pub const STAGE_KEY: &str = "stage";
pub const NEXT_KEY: &str = "next";

/// Formats payloads for one node and publishes them on its channels
#[derive(Clone, Debug)]
pub struct StatusReporter {
    identity: NodeIdentity,
    topics: TopicSet,
    fw: String,
}

impl StatusReporter {
    pub fn new(identity: NodeIdentity, topics: TopicSet, fw: impl Into<String>) -> Self {
        StatusReporter {
            identity,
            topics,
            fw: fw.into(),
        }
    }

    /// Retained status publication
    pub fn status(&self, state: NodeState, extra: &KvPayload) -> AiotResult<Publication> {
        let payload = StatusPayload::new(state, &self.identity, &self.fw)
            .with_extra(extra)
            .to_bytes()?;
        Ok(Publication::retained(self.topics.status.clone(), payload))
    }

    /// The last will: `state=offline` on the status channel
    pub fn will(&self) -> AiotResult<Publication> {
        self.status(NodeState::Offline, &KvPayload::new())
    }

    /// Status sent by the session as soon as it is up
    pub fn birth(&self, wake: WakeReason) -> AiotResult<Publication> {
        let extra = KvPayload::new()
            .with(STAGE_KEY, "connected")
            .with(REASON_KEY, wake);
        self.status(NodeState::Online, &extra)
    }

    /// Base telemetry snapshot, before sensor readings are appended
    pub fn telemetry_base(&self, wake: WakeReason) -> KvPayload {
        KvPayload::new()
            .with(ID_KEY, &self.identity)
            .with(FW_KEY, &self.fw)
            .with(REASON_KEY, wake)
    }

    pub async fn announce_retained<T: SessionTransport>(
        &self,
        session: &SessionManager<T>,
        state: NodeState,
        extra: &KvPayload,
    ) -> AiotResult<()> {
        let publication = self.status(state, extra)?;
        debug!(%state, "announce");
        session.publish(&publication).await
    }

    pub async fn emit_event<T: SessionTransport>(
        &self,
        session: &SessionManager<T>,
        event: &KvPayload,
    ) -> AiotResult<()> {
        let publication = Publication::ephemeral(self.topics.event.clone(), event.to_bytes()?);
        session.publish(&publication).await
    }

    pub async fn emit_telemetry<T: SessionTransport>(
        &self,
        session: &SessionManager<T>,
        telemetry: &KvPayload,
    ) -> AiotResult<()> {
        let publication =
            Publication::ephemeral(self.topics.telemetry.clone(), telemetry.to_bytes()?);
        session.publish(&publication).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiot_transport::Qos;

    fn reporter() -> StatusReporter {
        let id = NodeIdentity::from_mac([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let topics = TopicSet::for_node(&id);
        StatusReporter::new(id, topics, "1.0.0")
    }

    #[test]
    fn test_will_publication() {
        let will = reporter().will().unwrap();
        assert_eq!(will.topic, "aiot/AABBCCDDEEFF/status");
        assert_eq!(&will.payload[..], b"state=offline;id=AABBCCDDEEFF;fw=1.0.0");
        assert_eq!(will.qos, Qos::AtLeastOnce);
        assert!(will.retain);
    }

    #[test]
    fn test_birth_publication() {
        let birth = reporter().birth(WakeReason::Timer).unwrap();
        assert_eq!(
            &birth.payload[..],
            b"state=online;id=AABBCCDDEEFF;fw=1.0.0;stage=connected;reason=timer"
        );
        assert!(birth.retain);
    }

    #[test]
    fn test_telemetry_base() {
        let kv = reporter().telemetry_base(WakeReason::PowerOn);
        assert_eq!(
            kv.serialize().unwrap(),
            "id=AABBCCDDEEFF;fw=1.0.0;reason=power_on"
        );
    }
}
