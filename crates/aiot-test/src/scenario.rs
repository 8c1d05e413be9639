//! End-to-end duty-cycle scenarios
//!
//! A scenario wires a simulated board, link and broker into one
//! [`CycleOrchestrator`], runs a single cycle and keeps every handle needed
//! to inspect the result.

use std::time::Duration;

use bytes::Bytes;

use aiot_core::{AiotResult, NodeIdentity, TopicSet, WakeReason};
use aiot_runtime::{CycleOrchestrator, CycleReport, RuntimeSettings, SensorSource, StorageFault};
use aiot_wire::StatusPayload;

use crate::{
    BoardProbe, LinkScript, LinkStats, SessionBehaviour, SimulatedBoard, SimulatedBroker,
    SimulatedLink,
};

/// Hardware address used when none is given
pub const DEFAULT_MAC: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];

enum Inbound {
    Command(Bytes),
    Foreign { topic: String, payload: Bytes },
}

/// Builder for a single-cycle scenario
pub struct ScenarioBuilder {
    settings: RuntimeSettings,
    board: SimulatedBoard,
    mac: [u8; 6],
    link: LinkScript,
    broker: Option<SimulatedBroker>,
    session: SessionBehaviour,
    inbound: Vec<Inbound>,
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        ScenarioBuilder {
            settings: RuntimeSettings::default(),
            board: SimulatedBoard::new(DEFAULT_MAC),
            mac: DEFAULT_MAC,
            link: LinkScript::Succeed,
            broker: None,
            session: SessionBehaviour::Accept,
            inbound: Vec::new(),
        }
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the board, so call it before the other board setters
    pub fn with_mac(mut self, mac: [u8; 6]) -> Self {
        self.mac = mac;
        self.board = SimulatedBoard::new(mac);
        self
    }

    pub fn with_wake(mut self, wake: WakeReason) -> Self {
        self.board = self.board.wake(wake);
        self
    }

    pub fn with_link(mut self, script: LinkScript) -> Self {
        self.link = script;
        self
    }

    pub fn with_session(mut self, behaviour: SessionBehaviour) -> Self {
        self.session = behaviour;
        self
    }

    /// Reuse an existing broker, e.g. across consecutive cycles
    pub fn with_broker(mut self, broker: SimulatedBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_storage(
        mut self,
        init: Vec<Result<(), StorageFault>>,
        erase: Vec<Result<(), StorageFault>>,
    ) -> Self {
        self.board = self.board.storage_init(init).storage_erase(erase);
        self
    }

    pub fn with_sensor(mut self, sensor: impl SensorSource + 'static) -> Self {
        self.board = self.board.sensor(sensor);
        self
    }

    pub fn with_updater(mut self, result: Result<(), String>) -> Self {
        self.board = self.board.updater(result);
        self
    }

    /// Command published on this node's command topic before the cycle
    pub fn command(mut self, payload: &str) -> Self {
        self.inbound
            .push(Inbound::Command(Bytes::copy_from_slice(payload.as_bytes())));
        self
    }

    /// Message delivered to the node on a topic it did not subscribe to
    pub fn foreign_message(mut self, topic: &str, payload: &str) -> Self {
        self.inbound.push(Inbound::Foreign {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        });
        self
    }

    /// Run one cycle
    pub async fn run(self) -> ScenarioOutcome {
        let node = NodeIdentity::from_mac(self.mac);
        let topics = TopicSet::for_node(&node);

        let broker = match self.broker {
            Some(broker) => {
                broker.set_behaviour(self.session);
                broker
            }
            None => SimulatedBroker::new(self.session),
        };
        for inbound in self.inbound {
            match inbound {
                Inbound::Command(payload) => broker.send(&topics.command, payload),
                Inbound::Foreign { topic, payload } => broker.inject(&topic, payload),
            }
        }

        let link = SimulatedLink::new(self.link);
        let (board, probe) = self.board.build();

        let orchestrator =
            CycleOrchestrator::new(self.settings, board, link.clone(), broker.session());
        let report = orchestrator.run_cycle().await;

        ScenarioOutcome {
            report,
            topics,
            broker,
            probe,
            link: link.stats(),
        }
    }
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything observable after one cycle
pub struct ScenarioOutcome {
    pub report: AiotResult<CycleReport>,
    pub topics: TopicSet,
    pub broker: SimulatedBroker,
    pub probe: BoardProbe,
    pub link: LinkStats,
}

impl ScenarioOutcome {
    pub fn events(&self) -> Vec<String> {
        self.broker.published_on(&self.topics.event)
    }

    pub fn statuses(&self) -> Vec<String> {
        self.broker.published_on(&self.topics.status)
    }

    /// Every status publication, decoded
    pub fn status_snapshots(&self) -> AiotResult<Vec<StatusPayload>> {
        self.statuses()
            .iter()
            .map(|s| StatusPayload::parse(s))
            .collect()
    }

    pub fn telemetry(&self) -> Vec<String> {
        self.broker.published_on(&self.topics.telemetry)
    }

    pub fn retained_status(&self) -> Option<String> {
        self.broker.retained(&self.topics.status)
    }

    pub fn suspended_for(&self) -> Option<Duration> {
        self.probe.last_suspend()
    }
}
