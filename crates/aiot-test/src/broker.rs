//! In-memory publish/subscribe broker
//!
//! Keeps a retained store, a journal of everything the client did, and
//! the client's last will. The will is published when the test expires
//! or drops the session, the way a real broker does once the keepalive
//! of a suspended node lapses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use aiot_core::{AiotError, AiotResult};
use aiot_transport::{
    InboundMessage, Publication, Qos, SessionEvent, SessionEventSink, SessionOptions,
    SessionTransport,
};

/// How the broker answers a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionBehaviour {
    Accept,
    /// Acknowledge the connection after a delay
    AcceptAfter(Duration),
    /// Never acknowledge
    Refuse,
    /// Drop the session right after it is opened
    Drop,
}

/// One client operation, in the order the broker saw it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerOp {
    Open {
        client_id: String,
        broker_uri: Option<String>,
    },
    Subscribe { topic: String, qos: Qos },
    Publish(Publication),
    /// Will delivered by the broker on session loss
    WillDelivered(Publication),
}

struct Pending {
    msg: InboundMessage,
    /// Deliver even if the topic matches no subscription
    forced: bool,
}

struct BrokerState {
    behaviour: SessionBehaviour,
    retained: HashMap<String, Bytes>,
    journal: Vec<BrokerOp>,
    subscriptions: Vec<String>,
    will: Option<Publication>,
    sink: Option<SessionEventSink>,
    pending: Vec<Pending>,
    fail_publishes: bool,
    publish_latency: Duration,
    /// Sent on the topic after every client publish
    chatter: Option<(String, Bytes)>,
}

/// Shared handle to the broker; clones see the same state
#[derive(Clone)]
pub struct SimulatedBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl SimulatedBroker {
    pub fn new(behaviour: SessionBehaviour) -> Self {
        SimulatedBroker {
            state: Arc::new(Mutex::new(BrokerState {
                behaviour,
                retained: HashMap::new(),
                journal: Vec::new(),
                subscriptions: Vec::new(),
                will: None,
                sink: None,
                pending: Vec::new(),
                fail_publishes: false,
                publish_latency: Duration::ZERO,
                chatter: None,
            })),
        }
    }

    /// Client side of a new session
    pub fn session(&self) -> BrokerSession {
        BrokerSession {
            broker: self.clone(),
        }
    }

    pub fn set_behaviour(&self, behaviour: SessionBehaviour) {
        self.state.lock().behaviour = behaviour;
    }

    /// Reject every publish from now on
    pub fn fail_publishes(&self, fail: bool) {
        self.state.lock().fail_publishes = fail;
    }

    /// Time each publish takes to be acknowledged
    pub fn set_publish_latency(&self, latency: Duration) {
        self.state.lock().publish_latency = latency;
    }

    /// Answer every client publish with `payload` on `topic`
    pub fn chatter(&self, topic: &str, payload: impl Into<Bytes>) {
        self.state.lock().chatter = Some((topic.to_string(), payload.into()));
    }

    /// Queue a message for the client, delivered once it subscribes to
    /// a matching topic
    pub fn send(&self, topic: &str, payload: impl Into<Bytes>) {
        self.enqueue(topic, payload.into(), false);
    }

    /// Queue a message delivered to the client on its first subscription
    /// whatever the topic
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) {
        self.enqueue(topic, payload.into(), true);
    }

    fn enqueue(&self, topic: &str, payload: Bytes, forced: bool) {
        let msg = InboundMessage {
            topic: topic.to_string(),
            payload,
        };
        let sink = {
            let mut state = self.state.lock();
            let deliverable = forced || state.subscriptions.iter().any(|s| s == topic);
            let sink = if deliverable { state.sink.clone() } else { None };
            if sink.is_none() {
                state.pending.push(Pending {
                    msg: msg.clone(),
                    forced,
                });
            }
            sink
        };
        if let Some(sink) = sink {
            sink.notify(SessionEvent::Message(msg));
        }
    }

    /// Keepalive lapsed: publish the will and drop the client
    pub fn expire_session(&self) {
        let (will, sink) = {
            let mut state = self.state.lock();
            let will = state.will.take();
            if let Some(will) = &will {
                if will.retain {
                    state.retained.insert(will.topic.clone(), will.payload.clone());
                }
                state.journal.push(BrokerOp::WillDelivered(will.clone()));
            }
            state.subscriptions.clear();
            (will, state.sink.take())
        };
        if let Some(will) = will {
            debug!(topic = %will.topic, "will delivered");
        }
        if let Some(sink) = sink {
            sink.notify(SessionEvent::Disconnected);
        }
    }

    /// Retained payload on `topic`, as text
    pub fn retained(&self, topic: &str) -> Option<String> {
        self.state
            .lock()
            .retained
            .get(topic)
            .map(|p| String::from_utf8_lossy(p).into_owned())
    }

    /// Every payload published by the client on `topic`, in order
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.state
            .lock()
            .journal
            .iter()
            .filter_map(|op| match op {
                BrokerOp::Publish(p) if p.topic == topic => {
                    Some(String::from_utf8_lossy(&p.payload).into_owned())
                }
                _ => None,
            })
            .collect()
    }

    pub fn publications(&self) -> Vec<Publication> {
        self.state
            .lock()
            .journal
            .iter()
            .filter_map(|op| match op {
                BrokerOp::Publish(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn journal(&self) -> Vec<BrokerOp> {
        self.state.lock().journal.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().subscriptions.clone()
    }

    /// Will registered by the current session
    pub fn will(&self) -> Option<Publication> {
        self.state.lock().will.clone()
    }

    pub fn opens(&self) -> usize {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|op| matches!(op, BrokerOp::Open { .. }))
            .count()
    }
}

/// Client end of a [`SimulatedBroker`] session
pub struct BrokerSession {
    broker: SimulatedBroker,
}

impl SessionTransport for BrokerSession {
    fn open(&self, options: &SessionOptions, events: SessionEventSink) -> AiotResult<()> {
        let behaviour = {
            let mut state = self.broker.state.lock();
            state.journal.push(BrokerOp::Open {
                client_id: options.client_id.clone(),
                broker_uri: options.broker_uri.clone(),
            });
            state.will = Some(options.will.clone());
            state.sink = Some(events.clone());
            state.behaviour
        };

        match behaviour {
            SessionBehaviour::Accept => events.notify(SessionEvent::Connected),
            SessionBehaviour::AcceptAfter(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    events.notify(SessionEvent::Connected);
                });
            }
            SessionBehaviour::Refuse => {}
            SessionBehaviour::Drop => {
                self.broker.state.lock().sink = None;
                events.notify(SessionEvent::Disconnected);
            }
        }
        Ok(())
    }

    async fn publish(&self, publication: &Publication) -> AiotResult<()> {
        let latency = self.broker.state.lock().publish_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let chatter = {
            let mut state = self.broker.state.lock();
            if state.fail_publishes {
                return Err(AiotError::Transport("broker rejected publish".into()));
            }
            if publication.retain {
                if publication.payload.is_empty() {
                    state.retained.remove(&publication.topic);
                } else {
                    state
                        .retained
                        .insert(publication.topic.clone(), publication.payload.clone());
                }
            }
            state.journal.push(BrokerOp::Publish(publication.clone()));
            state.chatter.clone()
        };

        if let Some((topic, payload)) = chatter {
            self.broker.send(&topic, payload);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: Qos) -> AiotResult<()> {
        let (deliver, sink) = {
            let mut state = self.broker.state.lock();
            state.journal.push(BrokerOp::Subscribe {
                topic: topic.to_string(),
                qos,
            });
            state.subscriptions.push(topic.to_string());

            let (deliver, keep): (Vec<Pending>, Vec<Pending>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|p| p.forced || p.msg.topic == topic);
            state.pending = keep;
            (deliver, state.sink.clone())
        };

        if let Some(sink) = sink {
            for pending in deliver {
                sink.notify(SessionEvent::Message(pending.msg));
            }
        }
        Ok(())
    }
}
