//! Publish/subscribe session
//!
//! The session is opened with its last will already attached: the broker
//! publishes the will only if the session ends without an orderly close,
//! which is the single way a fleet monitor learns that a node vanished.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use aiot_core::{AiotError, AiotResult, NodeIdentity, TopicSet};

/// Delivery guarantee
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
}

/// One outbound message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

impl Publication {
    /// QoS 1, not retained
    pub fn ephemeral(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Publication {
            topic: topic.into(),
            payload: payload.into(),
            qos: Qos::AtLeastOnce,
            retain: false,
        }
    }

    /// QoS 1, retained
    pub fn retained(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Publication {
            topic: topic.into(),
            payload: payload.into(),
            qos: Qos::AtLeastOnce,
            retain: true,
        }
    }
}

/// Session state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
}

/// A message received on a subscribed topic
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Events reported by a session transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Message(InboundMessage),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    Connected,
    TimedOut,
}

/// Parameters fixed when the session is opened
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Broker address; `None` leaves the choice to the transport
    pub broker_uri: Option<String>,
    pub client_id: String,
    pub will: Publication,
}

/// Observer handle given to the session transport
///
/// Notifications only record state and queue messages.
#[derive(Clone)]
pub struct SessionEventSink {
    state_tx: Arc<watch::Sender<SessionState>>,
    inbox: mpsc::UnboundedSender<InboundMessage>,
}

impl SessionEventSink {
    pub fn notify(&self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                self.state_tx.send_replace(SessionState::Connected);
            }
            SessionEvent::Disconnected => {
                self.state_tx.send_replace(SessionState::Idle);
            }
            SessionEvent::Message(msg) => {
                // Receiver gone means the cycle is over
                let _ = self.inbox.send(msg);
            }
        }
    }
}

/// Pub/sub client
#[allow(async_fn_in_trait)]
pub trait SessionTransport {
    /// Open the session with `options.will` registered, reporting progress
    /// through `events`. Must not wait for the broker.
    fn open(&self, options: &SessionOptions, events: SessionEventSink) -> AiotResult<()>;

    async fn publish(&self, publication: &Publication) -> AiotResult<()>;

    async fn subscribe(&self, topic: &str, qos: Qos) -> AiotResult<()>;
}

/// Owns one session for the duration of a cycle
pub struct SessionManager<T> {
    transport: T,
    state_tx: Arc<watch::Sender<SessionState>>,
    inbox_tx: mpsc::UnboundedSender<InboundMessage>,
    inbox: mpsc::UnboundedReceiver<InboundMessage>,
    topics: Option<TopicSet>,
    birth: Option<Publication>,
    broker_uri: Option<String>,
}

impl<T: SessionTransport> SessionManager<T> {
    pub fn new(transport: T) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        SessionManager {
            transport,
            state_tx: Arc::new(state_tx),
            inbox_tx,
            inbox,
            topics: None,
            birth: None,
            broker_uri: None,
        }
    }

    /// Broker the transport should open the session against
    pub fn with_broker_uri(mut self, uri: impl Into<String>) -> Self {
        self.broker_uri = Some(uri.into());
        self
    }

    /// Message published right after the command subscription succeeds
    pub fn with_birth(mut self, birth: Publication) -> Self {
        self.birth = Some(birth);
        self
    }

    /// Open the session with `will` registered
    pub fn connect(
        &mut self,
        identity: &NodeIdentity,
        topics: &TopicSet,
        will: Publication,
    ) -> AiotResult<()> {
        let options = SessionOptions {
            broker_uri: self.broker_uri.clone(),
            client_id: identity.as_str().to_string(),
            will,
        };
        self.topics = Some(topics.clone());
        self.state_tx.send_replace(SessionState::Connecting);

        let sink = SessionEventSink {
            state_tx: Arc::clone(&self.state_tx),
            inbox: self.inbox_tx.clone(),
        };
        if let Err(e) = self.transport.open(&options, sink) {
            self.state_tx.send_replace(SessionState::Idle);
            return Err(e);
        }

        debug!(client_id = %options.client_id, will = %options.will.topic, "session opening");
        Ok(())
    }

    /// Wait for the broker to accept the session
    ///
    /// On success the command channel is subscribed, then the birth
    /// message (if any) is published. A birth that fails to publish is
    /// logged and the session still counts as up.
    ///
    /// A session dropped before the broker accepted it is
    /// [`AiotError::SessionClosed`]; there is no local retry.
    pub async fn wait_connected(&mut self, limit: Duration) -> AiotResult<SessionOutcome> {
        let mut rx = self.state_tx.subscribe();
        let settled = timeout(limit, rx.wait_for(|s| *s != SessionState::Connecting))
            .await
            .map(|r| r.map(|state| *state));

        match settled {
            Ok(Ok(SessionState::Connected)) => {}
            Ok(Ok(_)) | Ok(Err(_)) => {
                warn!("session dropped before connecting");
                return Err(AiotError::SessionClosed);
            }
            Err(_) => {
                warn!(?limit, "session connect timed out");
                return Ok(SessionOutcome::TimedOut);
            }
        }

        let topics = self.topics.as_ref().ok_or(AiotError::SessionClosed)?;
        self.transport
            .subscribe(&topics.command, Qos::AtLeastOnce)
            .await?;
        info!(topic = %topics.command, "session up, subscribed");

        if let Some(birth) = &self.birth {
            if let Err(e) = self.transport.publish(birth).await {
                warn!(error = %e, "birth not published");
            }
        }

        Ok(SessionOutcome::Connected)
    }

    pub async fn publish(&self, publication: &Publication) -> AiotResult<()> {
        if !self.is_connected() {
            return Err(AiotError::SessionClosed);
        }
        self.transport.publish(publication).await
    }

    pub async fn subscribe(&self, topic: &str, qos: Qos) -> AiotResult<()> {
        if !self.is_connected() {
            return Err(AiotError::SessionClosed);
        }
        self.transport.subscribe(topic, qos).await
    }

    /// Next inbound message on any topic
    ///
    /// `None` once `deadline` passes or the session drops. Queued
    /// messages are not returned after the deadline.
    pub async fn next_message(&mut self, deadline: Instant) -> Option<InboundMessage> {
        if Instant::now() >= deadline {
            return None;
        }
        let mut state_rx = self.state_tx.subscribe();

        tokio::select! {
            biased;
            _ = sleep_until(deadline) => None,
            _ = state_rx.wait_for(|s| *s == SessionState::Idle) => {
                debug!("session dropped");
                None
            }
            msg = self.inbox.recv() => msg,
        }
    }

    /// Next payload addressed to this node's command channel
    ///
    /// Messages on any other topic are dropped.
    pub async fn next_command(&mut self, deadline: Instant) -> Option<Bytes> {
        let command_topic = self.topics.as_ref()?.command.clone();

        loop {
            let msg = self.next_message(deadline).await?;
            if msg.topic == command_topic {
                return Some(msg.payload);
            }
            debug!(topic = %msg.topic, "ignoring message outside command channel");
        }
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }
}
