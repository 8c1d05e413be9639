//! Link layer bring-up
//!
//! The driver reports link events through a [`LinkEventSink`]. The sink only
//! updates state and signals waiters; the single decision it takes is to
//! ask the driver for another attempt while the retry budget allows it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use aiot_core::{AiotError, AiotResult};

/// Default number of automatic reconnection attempts per cycle
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Link state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionState {
    /// Connected or Failed: nothing more will happen without a new event
    #[inline]
    pub fn is_settled(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Failed)
    }
}

/// Events reported by a link driver
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// Radio is up, ready for a connection attempt
    Started,
    /// Association lost or attempt failed
    Disconnected { reason: String },
    /// Network address obtained
    AddressAcquired { addr: String },
}

/// Outcome of waiting for the link
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    Connected,
    Failed,
    TimedOut,
}

/// Bounded counter of automatic reconnection attempts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryBudget {
    used: u32,
    max: u32,
}

impl RetryBudget {
    pub fn new(max: u32) -> Self {
        RetryBudget { used: 0, max }
    }

    /// Take one attempt from the budget; false once exhausted
    pub fn try_consume(&mut self) -> bool {
        if self.used < self.max {
            self.used += 1;
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.used = 0;
    }

    #[inline]
    pub fn used(&self) -> u32 {
        self.used
    }

    #[inline]
    pub fn max(&self) -> u32 {
        self.max
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        RetryBudget::new(DEFAULT_MAX_RETRIES)
    }
}

/// Platform link layer (radio, association, address assignment)
///
/// Both calls must return promptly. Progress is reported later through
/// the sink handed to [`LinkDriver::start`]; a driver may also report
/// synchronously from inside either call.
pub trait LinkDriver: Send + Sync + 'static {
    /// Power up the link layer and keep `events` for later notifications
    fn start(&self, events: LinkEventSink) -> AiotResult<()>;

    /// Begin one association attempt
    fn connect(&self) -> AiotResult<()>;
}

struct LinkInner {
    state: ConnectionState,
    budget: RetryBudget,
}

struct LinkShared {
    inner: Mutex<LinkInner>,
    state_tx: watch::Sender<ConnectionState>,
}

impl LinkShared {
    /// Change state and signal waiters; caller holds the lock
    fn transition(&self, inner: &mut LinkInner, state: ConnectionState) {
        if inner.state != state {
            debug!(from = ?inner.state, to = ?state, "link state");
            inner.state = state;
            self.state_tx.send_replace(state);
        }
    }
}

/// Observer handle given to the link driver
#[derive(Clone)]
pub struct LinkEventSink {
    shared: Arc<LinkShared>,
    driver: Weak<dyn LinkDriver>,
}

impl LinkEventSink {
    /// Feed one link event into the manager
    pub fn notify(&self, event: LinkEvent) {
        let attempt = {
            let mut inner = self.shared.inner.lock();
            match event {
                LinkEvent::Started => {
                    self.shared.transition(&mut inner, ConnectionState::Connecting);
                    true
                }
                LinkEvent::Disconnected { reason } => {
                    if inner.state == ConnectionState::Failed {
                        false
                    } else if inner.budget.try_consume() {
                        warn!(
                            attempt = inner.budget.used(),
                            max = inner.budget.max(),
                            %reason,
                            "link disconnected, retrying"
                        );
                        self.shared.transition(&mut inner, ConnectionState::Connecting);
                        true
                    } else {
                        warn!(retries = inner.budget.used(), %reason, "link retry budget exhausted");
                        self.shared.transition(&mut inner, ConnectionState::Failed);
                        false
                    }
                }
                LinkEvent::AddressAcquired { addr } => {
                    info!(%addr, "link up");
                    inner.budget.reset();
                    self.shared.transition(&mut inner, ConnectionState::Connected);
                    false
                }
            }
        };

        // Lock released: the driver may call back into notify
        if attempt {
            self.attempt();
        }
    }

    fn attempt(&self) {
        let Some(driver) = self.driver.upgrade() else {
            return;
        };
        if let Err(e) = driver.connect() {
            self.notify(LinkEvent::Disconnected {
                reason: e.to_string(),
            });
        }
    }
}

/// Brings the link up and reports the outcome
pub struct ConnectivityManager {
    driver: Arc<dyn LinkDriver>,
    shared: Arc<LinkShared>,
}

impl ConnectivityManager {
    pub fn new(driver: Arc<dyn LinkDriver>, max_retries: u32) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        ConnectivityManager {
            driver,
            shared: Arc::new(LinkShared {
                inner: Mutex::new(LinkInner {
                    state: ConnectionState::Idle,
                    budget: RetryBudget::new(max_retries),
                }),
                state_tx,
            }),
        }
    }

    /// Start bring-up; returns once the driver has been started
    pub fn begin(&self) -> AiotResult<()> {
        let sink = LinkEventSink {
            shared: Arc::clone(&self.shared),
            driver: Arc::downgrade(&self.driver),
        };
        self.driver
            .start(sink)
            .map_err(|e| AiotError::LinkDriver(e.to_string()))
    }

    /// Wait until the link is Connected or Failed
    ///
    /// `None` waits without limit.
    pub async fn wait_outcome(&self, limit: Option<Duration>) -> LinkOutcome {
        let mut rx = self.shared.state_tx.subscribe();

        let settled = match limit {
            Some(limit) => match timeout(limit, settled_state(&mut rx)).await {
                Ok(state) => state,
                Err(_) => return LinkOutcome::TimedOut,
            },
            None => settled_state(&mut rx).await,
        };

        match settled {
            ConnectionState::Connected => LinkOutcome::Connected,
            _ => LinkOutcome::Failed,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    pub fn retry_budget(&self) -> RetryBudget {
        self.shared.inner.lock().budget
    }
}

async fn settled_state(rx: &mut watch::Receiver<ConnectionState>) -> ConnectionState {
    match rx.wait_for(|s| s.is_settled()).await {
        Ok(state) => *state,
        Err(_) => ConnectionState::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` attempts, then acquires an address
    struct ScriptedDriver {
        failures: AtomicU32,
        attempts: AtomicU32,
        sink: Mutex<Option<LinkEventSink>>,
    }

    impl ScriptedDriver {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(ScriptedDriver {
                failures: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
                sink: Mutex::new(None),
            })
        }

        fn sink(&self) -> LinkEventSink {
            self.sink.lock().clone().unwrap()
        }
    }

    impl LinkDriver for ScriptedDriver {
        fn start(&self, events: LinkEventSink) -> AiotResult<()> {
            *self.sink.lock() = Some(events.clone());
            events.notify(LinkEvent::Started);
            Ok(())
        }

        fn connect(&self) -> AiotResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let sink = self.sink();
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                sink.notify(LinkEvent::Disconnected {
                    reason: "auth".into(),
                });
            } else {
                sink.notify(LinkEvent::AddressAcquired {
                    addr: "10.0.0.7".into(),
                });
            }
            Ok(())
        }
    }

    /// Never reports anything after start
    struct SilentDriver;

    impl LinkDriver for SilentDriver {
        fn start(&self, _events: LinkEventSink) -> AiotResult<()> {
            Ok(())
        }

        fn connect(&self) -> AiotResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_retry_budget() {
        let mut budget = RetryBudget::new(2);
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        assert_eq!(budget.used(), 2);

        budget.reset();
        assert_eq!(budget.used(), 0);
        assert!(budget.try_consume());
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let driver = ScriptedDriver::new(0);
        let link = ConnectivityManager::new(driver.clone(), DEFAULT_MAX_RETRIES);

        link.begin().unwrap();
        assert_eq!(link.wait_outcome(None).await, LinkOutcome::Connected);
        assert_eq!(link.state(), ConnectionState::Connected);
        assert_eq!(link.retry_budget().used(), 0);
        assert_eq!(driver.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_resets_budget() {
        let driver = ScriptedDriver::new(4);
        let link = ConnectivityManager::new(driver.clone(), DEFAULT_MAX_RETRIES);

        link.begin().unwrap();
        assert_eq!(link.wait_outcome(None).await, LinkOutcome::Connected);
        assert_eq!(link.retry_budget().used(), 0);
        assert_eq!(driver.attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_exhausted_budget_fails() {
        let driver = ScriptedDriver::new(u32::MAX);
        let link = ConnectivityManager::new(driver.clone(), DEFAULT_MAX_RETRIES);

        link.begin().unwrap();
        assert_eq!(link.wait_outcome(None).await, LinkOutcome::Failed);
        assert_eq!(link.state(), ConnectionState::Failed);
        assert_eq!(link.retry_budget().used(), DEFAULT_MAX_RETRIES);
        // Initial attempt plus one per retry
        assert_eq!(
            driver.attempts.load(Ordering::SeqCst),
            DEFAULT_MAX_RETRIES + 1
        );
    }

    #[tokio::test]
    async fn test_no_attempts_after_failed() {
        let driver = ScriptedDriver::new(u32::MAX);
        let link = ConnectivityManager::new(driver.clone(), 2);

        link.begin().unwrap();
        assert_eq!(link.wait_outcome(None).await, LinkOutcome::Failed);

        let attempts = driver.attempts.load(Ordering::SeqCst);
        driver.sink().notify(LinkEvent::Disconnected {
            reason: "late".into(),
        });
        assert_eq!(driver.attempts.load(Ordering::SeqCst), attempts);
        assert_eq!(link.state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout() {
        let link = ConnectivityManager::new(Arc::new(SilentDriver), DEFAULT_MAX_RETRIES);

        link.begin().unwrap();
        let outcome = link.wait_outcome(Some(Duration::from_secs(5))).await;
        assert_eq!(outcome, LinkOutcome::TimedOut);
        assert_eq!(link.state(), ConnectionState::Idle);
    }
}
