//! Simulated link layer
//!
//! Plays a scripted sequence of association attempts:
//! - Immediate success
//! - A fixed number of failures, then success
//! - Seeded random loss (reproducible)
//! - Permanent failure
//! - Silence (no event after start)

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use aiot_core::AiotResult;
use aiot_transport::{LinkDriver, LinkEvent, LinkEventSink};

/// Address handed out on success
pub const SIM_ADDRESS: &str = "192.168.4.20";

/// How the simulated access point behaves
#[derive(Clone, Debug, PartialEq)]
pub enum LinkScript {
    /// First attempt succeeds
    Succeed,
    /// The first `n` attempts fail, the next succeeds
    FailTimes(u32),
    /// Each attempt fails with probability `loss_rate`
    Flaky { loss_rate: f64, seed: u64 },
    /// Every attempt fails
    Never,
    /// The radio starts but no attempt ever completes
    Silent,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub starts: u32,
    pub attempts: u32,
    pub failures: u32,
}

struct LinkSimState {
    script: LinkScript,
    rng: StdRng,
    sink: Option<LinkEventSink>,
    stats: LinkStats,
}

/// Link driver following a [`LinkScript`]
///
/// Events are reported synchronously from inside `start` and `connect`.
pub struct SimulatedLink {
    state: Mutex<LinkSimState>,
}

impl SimulatedLink {
    pub fn new(script: LinkScript) -> Arc<Self> {
        let seed = match &script {
            LinkScript::Flaky { seed, .. } => *seed,
            _ => 0,
        };
        Arc::new(SimulatedLink {
            state: Mutex::new(LinkSimState {
                script,
                rng: StdRng::seed_from_u64(seed),
                sink: None,
                stats: LinkStats::default(),
            }),
        })
    }

    pub fn stats(&self) -> LinkStats {
        self.state.lock().stats.clone()
    }

    /// Decide the next attempt's fate; true means success
    fn next_attempt(state: &mut LinkSimState) -> Option<bool> {
        state.stats.attempts += 1;
        let success = match &mut state.script {
            LinkScript::Succeed => true,
            LinkScript::FailTimes(n) => {
                if *n > 0 {
                    *n -= 1;
                    false
                } else {
                    true
                }
            }
            LinkScript::Flaky { loss_rate, .. } => {
                let loss_rate = *loss_rate;
                !state.rng.gen_bool(loss_rate.clamp(0.0, 1.0))
            }
            LinkScript::Never => false,
            LinkScript::Silent => return None,
        };
        if !success {
            state.stats.failures += 1;
        }
        Some(success)
    }
}

impl LinkDriver for SimulatedLink {
    fn start(&self, events: LinkEventSink) -> AiotResult<()> {
        let silent = {
            let mut state = self.state.lock();
            state.stats.starts += 1;
            state.sink = Some(events.clone());
            state.script == LinkScript::Silent
        };
        if !silent {
            events.notify(LinkEvent::Started);
        }
        Ok(())
    }

    fn connect(&self) -> AiotResult<()> {
        let (outcome, sink) = {
            let mut state = self.state.lock();
            let outcome = Self::next_attempt(&mut state);
            (outcome, state.sink.clone())
        };

        let (Some(success), Some(sink)) = (outcome, sink) else {
            return Ok(());
        };
        if success {
            sink.notify(LinkEvent::AddressAcquired {
                addr: SIM_ADDRESS.to_string(),
            });
        } else {
            sink.notify(LinkEvent::Disconnected {
                reason: "no ap found".to_string(),
            });
        }
        Ok(())
    }
}
