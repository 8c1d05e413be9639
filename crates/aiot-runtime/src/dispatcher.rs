//! Command dispatch
//!
//! Each inbound payload is parsed, applied to the node configuration and
//! answered with exactly one event. Rejections stay local: they are
//! reported on the event channel and never abort the cycle.

use aiot_core::{AiotError, AiotResult, Command, NodeConfig};
use aiot_transport::{SessionManager, SessionTransport};
use aiot_wire::KvPayload;
use tracing::{debug, info, warn};

use crate::StatusReporter;

/// Why a command was rejected
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    BadSleepRange,
    BadOtaUrl,
    UnknownCommand,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::BadSleepRange => "bad_sleep_range",
            Rejection::BadOtaUrl => "bad_ota_url",
            Rejection::UnknownCommand => "unknown_cmd",
        }
    }
}

/// Acknowledgement for one command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ack {
    Pong,
    SleepSet(u32),
    UpdateRequested,
    Rejected(Rejection),
}

impl Ack {
    /// Event payload: `event=<name>[;k=v]`
    pub fn to_payload(&self) -> KvPayload {
        match self {
            Ack::Pong => KvPayload::event("pong"),
            Ack::SleepSet(secs) => KvPayload::event("sleep_set").with("sec", secs),
            Ack::UpdateRequested => KvPayload::event("ota_requested"),
            Ack::Rejected(r) => KvPayload::event("err").with("reason", r.as_str()),
        }
    }
}

/// Applies commands to a [`NodeConfig`] and acknowledges them
#[derive(Debug, Default)]
pub struct CommandDispatcher {
    handled: u32,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and apply one payload without publishing anything
    pub fn apply(&self, raw: &[u8], config: &mut NodeConfig) -> Ack {
        let command = Command::parse(raw);
        debug!(command = command.name(), "dispatch");

        match command {
            Command::Ping => Ack::Pong,
            Command::SetSleep(secs) => match config.set_sleep_interval(secs) {
                Ok(secs) => {
                    info!(secs, "sleep interval set");
                    Ack::SleepSet(secs)
                }
                Err(e) => {
                    warn!(error = %e, "sleep command rejected");
                    Ack::Rejected(Rejection::BadSleepRange)
                }
            },
            Command::RequestUpdate(url) => match config.request_update(&url) {
                Ok(()) => {
                    info!(%url, "update requested");
                    Ack::UpdateRequested
                }
                Err(e) => {
                    warn!(error = %e, "update command rejected");
                    Ack::Rejected(Rejection::BadOtaUrl)
                }
            },
            Command::Unknown(raw) => {
                let e = AiotError::MalformedCommand(raw);
                warn!(error = %e, "unknown command");
                Ack::Rejected(Rejection::UnknownCommand)
            }
        }
    }

    /// Apply one payload and publish its acknowledgement
    pub async fn handle<T: SessionTransport>(
        &mut self,
        raw: &[u8],
        config: &mut NodeConfig,
        reporter: &StatusReporter,
        session: &SessionManager<T>,
    ) -> AiotResult<Ack> {
        let ack = self.apply(raw, config);
        self.handled += 1;
        reporter.emit_event(session, &ack.to_payload()).await?;
        Ok(ack)
    }

    /// Commands handled so far this cycle
    #[inline]
    pub fn handled(&self) -> u32 {
        self.handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn apply(raw: &str, config: &mut NodeConfig) -> Ack {
        CommandDispatcher::new().apply(raw.as_bytes(), config)
    }

    #[test]
    fn test_ping() {
        let mut config = NodeConfig::default();
        let before = config.clone();

        let ack = apply("ping", &mut config);
        assert_eq!(ack, Ack::Pong);
        assert_eq!(ack.to_payload().serialize().unwrap(), "event=pong");
        assert_eq!(config, before);
    }

    #[test]
    fn test_sleep_set() {
        let mut config = NodeConfig::default();

        let ack = apply("sleep=60", &mut config);
        assert_eq!(ack, Ack::SleepSet(60));
        assert_eq!(ack.to_payload().serialize().unwrap(), "event=sleep_set;sec=60");
        assert_eq!(config.sleep_interval_secs(), 60);
    }

    #[test]
    fn test_sleep_rejected() {
        let mut config = NodeConfig::default();

        for raw in ["sleep=0", "sleep=86401", "sleep=-1", "sleep=abc", "sleep="] {
            let ack = apply(raw, &mut config);
            assert_eq!(ack, Ack::Rejected(Rejection::BadSleepRange), "{}", raw);
            assert_eq!(
                ack.to_payload().serialize().unwrap(),
                "event=err;reason=bad_sleep_range"
            );
        }
        assert_eq!(config.sleep_interval_secs(), 30);
    }

    #[test]
    fn test_ota_request() {
        let mut config = NodeConfig::default();

        let ack = apply("ota=http://10.0.0.2/fw.bin", &mut config);
        assert_eq!(ack, Ack::UpdateRequested);
        assert_eq!(ack.to_payload().serialize().unwrap(), "event=ota_requested");
        assert!(config.is_update_pending());
        assert_eq!(config.pending_update_url(), Some("http://10.0.0.2/fw.bin"));
    }

    #[test]
    fn test_ota_rejected() {
        let mut config = NodeConfig::default();

        let ack = apply("ota=http://", &mut config);
        assert_eq!(ack, Ack::Rejected(Rejection::BadOtaUrl));
        assert_eq!(
            ack.to_payload().serialize().unwrap(),
            "event=err;reason=bad_ota_url"
        );
        assert!(!config.is_update_pending());
    }

    #[test]
    fn test_unknown() {
        let mut config = NodeConfig::default();

        for raw in ["reboot", "", "PING", "ping\n"] {
            let ack = apply(raw, &mut config);
            assert_eq!(ack.to_payload().serialize().unwrap(), "event=err;reason=unknown_cmd");
        }
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn test_duplicates_are_idempotent() {
        let mut config = NodeConfig::default();

        assert_eq!(apply("sleep=120", &mut config), Ack::SleepSet(120));
        let once = config.clone();
        assert_eq!(apply("sleep=120", &mut config), Ack::SleepSet(120));
        assert_eq!(config, once);
    }

    proptest! {
        #[test]
        fn prop_sleep_in_range(n in 1u32..=86_400) {
            let mut config = NodeConfig::default();
            let ack = apply(&format!("sleep={}", n), &mut config);
            prop_assert_eq!(ack, Ack::SleepSet(n));
            prop_assert_eq!(config.sleep_interval_secs(), n);
        }

        #[test]
        fn prop_sleep_out_of_range(n in prop_oneof![-100_000i64..1, 86_401i64..10_000_000]) {
            let mut config = NodeConfig::default();
            let ack = apply(&format!("sleep={}", n), &mut config);
            prop_assert_eq!(ack, Ack::Rejected(Rejection::BadSleepRange));
            prop_assert_eq!(config.sleep_interval_secs(), 30);
        }

        // "ota=" plus 252 bytes fills the 256-byte command limit
        #[test]
        fn prop_ota_url_length(len in 0usize..=252) {
            let mut config = NodeConfig::default();
            let url = "u".repeat(len);
            let ack = apply(&format!("ota={}", url), &mut config);

            if len >= 8 {
                prop_assert_eq!(ack, Ack::UpdateRequested);
                prop_assert_eq!(config.pending_update_url(), Some(url.as_str()));
            } else {
                prop_assert_eq!(ack, Ack::Rejected(Rejection::BadOtaUrl));
                prop_assert!(!config.is_update_pending());
            }
        }
    }
}
