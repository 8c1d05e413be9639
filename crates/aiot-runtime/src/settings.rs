//! Runtime settings
//!
//! Build-time constants of the firmware, overridable from JSON or from
//! `AIOT_*` environment variables. Durations are human-readable
//! (`"15s"`, `"800ms"`); the link wait also accepts `"none"`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use aiot_core::{AiotError, AiotResult, MAX_SLEEP_SECS, MIN_SLEEP_SECS};
use aiot_transport::DEFAULT_MAX_RETRIES;

use crate::LogFormat;

pub const ENV_PREFIX: &str = "AIOT_";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Version string announced as `fw=`
    pub firmware_version: String,
    /// Broker address handed to the session transport
    pub broker_uri: String,
    /// Sleep interval used when no command changed it, and after failures
    pub default_sleep_secs: u32,
    /// Automatic link reconnection attempts per cycle
    pub link_max_retries: u32,
    /// Limit on the link bring-up wait; `None` waits forever
    #[serde(with = "opt_duration_str")]
    pub link_timeout: Option<Duration>,
    #[serde(with = "duration_str")]
    pub session_timeout: Duration,
    /// How long inbound commands are accepted after the session is up
    #[serde(with = "duration_str")]
    pub command_window: Duration,
    /// Pause after the final announcement so queued publishes drain
    #[serde(with = "duration_str")]
    pub flush_grace: Duration,
    pub log_format: LogFormat,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        RuntimeSettings {
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            broker_uri: "mqtt://127.0.0.1:1883".to_string(),
            default_sleep_secs: aiot_core::DEFAULT_SLEEP_SECS,
            link_max_retries: DEFAULT_MAX_RETRIES,
            link_timeout: None,
            session_timeout: Duration::from_secs(15),
            command_window: Duration::from_millis(800),
            flush_grace: Duration::from_millis(200),
            log_format: LogFormat::Pretty,
        }
    }
}

impl RuntimeSettings {
    pub fn from_json(json: &str) -> AiotResult<Self> {
        let settings: RuntimeSettings =
            serde_json::from_str(json).map_err(|e| AiotError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults overridden by `AIOT_*` environment variables
    pub fn from_env() -> AiotResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup("AIOT_<NAME>")`
    pub fn from_lookup<F>(lookup: F) -> AiotResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut settings = RuntimeSettings::default();

        if let Some(v) = var("FW_VERSION") {
            settings.firmware_version = v;
        }
        if let Some(v) = var("BROKER_URI") {
            settings.broker_uri = v;
        }
        if let Some(v) = var("SLEEP_SECS") {
            settings.default_sleep_secs = parse_number("SLEEP_SECS", &v)?;
        }
        if let Some(v) = var("LINK_RETRIES") {
            settings.link_max_retries = parse_number("LINK_RETRIES", &v)?;
        }
        if let Some(v) = var("LINK_TIMEOUT") {
            settings.link_timeout = parse_opt_duration(&v)?;
        }
        if let Some(v) = var("SESSION_TIMEOUT") {
            settings.session_timeout = parse_duration(&v)?;
        }
        if let Some(v) = var("COMMAND_WINDOW") {
            settings.command_window = parse_duration(&v)?;
        }
        if let Some(v) = var("FLUSH_GRACE") {
            settings.flush_grace = parse_duration(&v)?;
        }
        if let Some(v) = var("LOG_FORMAT") {
            settings.log_format = v.parse()?;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> AiotResult<()> {
        if !(MIN_SLEEP_SECS..=MAX_SLEEP_SECS).contains(&self.default_sleep_secs) {
            return Err(AiotError::Config(format!(
                "default_sleep_secs must be in {}..={}, got {}",
                MIN_SLEEP_SECS, MAX_SLEEP_SECS, self.default_sleep_secs
            )));
        }
        if self.link_max_retries == 0 {
            return Err(AiotError::Config("link_max_retries must be > 0".into()));
        }
        if self.session_timeout.is_zero() {
            return Err(AiotError::Config("session_timeout must be > 0".into()));
        }
        if self.firmware_version.is_empty() || self.firmware_version.contains(';') {
            return Err(AiotError::Config(format!(
                "invalid firmware_version {:?}",
                self.firmware_version
            )));
        }
        Ok(())
    }

    pub fn default_sleep(&self) -> Duration {
        Duration::from_secs(self.default_sleep_secs as u64)
    }
}

fn parse_number(name: &str, value: &str) -> AiotResult<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| AiotError::Config(format!("{}{}: not a number: {:?}", ENV_PREFIX, name, value)))
}

fn parse_duration(value: &str) -> AiotResult<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| AiotError::Config(format!("invalid duration {:?}: {}", value, e)))
}

fn parse_opt_duration(value: &str) -> AiotResult<Option<Duration>> {
    match value.trim() {
        "none" | "" => Ok(None),
        other => parse_duration(other).map(Some),
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        super::parse_duration(&s).map_err(D::Error::custom)
    }
}

mod opt_duration_str {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_str(&humantime::format_duration(*d).to_string()),
            None => s.serialize_str("none"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let s = String::deserialize(d)?;
        super::parse_opt_duration(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = RuntimeSettings::default();
        assert_eq!(settings.firmware_version, "1.0.0");
        assert_eq!(settings.default_sleep_secs, 30);
        assert_eq!(settings.link_max_retries, 10);
        assert_eq!(settings.link_timeout, None);
        assert_eq!(settings.session_timeout, Duration::from_secs(15));
        assert_eq!(settings.command_window, Duration::from_millis(800));
        assert_eq!(settings.flush_grace, Duration::from_millis(200));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let settings = RuntimeSettings::from_json(
            r#"{ "session_timeout": "5s", "command_window": "2s 500ms", "link_timeout": "1m", "log_format": "json" }"#,
        )
        .unwrap();

        assert_eq!(settings.session_timeout, Duration::from_secs(5));
        assert_eq!(settings.command_window, Duration::from_millis(2500));
        assert_eq!(settings.link_timeout, Some(Duration::from_secs(60)));
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.default_sleep_secs, 30);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(RuntimeSettings::from_json(r#"{ "default_sleep_secs": 0 }"#).is_err());
        assert!(RuntimeSettings::from_json(r#"{ "session_timeout": "soon" }"#).is_err());
        assert!(RuntimeSettings::from_json(r#"{ "link_max_retries": 0 }"#).is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let settings = RuntimeSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        assert_eq!(RuntimeSettings::from_json(&json).unwrap(), settings);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("AIOT_SLEEP_SECS", "120"),
            ("AIOT_LINK_TIMEOUT", "none"),
            ("AIOT_SESSION_TIMEOUT", "3s"),
            ("AIOT_FW_VERSION", "1.2.0"),
        ]
        .into_iter()
        .collect();

        let settings =
            RuntimeSettings::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.default_sleep_secs, 120);
        assert_eq!(settings.link_timeout, None);
        assert_eq!(settings.session_timeout, Duration::from_secs(3));
        assert_eq!(settings.firmware_version, "1.2.0");
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = RuntimeSettings::from_lookup(|k| {
            (k == "AIOT_LINK_RETRIES").then(|| "many".to_string())
        });
        assert!(matches!(err, Err(AiotError::Config(_))));
    }
}
