//! Run-time node parameters
//!
//! `NodeConfig` lives in RAM for a single duty cycle. It starts from the
//! firmware defaults on every wake and is changed only by remote commands.

use std::time::Duration;

use crate::{AiotError, AiotResult};

/// Shortest accepted sleep interval (seconds)
pub const MIN_SLEEP_SECS: u32 = 1;
/// Longest accepted sleep interval (seconds), one day
pub const MAX_SLEEP_SECS: u32 = 86_400;
/// Sleep interval used when nothing else was requested
pub const DEFAULT_SLEEP_SECS: u32 = 30;

/// Shortest accepted update URL (bytes)
pub const MIN_UPDATE_URL_LEN: usize = 8;
/// Longest accepted update URL (bytes)
pub const MAX_UPDATE_URL_LEN: usize = 255;

/// Check a sleep interval against the accepted range
pub fn validate_sleep_secs(secs: i64) -> AiotResult<u32> {
    if (MIN_SLEEP_SECS as i64..=MAX_SLEEP_SECS as i64).contains(&secs) {
        Ok(secs as u32)
    } else {
        Err(AiotError::OutOfRange {
            param: "sleep",
            value: secs.to_string(),
        })
    }
}

/// Check an update URL against the accepted length bounds
pub fn validate_update_url(url: &str) -> AiotResult<()> {
    if (MIN_UPDATE_URL_LEN..=MAX_UPDATE_URL_LEN).contains(&url.len()) {
        Ok(())
    } else {
        Err(AiotError::OutOfRange {
            param: "ota_url",
            value: url.len().to_string(),
        })
    }
}

/// Mutable run-time parameters of a node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeConfig {
    sleep_interval_secs: u32,
    pending_update_url: Option<String>,
    update_requested: bool,
}

impl NodeConfig {
    /// Create a configuration with the given default sleep interval
    pub fn new(default_sleep_secs: u32) -> AiotResult<Self> {
        let sleep_interval_secs = validate_sleep_secs(default_sleep_secs as i64)
            .map_err(|e| AiotError::Config(e.to_string()))?;
        Ok(NodeConfig {
            sleep_interval_secs,
            pending_update_url: None,
            update_requested: false,
        })
    }

    #[inline]
    pub fn sleep_interval_secs(&self) -> u32 {
        self.sleep_interval_secs
    }

    #[inline]
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.sleep_interval_secs as u64)
    }

    /// Set the sleep interval; the value is left unchanged when out of range
    pub fn set_sleep_interval(&mut self, secs: i64) -> AiotResult<u32> {
        let secs = validate_sleep_secs(secs)?;
        self.sleep_interval_secs = secs;
        Ok(secs)
    }

    /// Store an update URL and raise the update flag
    pub fn request_update(&mut self, url: &str) -> AiotResult<()> {
        validate_update_url(url)?;
        self.pending_update_url = Some(url.to_string());
        self.update_requested = true;
        Ok(())
    }

    #[inline]
    pub fn is_update_pending(&self) -> bool {
        self.update_requested
    }

    pub fn pending_update_url(&self) -> Option<&str> {
        self.pending_update_url.as_deref()
    }

    /// Clear the update request once it has been acted on
    pub fn clear_update_request(&mut self) {
        self.update_requested = false;
        self.pending_update_url = None;
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            sleep_interval_secs: DEFAULT_SLEEP_SECS,
            pending_update_url: None,
            update_requested: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.sleep_interval_secs(), DEFAULT_SLEEP_SECS);
        assert_eq!(config.sleep_interval(), Duration::from_secs(30));
        assert!(!config.is_update_pending());
        assert_eq!(config.pending_update_url(), None);
    }

    #[test]
    fn test_new_rejects_invalid_default() {
        assert!(NodeConfig::new(0).is_err());
        assert!(NodeConfig::new(MAX_SLEEP_SECS + 1).is_err());
        assert_eq!(NodeConfig::new(60).unwrap().sleep_interval_secs(), 60);
    }

    #[test]
    fn test_sleep_bounds() {
        let mut config = NodeConfig::default();

        assert_eq!(config.set_sleep_interval(1).unwrap(), 1);
        assert_eq!(config.set_sleep_interval(86_400).unwrap(), 86_400);

        assert!(config.set_sleep_interval(0).is_err());
        assert!(config.set_sleep_interval(86_401).is_err());
        assert!(config.set_sleep_interval(-5).is_err());
        assert_eq!(config.sleep_interval_secs(), 86_400);
    }

    #[test]
    fn test_update_request_lifecycle() {
        let mut config = NodeConfig::default();

        config.request_update("http://10.0.0.2/fw.bin").unwrap();
        assert!(config.is_update_pending());
        assert_eq!(config.pending_update_url(), Some("http://10.0.0.2/fw.bin"));

        config.clear_update_request();
        assert!(!config.is_update_pending());
        assert_eq!(config.pending_update_url(), None);
    }

    #[test]
    fn test_update_url_bounds() {
        let mut config = NodeConfig::default();

        assert!(config.request_update("http://").is_err()); // 7 bytes
        assert!(!config.is_update_pending());

        assert!(config.request_update("http://a").is_ok()); // 8 bytes
        config.clear_update_request();

        let longest = format!("http://{}", "a".repeat(MAX_UPDATE_URL_LEN - 7));
        assert!(config.request_update(&longest).is_ok());
        config.clear_update_request();

        let too_long = format!("{}b", longest);
        assert!(config.request_update(&too_long).is_err());
        assert!(!config.is_update_pending());
    }

    proptest! {
        #[test]
        fn prop_sleep_in_range_is_stored_exactly(n in 1i64..=86_400) {
            let mut config = NodeConfig::default();
            prop_assert_eq!(config.set_sleep_interval(n).unwrap() as i64, n);
            prop_assert_eq!(config.sleep_interval_secs() as i64, n);
        }

        #[test]
        fn prop_sleep_out_of_range_keeps_previous(n in prop_oneof![i64::MIN..1i64, 86_401i64..i64::MAX]) {
            let mut config = NodeConfig::default();
            prop_assert!(config.set_sleep_interval(n).is_err());
            prop_assert_eq!(config.sleep_interval_secs(), DEFAULT_SLEEP_SECS);
        }
    }
}
