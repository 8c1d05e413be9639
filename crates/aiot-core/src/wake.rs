//! Wake reasons
//!
//! Why the node left its low-power state. Purely descriptive: the reason is
//! reported in status and telemetry but never changes control flow.

use std::fmt;
use std::str::FromStr;

use crate::AiotError;

/// Cause of the most recent wake-up
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WakeReason {
    /// Scheduled timer expired
    Timer,
    /// Single external pin
    Ext0,
    /// External pin mask
    Ext1,
    /// General-purpose input
    Gpio,
    /// Cold boot or reset, no wake source recorded
    PowerOn,
    /// Any other source (touch, coprocessor, ...)
    Other,
}

impl WakeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            WakeReason::Timer => "timer",
            WakeReason::Ext0 => "ext0",
            WakeReason::Ext1 => "ext1",
            WakeReason::Gpio => "gpio",
            WakeReason::PowerOn => "power_on",
            WakeReason::Other => "other",
        }
    }
}

impl fmt::Display for WakeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WakeReason {
    type Err = AiotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timer" => Ok(WakeReason::Timer),
            "ext0" => Ok(WakeReason::Ext0),
            "ext1" => Ok(WakeReason::Ext1),
            "gpio" => Ok(WakeReason::Gpio),
            "power_on" => Ok(WakeReason::PowerOn),
            "other" => Ok(WakeReason::Other),
            _ => Err(AiotError::Config(format!("unknown wake reason: {}", s))),
        }
    }
}
