//! Board collaborators
//!
//! Everything below the orchestrator that touches hardware: identity,
//! persistent storage, sensors, firmware update and power control.

use std::time::Duration;

use thiserror::Error;

use aiot_core::{AiotResult, NodeIdentity, WakeReason};

/// Source of the factory hardware address
pub trait IdentitySource: Send {
    fn hardware_address(&self) -> [u8; 6];

    fn node_id(&self) -> NodeIdentity {
        NodeIdentity::from_mac(self.hardware_address())
    }
}

/// Faults reported by persistent storage initialisation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageFault {
    #[error("no free pages")]
    NoFreePages,

    #[error("partition holds a newer layout")]
    NewVersionFound,

    #[error("storage I/O: {0}")]
    Io(String),
}

impl StorageFault {
    /// Whether an erase and reinitialisation may recover the partition
    pub fn needs_erase(&self) -> bool {
        matches!(self, StorageFault::NoFreePages | StorageFault::NewVersionFound)
    }
}

/// Persistent key-value storage
pub trait Storage: Send {
    fn init(&mut self) -> Result<(), StorageFault>;

    fn erase_and_init(&mut self) -> Result<(), StorageFault>;
}

/// One sensor reading, published as `<key>=<value>`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Measurement {
    pub key: String,
    pub value: i64,
}

impl Measurement {
    pub fn new(key: impl Into<String>, value: i64) -> Self {
        Measurement {
            key: key.into(),
            value,
        }
    }

    /// Calibrated analog reading: `<name>_mv`
    pub fn millivolts(name: &str, mv: i64) -> Self {
        Measurement::new(format!("{}_mv", name), mv)
    }

    /// Uncalibrated analog reading: `<name>_raw`
    pub fn raw(name: &str, counts: i64) -> Self {
        Measurement::new(format!("{}_raw", name), counts)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    #[error("sensor not ready")]
    NotReady,

    #[error("sensor read failed: {0}")]
    Read(String),
}

/// A peripheral sampled once per cycle
pub trait SensorSource: Send {
    /// Short name used in telemetry keys
    fn name(&self) -> &str;

    fn read(&mut self) -> Result<Measurement, SensorError>;
}

/// Firmware image transfer
pub trait UpdateAgent: Send {
    /// Download and activate the image at `url`
    ///
    /// On success the caller restarts the device.
    fn apply_update(&mut self, url: &str) -> AiotResult<()>;
}

/// Wake source and power state control
pub trait PowerControl: Send {
    fn wake_reason(&self) -> WakeReason;

    /// Arm the wake timer and enter low-power state
    fn suspend(&mut self, duration: Duration);

    fn restart(&mut self);
}

/// The collaborators of one node
pub struct Board {
    pub identity: Box<dyn IdentitySource>,
    pub storage: Box<dyn Storage>,
    pub sensors: Vec<Box<dyn SensorSource>>,
    /// Absent on builds without an update partition
    pub updater: Option<Box<dyn UpdateAgent>>,
    pub power: Box<dyn PowerControl>,
}
