//! Simulated board collaborators
//!
//! Every collaborator records what the orchestrator asked of it in a shared
//! [`BoardProbe`], so scenarios can assert on suspends, restarts, storage
//! recovery and update attempts after the cycle has consumed the board.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use aiot_core::{AiotError, AiotResult, WakeReason};
use aiot_runtime::{
    Board, IdentitySource, Measurement, PowerControl, SensorError, SensorSource, Storage,
    StorageFault, UpdateAgent,
};

/// Samples averaged per analog reading
pub const ADC_SAMPLES: u32 = 64;
/// Full-scale raw count of the 12-bit converter
pub const ADC_MAX_RAW: u32 = 4095;
/// Full-scale voltage at the configured attenuation
pub const ADC_FULL_SCALE_MV: u32 = 3300;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoardLog {
    pub suspends: Vec<Duration>,
    pub restarts: u32,
    pub storage_inits: u32,
    pub storage_erases: u32,
    pub update_urls: Vec<String>,
}

/// Shared view of what happened on the board
#[derive(Clone, Default)]
pub struct BoardProbe {
    log: Arc<Mutex<BoardLog>>,
}

impl BoardProbe {
    pub fn snapshot(&self) -> BoardLog {
        self.log.lock().clone()
    }

    pub fn last_suspend(&self) -> Option<Duration> {
        self.log.lock().suspends.last().copied()
    }

    pub fn restarts(&self) -> u32 {
        self.log.lock().restarts
    }
}

struct SimIdentity([u8; 6]);

impl IdentitySource for SimIdentity {
    fn hardware_address(&self) -> [u8; 6] {
        self.0
    }
}

/// Storage returning scripted results, then `Ok`
struct SimStorage {
    init_results: VecDeque<Result<(), StorageFault>>,
    erase_results: VecDeque<Result<(), StorageFault>>,
    probe: BoardProbe,
}

impl Storage for SimStorage {
    fn init(&mut self) -> Result<(), StorageFault> {
        self.probe.log.lock().storage_inits += 1;
        self.init_results.pop_front().unwrap_or(Ok(()))
    }

    fn erase_and_init(&mut self) -> Result<(), StorageFault> {
        self.probe.log.lock().storage_erases += 1;
        self.erase_results.pop_front().unwrap_or(Ok(()))
    }
}

/// Noisy analog input averaged over [`ADC_SAMPLES`] conversions
pub struct SimulatedAdc {
    level: u32,
    noise: u32,
    calibrated: bool,
    failing: bool,
    rng: StdRng,
}

impl SimulatedAdc {
    pub fn new(level: u32, calibrated: bool) -> Self {
        SimulatedAdc {
            level: level.min(ADC_MAX_RAW),
            noise: 0,
            calibrated,
            failing: false,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Add uniform noise of +/- `noise` counts per conversion
    pub fn with_noise(mut self, noise: u32, seed: u64) -> Self {
        self.noise = noise;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn failing() -> Self {
        SimulatedAdc {
            failing: true,
            ..SimulatedAdc::new(0, false)
        }
    }

    fn sample(&mut self) -> u32 {
        if self.noise == 0 {
            return self.level;
        }
        let low = self.level.saturating_sub(self.noise);
        let high = self.level.saturating_add(self.noise).min(ADC_MAX_RAW);
        self.rng.gen_range(low..=high)
    }
}

impl SensorSource for SimulatedAdc {
    fn name(&self) -> &str {
        "adc"
    }

    fn read(&mut self) -> Result<Measurement, SensorError> {
        if self.failing {
            return Err(SensorError::Read("conversion timeout".into()));
        }

        let sum: u32 = (0..ADC_SAMPLES).map(|_| self.sample()).sum();
        let raw = sum / ADC_SAMPLES;

        if self.calibrated {
            let mv = raw * ADC_FULL_SCALE_MV / ADC_MAX_RAW;
            Ok(Measurement::millivolts(self.name(), mv as i64))
        } else {
            Ok(Measurement::raw(self.name(), raw as i64))
        }
    }
}

struct SimUpdater {
    result: Result<(), String>,
    probe: BoardProbe,
}

impl UpdateAgent for SimUpdater {
    fn apply_update(&mut self, url: &str) -> AiotResult<()> {
        self.probe.log.lock().update_urls.push(url.to_string());
        self.result.clone().map_err(AiotError::UpdateTransfer)
    }
}

struct SimPower {
    wake: WakeReason,
    probe: BoardProbe,
}

impl PowerControl for SimPower {
    fn wake_reason(&self) -> WakeReason {
        self.wake
    }

    fn suspend(&mut self, duration: Duration) {
        self.probe.log.lock().suspends.push(duration);
    }

    fn restart(&mut self) {
        self.probe.log.lock().restarts += 1;
    }
}

/// Builder for a simulated [`Board`]
pub struct SimulatedBoard {
    mac: [u8; 6],
    wake: WakeReason,
    init_results: Vec<Result<(), StorageFault>>,
    erase_results: Vec<Result<(), StorageFault>>,
    sensors: Vec<Box<dyn SensorSource>>,
    updater: Option<Result<(), String>>,
}

impl SimulatedBoard {
    pub fn new(mac: [u8; 6]) -> Self {
        SimulatedBoard {
            mac,
            wake: WakeReason::Timer,
            init_results: Vec::new(),
            erase_results: Vec::new(),
            sensors: Vec::new(),
            updater: None,
        }
    }

    pub fn wake(mut self, wake: WakeReason) -> Self {
        self.wake = wake;
        self
    }

    /// Results of successive `init` calls (then `Ok`)
    pub fn storage_init(mut self, results: Vec<Result<(), StorageFault>>) -> Self {
        self.init_results = results;
        self
    }

    /// Results of successive `erase_and_init` calls (then `Ok`)
    pub fn storage_erase(mut self, results: Vec<Result<(), StorageFault>>) -> Self {
        self.erase_results = results;
        self
    }

    pub fn sensor(mut self, sensor: impl SensorSource + 'static) -> Self {
        self.sensors.push(Box::new(sensor));
        self
    }

    /// Fit an update agent that answers `result`
    pub fn updater(mut self, result: Result<(), String>) -> Self {
        self.updater = Some(result);
        self
    }

    pub fn build(self) -> (Board, BoardProbe) {
        let probe = BoardProbe::default();
        let board = Board {
            identity: Box::new(SimIdentity(self.mac)),
            storage: Box::new(SimStorage {
                init_results: self.init_results.into(),
                erase_results: self.erase_results.into(),
                probe: probe.clone(),
            }),
            sensors: self.sensors,
            updater: self.updater.map(|result| {
                Box::new(SimUpdater {
                    result,
                    probe: probe.clone(),
                }) as Box<dyn UpdateAgent>
            }),
            power: Box::new(SimPower {
                wake: self.wake,
                probe: probe.clone(),
            }),
        };
        (board, probe)
    }
}
