//! AIoT test harness
//!
//! This crate provides:
//! - A scripted link driver with seeded random loss
//! - An in-memory broker with retained messages and last will
//! - A simulated board (storage, analog sensor, update agent, power)
//! - Single-cycle scenarios wiring all of the above into the orchestrator

pub mod board;
pub mod broker;
pub mod scenario;
pub mod simulator;

pub use board::*;
pub use broker::*;
pub use scenario::*;
pub use simulator::*;
