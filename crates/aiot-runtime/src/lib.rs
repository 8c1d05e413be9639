//! AIoT Runtime - Duty-cycle orchestration
//!
//! This crate runs one wake period of a node:
//! 1. Boot: identity, topics, storage
//! 2. Bring up the link
//! 3. Open the session with its last will, announce `online`
//! 4. Publish telemetry
//! 5. Accept commands for a short window
//! 6. Act on a pending update
//! 7. Announce `sleep` and suspend

pub mod cycle;
pub mod device;
pub mod dispatcher;
pub mod logging;
pub mod reporter;
pub mod settings;

pub use cycle::*;
pub use device::*;
pub use dispatcher::*;
pub use logging::*;
pub use reporter::*;
pub use settings::*;
