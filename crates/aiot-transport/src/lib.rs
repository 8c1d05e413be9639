//! AIoT Transport Layer - Link and session management
//!
//! This crate provides:
//! - Link bring-up with a bounded retry budget (ConnectivityManager)
//! - Pub/sub session with a last will and command intake (SessionManager)
//! - Driver traits implemented by the platform or the simulator

pub mod link;
pub mod session;

pub use link::*;
pub use session::*;
