//! AIoT Wire - Text payload format
//!
//! Every application payload is ASCII `key=value` pairs joined by `;`:
//! - Generic codec (KvPayload)
//! - Retained status snapshots (StatusPayload, NodeState)
//! - Acknowledgement events (`event=<name>[;k=v]`)

pub mod kv;
pub mod status;

pub use kv::*;
pub use status::*;
