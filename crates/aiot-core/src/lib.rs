//! AIoT Core - Fundamental types for duty-cycled sensor nodes
//!
//! This crate defines the types shared by every layer of the node:
//! - Identity and topic namespace (NodeIdentity, TopicSet)
//! - Run-time parameters mutated by remote commands (NodeConfig)
//! - The command grammar (Command)
//! - Wake-up classification (WakeReason)
//! - The error taxonomy (AiotError)

pub mod command;
pub mod config;
pub mod error;
pub mod id;
pub mod wake;

pub use command::*;
pub use config::*;
pub use error::*;
pub use id::*;
pub use wake::*;
