//! dirdiff library
//!
//! Compares two directory trees, local or reachable over SSH through a
//! `dirdiff --agent` process, and classifies how they relate.

pub mod cancel;
pub mod checksum;
pub mod cli;
pub mod compare;
pub mod fs_enum;
pub mod location;
pub mod logger;
pub mod net;
pub mod node;
pub mod outcome;
pub mod progress;
pub mod protocol;
pub mod protocol_core;
pub mod render;
