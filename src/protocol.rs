//! Shared protocol constants and messages for the agent RPC channel

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::checksum::Checksum;

// Protocol header constants
pub const MAGIC: &[u8; 4] = b"DDIF";
pub const VERSION: u16 = 1;

/// Frame header: MAGIC (4) | VERSION (2) | KIND (1) | LENGTH (4)
pub const HEADER_LEN: usize = 11;

// Maximum frame payload size (64MB) - prevents memory exhaustion on a
// corrupted stream; scan replies of very large trees stay well below it
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Printed once by the agent on stdout before any frame is exchanged
pub const READY_MSG: &str = "__DIRDIFF_AGENT_READY__";

/// Binary name used on the remote side when no override is given
pub const DEFAULT_AGENT_BIN: &str = "dirdiff";

// Frame kind IDs (keep numeric stable)
pub mod frame {
    pub const REQUEST: u8 = 1;
    pub const REPLY: u8 = 2;
}

/// Every frame payload: a call id plus the message body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: u64,
    pub body: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Ping(PingRequest),
    Scan(ScanRequest),
    QuickHash(HashRequest),
    FullHash(HashRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    Pong(PingReply),
    Scan(ScanReply),
    Hash(HashReply),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingReply {
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanRequest {
    pub root: String,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub follow_symlinks: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReply {
    pub files: HashMap<String, u64>,
    pub dirs: Vec<String>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashRequest {
    pub root: String,
    pub rel_path: String,
    pub limit: u64,
    pub follow_symlinks: bool,
    pub algorithm: Checksum,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HashReply {
    pub digest: String,
    pub error: String,
}
