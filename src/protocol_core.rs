//! Frame codec for the agent RPC channel
//!
//! Used by both ends: the RPC client in `net` writes requests and reads
//! replies, the agent loop reads requests and writes replies.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Read, Write};

use crate::protocol::{Envelope, HEADER_LEN, MAGIC, MAX_FRAME_SIZE, VERSION};

/// Validate frame payload size using protocol::MAX_FRAME_SIZE directly
pub fn validate_frame_size(size: usize) -> Result<()> {
    if size > MAX_FRAME_SIZE {
        bail!("frame payload too large: {} bytes (max: {})", size, MAX_FRAME_SIZE);
    }
    Ok(())
}

/// Build frame header (11 bytes)
/// Format: MAGIC (4) | VERSION (2) | KIND (1) | LENGTH (4)
pub fn build_frame_header(kind: u8, payload_len: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6] = kind;
    header[7..11].copy_from_slice(&payload_len.to_le_bytes());
    header
}

/// Parse frame header
/// Returns: (kind, payload_length)
pub fn parse_frame_header(header: &[u8; HEADER_LEN]) -> Result<(u8, u32)> {
    if &header[0..4] != MAGIC {
        bail!("invalid magic in frame header");
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        bail!("protocol version mismatch: got {}, expected {}", version, VERSION);
    }

    let kind = header[6];
    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);

    Ok((kind, payload_len))
}

/// Write one frame and flush it
pub fn write_frame<W: Write + ?Sized>(w: &mut W, kind: u8, payload: &[u8]) -> Result<()> {
    validate_frame_size(payload.len())?;
    let header = build_frame_header(kind, payload.len() as u32);
    w.write_all(&header)?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the stream ended cleanly between frames.
pub fn read_frame<R: Read + ?Sized>(r: &mut R) -> Result<Option<(u8, Vec<u8>)>> {
    let mut header = [0u8; HEADER_LEN];
    match r.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let (kind, len) = parse_frame_header(&header)?;
    let len = len as usize;
    validate_frame_size(len)?;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).context("stream ended inside a frame")?;
    Ok(Some((kind, payload)))
}

/// Encode an enveloped message and write it as one frame
pub fn send_message<W, T>(w: &mut W, kind: u8, id: u64, body: &T) -> Result<()>
where
    W: Write + ?Sized,
    T: Serialize,
{
    let payload = bincode::serialize(&Envelope { id, body }).context("encode message")?;
    write_frame(w, kind, &payload)
}

/// Decode an enveloped message from a frame payload
pub fn decode_message<T: DeserializeOwned>(payload: &[u8]) -> Result<Envelope<T>> {
    bincode::deserialize(payload).context("decode message")
}
