// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Length-prefixed framing over a byte stream (component C4).
//!
//! Frame layout on the wire:
//!
//! ```text
//! [0x00, 0x01, 0x02, 0x03, len_lo, len_mid0, len_mid1, len_hi, payload...]
//! ```
//!
//! where `len` is a little-endian u32 byte count of `payload`. This
//! implementation verifies the four-byte tag on receive and treats a
//! mismatch as a protocol error rather than silently ignoring it.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;
use crate::value::MAX_BYTES;

/// The four bytes that precede every frame's length field.
pub const FRAME_TAG: [u8; 4] = [0x00, 0x01, 0x02, 0x03];

/// Size of the tag+length header that precedes every frame's payload.
pub const HEADER_LEN: usize = 8;

/// Wraps an already-serialized envelope payload in a frame header, ready to
/// write to the wire in one shot.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&FRAME_TAG);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Reads exactly one frame from `reader`: the 8-byte header, then the
/// declared number of payload bytes. Tolerant of partial reads from the
/// underlying transport (each `read_exact` loops internally); a declared
/// length over [`MAX_BYTES`] is rejected rather than truncated.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, Error> {
    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| Error::from_io(&e))?;

    if header[..4] != FRAME_TAG {
        return Err(Error::ProtocolError(format!(
            "bad frame tag {:02x?}, expected {:02x?}",
            &header[..4],
            FRAME_TAG
        )));
    }

    let len = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
    if len > MAX_BYTES {
        return Err(Error::BufferTooLarge);
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| Error::from_io(&e))?;
    Ok(payload)
}

/// Writes one frame (header + payload) to `writer`.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<(), Error> {
    let frame = encode_frame(payload);
    writer
        .write_all(&frame)
        .await
        .map_err(|e| Error::from_io(&e))?;
    Ok(())
}
