//! Length-prefixed bincode frames.
//!
//! Frame layout: 4-byte big-endian payload length, then the bincode payload.
//! Shared by the socket and RPC transports.

use std::io::{ErrorKind, Read, Write};

use corelib::{ComResult, CommunicationError};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes one frame, prefix included. Fails without touching any stream
/// when the value cannot be encoded or is over `max_len`.
pub(crate) fn encode_frame<T: Serialize>(value: &T, max_len: u32) -> ComResult<Vec<u8>> {
    let payload = bincode::serialize(value)
        .map_err(|e| CommunicationError::with_source("failed to encode frame", e))?;
    if payload.len() > max_len as usize {
        return Err(CommunicationError::new(format!(
            "frame of {} bytes exceeds limit of {max_len}",
            payload.len()
        )));
    }
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub(crate) fn write_frame<T: Serialize, W: Write>(
    writer: &mut W,
    value: &T,
    max_len: u32,
) -> ComResult<()> {
    let frame = encode_frame(value, max_len)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame. `Ok(None)` means the peer closed the stream cleanly
/// between frames.
pub(crate) fn read_frame<T: DeserializeOwned, R: Read>(
    reader: &mut R,
    max_len: u32,
) -> ComResult<Option<T>> {
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(CommunicationError::new("connection closed inside frame header"));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let len = u32::from_be_bytes(prefix);
    if len > max_len {
        return Err(CommunicationError::new(format!(
            "frame of {len} bytes exceeds limit of {max_len}"
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    bincode::deserialize(&payload)
        .map(Some)
        .map_err(|e| CommunicationError::with_source("failed to decode frame", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_clean_eof_between_frames() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &"hello".to_string(), 1024).unwrap();

        let mut cursor = Cursor::new(buf);
        let first: Option<String> = read_frame(&mut cursor, 1024).unwrap();
        assert_eq!(first.as_deref(), Some("hello"));
        let second: Option<String> = read_frame(&mut cursor, 1024).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = Vec::new();
        assert!(write_frame(&mut buf, &vec![7u8; 64], 16).is_err());

        let mut forged = 1_000u32.to_be_bytes().to_vec();
        forged.extend_from_slice(&[0; 8]);
        let result: ComResult<Option<Vec<u8>>> = read_frame(&mut Cursor::new(forged), 16);
        assert!(result.is_err());
    }

    #[test]
    fn test_truncated_header() {
        let result: ComResult<Option<u32>> = read_frame(&mut Cursor::new(vec![0u8, 0]), 16);
        assert!(result.is_err());
    }
}
