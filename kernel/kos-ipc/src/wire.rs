//! Request-channel frame format, per spec.md §4.8/§6:
//! `[4-byte big-endian length][1-byte flags][payload]`.

use bitflags::bitflags;

use kos_core::error::{KError, KResult};

/// Maximum frame payload accepted by [`decode_frame`], guarding against a
/// corrupt or hostile length prefix allocating unbounded memory.
pub const MAX_FRAME_PAYLOAD: u32 = 16 * 1024 * 1024;

bitflags! {
    /// The frame header's flag byte, per spec.md §6.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        const COMPRESSED  = 1 << 0;
        const ENCRYPTED   = 1 << 1;
        const FRAGMENTED  = 1 << 2;
        const REQUIRES_ACK = 1 << 3;
    }
}

/// One decoded request-channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: FrameFlags,
    pub payload: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn new(flags: FrameFlags, payload: Vec<u8>) -> Self {
        Self { flags, payload }
    }

    /// Serializes this frame to the wire format, prefixing it with its own
    /// length so the receiver can frame the byte stream.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.payload.len());
        let len = (1 + self.payload.len()) as u32;
        out.extend_from_slice(&len.to_be_bytes());
        out.push(self.flags.bits());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Decodes exactly one frame from the front of `buf`, returning the frame
/// and the number of bytes consumed. Returns `Ok(None)` if `buf` doesn't
/// yet hold a complete frame.
///
/// # Errors
/// Returns [`KError::InvalidArgument`] if the declared length exceeds
/// [`MAX_FRAME_PAYLOAD`] or is too short to hold the flags byte.
pub fn decode_frame(buf: &[u8]) -> KResult<Option<(Frame, usize)>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if len == 0 {
        return Err(KError::InvalidArgument);
    }
    if len > MAX_FRAME_PAYLOAD {
        return Err(KError::InvalidArgument);
    }
    let total = 4 + len as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let flags = FrameFlags::from_bits_truncate(buf[4]);
    let payload = buf[5..total].to_vec();
    Ok(Some((Frame::new(flags, payload), total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let frame = Frame::new(FrameFlags::REQUIRES_ACK, b"hello".to_vec());
        let bytes = frame.encode();
        let (decoded, consumed) = decode_frame(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn decode_reports_incomplete_frame() {
        let frame = Frame::new(FrameFlags::empty(), b"hello world".to_vec());
        let bytes = frame.encode();
        let partial = &bytes[..bytes.len() - 2];
        assert_eq!(decode_frame(partial).unwrap(), None);
    }

    #[test]
    fn decode_rejects_oversized_length() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(MAX_FRAME_PAYLOAD + 1).to_be_bytes());
        bytes.push(0);
        let err = decode_frame(&bytes).unwrap_err();
        assert_eq!(err, KError::InvalidArgument);
    }

    #[test]
    fn empty_payload_frame_roundtrips() {
        let frame = Frame::new(FrameFlags::empty(), Vec::new());
        let bytes = frame.encode();
        let (decoded, consumed) = decode_frame(&bytes).unwrap().unwrap();
        assert_eq!(consumed, 5);
        assert_eq!(decoded.payload.len(), 0);
    }
}
