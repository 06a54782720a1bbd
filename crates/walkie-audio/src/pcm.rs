//! Byte layout of PCM handed to and received from the transport.
//!
//! Mono, signed 16-bit, little-endian: two bytes per frame, nothing else.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::PcmError;

/// Bytes per mono 16-bit frame.
pub const BYTES_PER_FRAME: usize = 2;

/// Serialize samples as little-endian 16-bit PCM.
pub fn encode_le(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * BYTES_PER_FRAME);
    for &sample in samples {
        buf.put_i16_le(sample);
    }
    buf.freeze()
}

/// Parse little-endian 16-bit PCM. A trailing half frame is an error rather
/// than being silently dropped.
pub fn decode_le(mut bytes: &[u8]) -> Result<Vec<i16>, PcmError> {
    if bytes.len() % BYTES_PER_FRAME != 0 {
        return Err(PcmError::OddLength(bytes.len()));
    }
    let mut samples = Vec::with_capacity(bytes.len() / BYTES_PER_FRAME);
    while bytes.has_remaining() {
        samples.push(bytes.get_i16_le());
    }
    Ok(samples)
}

/// Number of frames covering `duration_ms` at `sample_rate`.
pub fn frames_for(duration_ms: u32, sample_rate: u32) -> usize {
    usize::try_from(u64::from(duration_ms) * u64::from(sample_rate) / 1000).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_little_endian() {
        let bytes = encode_le(&[1, -2, i16::MAX]);
        assert_eq!(&bytes[..], &[0x01, 0x00, 0xFE, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn test_decode_known_bytes() {
        let samples = decode_le(&[0x00, 0x80, 0x64, 0x00]).unwrap();
        assert_eq!(samples, vec![i16::MIN, 100]);
    }

    #[test]
    fn test_decode_rejects_half_frame() {
        assert_eq!(decode_le(&[1, 2, 3]), Err(PcmError::OddLength(3)));
    }

    #[test]
    fn test_frames_for() {
        assert_eq!(frames_for(10, 48000), 480);
        assert_eq!(frames_for(20, 48000), 960);
        assert_eq!(frames_for(0, 48000), 0);
    }
}
