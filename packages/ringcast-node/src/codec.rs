//! Length-prefixed Deflate frame codec.
//!
//! Frame layout: a 4-byte big-endian `uncompressed_len` (`0` means the
//! payload that follows is raw, not compressed), then a 4-byte big-endian
//! `encoded_len` giving the number of bytes making up this frame's payload,
//! then `encoded_len` bytes -- either the raw payload or a Deflate stream
//! that inflates to exactly `uncompressed_len` bytes. Payloads shorter than
//! `threshold` bytes are always sent raw, matching the flag semantics: a
//! zero header unambiguously means "what follows is exactly the original
//! bytes".

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, BytesMut};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tokio_util::codec::{Decoder, Encoder};

const HEADER_LEN: usize = 8;

/// Codec implementing the length/flag frame described above.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    threshold: usize,
}

impl FrameCodec {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let uncompressed_len = u32::from_be_bytes(src[0..4].try_into().unwrap());
        let encoded_len = u32::from_be_bytes(src[4..8].try_into().unwrap()) as usize;

        if src.len() < HEADER_LEN + encoded_len {
            src.reserve(HEADER_LEN + encoded_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let encoded = src.split_to(encoded_len);

        if uncompressed_len == 0 {
            Ok(Some(encoded.to_vec()))
        } else {
            let mut decoder = DeflateDecoder::new(&encoded[..]);
            let mut out = Vec::with_capacity(uncompressed_len as usize);
            decoder.read_to_end(&mut out)?;
            Ok(Some(out))
        }
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() < self.threshold {
            dst.reserve(HEADER_LEN + item.len());
            dst.put_u32(0);
            dst.put_u32(item.len() as u32);
            dst.extend_from_slice(item);
            return Ok(());
        }

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(item)?;
        let compressed = encoder.finish()?;

        dst.reserve(HEADER_LEN + compressed.len());
        dst.put_u32(item.len() as u32);
        dst.put_u32(compressed.len() as u32);
        dst.extend_from_slice(&compressed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(threshold: usize, payload: &[u8]) -> (u32, Vec<u8>) {
        let mut codec = FrameCodec::new(threshold);
        let mut buf = BytesMut::new();
        Encoder::encode(&mut codec, payload, &mut buf).unwrap();
        let uncompressed_len = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let decoded = codec.decode(&mut buf).unwrap().expect("full frame buffered");
        (uncompressed_len, decoded)
    }

    #[test]
    fn short_payload_uses_zero_header() {
        let payload = vec![7u8; 100];
        let (header, decoded) = roundtrip(256, &payload);
        assert_eq!(header, 0);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn long_payload_carries_uncompressed_length() {
        let payload = vec![9u8; 4000];
        let (header, decoded) = roundtrip(256, &payload);
        assert_eq!(header, 4000);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn exactly_at_threshold_is_compressed() {
        let payload = vec![1u8; 256];
        let (header, decoded) = roundtrip(256, &payload);
        assert_eq!(header, 256);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn compressible_payload_actually_shrinks_on_wire() {
        let payload = vec![0u8; 8192];
        let mut codec = FrameCodec::new(256);
        let mut buf = BytesMut::new();
        Encoder::encode(&mut codec, &payload, &mut buf).unwrap();
        assert!(buf.len() < payload.len());
    }

    #[test]
    fn decode_waits_for_full_frame() {
        let mut codec = FrameCodec::new(256);
        let mut buf = BytesMut::new();
        Encoder::encode(&mut codec, &[1, 2, 3], &mut buf).unwrap();

        let mut partial = BytesMut::from(&buf[..buf.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn decode_returns_none_on_incomplete_header() {
        let mut codec = FrameCodec::new(256);
        let mut buf = BytesMut::from(&b"\x00\x00"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn two_frames_back_to_back_decode_independently() {
        let mut codec = FrameCodec::new(256);
        let mut buf = BytesMut::new();
        Encoder::encode(&mut codec, &[1, 2, 3], &mut buf).unwrap();
        Encoder::encode(&mut codec, &[4, 5, 6, 7], &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, vec![4, 5, 6, 7]);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decompress_of_compress_is_identity(payload in prop::collection::vec(any::<u8>(), 0..4096)) {
                let (_, decoded) = roundtrip(256, &payload);
                prop_assert_eq!(decoded, payload);
            }
        }
    }
}
