//! Length-prefixed wire codec for async streams

use crate::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of the big-endian length header in front of every frame
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Codec for length-prefixed frames over async streams
///
/// Each frame on the wire is a `u32` big-endian payload length followed by the
/// payload. Reads loop until the declared length has been consumed, so a
/// message of any size up to the limit arrives intact.
pub struct WireCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Maximum frame size allowed
    max_frame_size: usize,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl WireCodec {
    /// Create a new wire codec with default settings
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a new wire codec with custom max frame size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            // The length header is a u32
            max_frame_size: max_frame_size.min(u32::MAX as usize),
        }
    }

    /// Maximum payload size accepted by this codec
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a payload with its length prefix
    pub fn encode_frame(&self, payload: &[u8]) -> Result<Bytes, ProtocolError> {
        if payload.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(payload);

        Ok(buf.freeze())
    }

    /// Write a payload as one frame to an async writer
    pub async fn write_frame<W>(&self, writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = self.encode_frame(payload)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one frame payload from an async reader
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Option<Bytes>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(payload) = self.try_decode_frame()? {
                return Ok(Some(payload));
            }

            let mut temp_buf = [0u8; 8192];
            let n = reader.read(&mut temp_buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                } else {
                    return Err(ProtocolError::InvalidFrame);
                }
            }

            self.read_buf.extend_from_slice(&temp_buf[..n]);
        }
    }

    /// Try to decode a frame from the internal buffer
    pub fn try_decode_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.read_buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        // Peek at the length prefix without consuming it
        let frame_len = (&self.read_buf[..LENGTH_PREFIX_SIZE]).get_u32() as usize;

        if frame_len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }

        if self.read_buf.len() < LENGTH_PREFIX_SIZE + frame_len {
            return Ok(None);
        }

        self.read_buf.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(self.read_buf.split_to(frame_len).freeze()))
    }

    /// Get the current buffer size
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len()
    }

    /// Take up to `max` raw bytes already read past the last frame
    pub fn take_buffered(&mut self, max: usize) -> Bytes {
        let n = max.min(self.read_buf.len());
        self.read_buf.split_to(n).freeze()
    }

    /// Clear the internal buffer
    pub fn clear_buffer(&mut self) {
        self.read_buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_frame_encode_decode() {
        let codec = WireCodec::new();
        let encoded = codec.encode_frame(b"test payload").unwrap();
        assert_eq!(encoded.len(), LENGTH_PREFIX_SIZE + 12);
        assert_eq!(&encoded[..4], &[0, 0, 0, 12]);

        let mut codec2 = WireCodec::new();
        let mut cursor = Cursor::new(encoded);
        let decoded = codec2.read_frame(&mut cursor).await.unwrap().unwrap();

        assert_eq!(decoded.as_ref(), b"test payload");
    }

    #[tokio::test]
    async fn test_write_read_frame() {
        let codec = WireCodec::new();

        let mut buffer = Vec::new();
        codec.write_frame(&mut buffer, &[7u8; 1000]).await.unwrap();

        let mut codec2 = WireCodec::new();
        let mut cursor = Cursor::new(buffer);
        let decoded = codec2.read_frame(&mut cursor).await.unwrap().unwrap();

        assert_eq!(decoded.len(), 1000);
        assert!(decoded.iter().all(|b| *b == 7));
    }

    #[tokio::test]
    async fn test_partial_frame_reading() {
        let codec = WireCodec::new();
        let encoded = codec.encode_frame(b"split across reads").unwrap();

        let mut codec2 = WireCodec::new();

        let mid = encoded.len() / 2;
        codec2.read_buf.extend_from_slice(&encoded[..mid]);
        assert!(codec2.try_decode_frame().unwrap().is_none());

        codec2.read_buf.extend_from_slice(&encoded[mid..]);
        let decoded = codec2.try_decode_frame().unwrap().unwrap();

        assert_eq!(decoded.as_ref(), b"split across reads");
        assert_eq!(codec2.buffer_size(), 0);
    }

    #[tokio::test]
    async fn test_multiple_frames_in_buffer() {
        let codec = WireCodec::new();
        let mut combined = BytesMut::new();
        combined.extend_from_slice(&codec.encode_frame(b"first").unwrap());
        combined.extend_from_slice(&codec.encode_frame(b"second").unwrap());

        let mut codec2 = WireCodec::new();
        let mut cursor = Cursor::new(combined.freeze());

        let decoded1 = codec2.read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded1.as_ref(), b"first");

        let decoded2 = codec2.read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded2.as_ref(), b"second");

        assert!(codec2.read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_too_large() {
        let codec = WireCodec::with_max_frame_size(100);
        let result = codec.encode_frame(&[0u8; 200]);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { size: 200, max: 100 })));
    }

    #[test]
    fn test_max_frame_size_fits_length_header() {
        let codec = WireCodec::with_max_frame_size(usize::MAX);
        assert_eq!(codec.max_frame_size(), u32::MAX as usize);
    }

    #[test]
    fn test_take_buffered_leftovers() {
        let mut codec = WireCodec::new();
        let mut data = BytesMut::new();
        data.put_slice(&codec.encode_frame(b"framed").unwrap());
        data.put_slice(b"raw tail bytes");
        codec.read_buf.extend_from_slice(&data);

        assert_eq!(codec.try_decode_frame().unwrap().unwrap().as_ref(), b"framed");
        assert_eq!(codec.take_buffered(8).as_ref(), b"raw tail");
        assert_eq!(codec.take_buffered(100).as_ref(), b" bytes");
        assert_eq!(codec.buffer_size(), 0);
    }

    #[tokio::test]
    async fn test_declared_length_over_limit() {
        let mut codec = WireCodec::with_max_frame_size(100);
        let mut data = BytesMut::new();
        data.put_u32(1_000_000);
        data.put_slice(&[0u8; 8]);

        let mut cursor = Cursor::new(data.freeze());
        let result = codec.read_frame(&mut cursor).await;
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let codec = WireCodec::new();
        let encoded = codec.encode_frame(b"incomplete").unwrap();

        let mut codec2 = WireCodec::new();
        let mut cursor = Cursor::new(encoded[..encoded.len() - 3].to_vec());
        let result = codec2.read_frame(&mut cursor).await;

        assert!(matches!(result, Err(ProtocolError::InvalidFrame)));
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let mut codec = WireCodec::new();
        let mut cursor = Cursor::new(Vec::<u8>::new());

        let result = codec.read_frame(&mut cursor).await.unwrap();
        assert!(result.is_none());
    }

    proptest! {
        #[test]
        fn test_codec_roundtrip_properties(
            payload in prop::collection::vec(any::<u8>(), 0..4096)
        ) {
            tokio_test::block_on(async {
                let codec = WireCodec::new();
                let encoded = codec.encode_frame(&payload)?;

                let mut codec2 = WireCodec::new();
                let mut cursor = Cursor::new(encoded);
                let decoded = codec2.read_frame(&mut cursor).await?.unwrap();

                prop_assert_eq!(decoded.as_ref(), payload.as_slice());

                Ok(())
            })?;
        }
    }
}
