//! Sentinel-delimited text framing
//!
//! A text frame is the payload encoded as UTF-16LE followed by [`SENTINEL`].
//! The receiving side keeps everything before the first sentinel and drops the
//! rest, so one decrypted buffer carries exactly one logical message.
//!
//! Payloads must not contain the sentinel themselves. [`TextCodec::encode`]
//! rejects such payloads instead of producing a frame that would decode to a
//! truncated message.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;
use crate::ProtocolError;

/// Reserved delimiter that terminates every text frame
pub const SENTINEL: &str = "¯\\_(ツ)_/¯";

/// Codec converting text payloads to and from delimited UTF-16LE buffers
#[derive(Debug, Clone)]
pub struct TextCodec {
    /// Sentinel as UTF-16 code units, used for searching decoded buffers
    sentinel_units: Vec<u16>,
}

impl Default for TextCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl TextCodec {
    /// Create a new text codec
    pub fn new() -> Self {
        Self {
            sentinel_units: SENTINEL.encode_utf16().collect(),
        }
    }

    /// Encode a text payload into a delimited UTF-16LE buffer
    pub fn encode(&self, text: &str) -> Result<Bytes, ProtocolError> {
        if text.contains(SENTINEL) {
            return Err(ProtocolError::DelimiterInPayload);
        }

        let mut buf = BytesMut::with_capacity((text.len() + SENTINEL.len()) * 2);
        for unit in text.encode_utf16().chain(self.sentinel_units.iter().copied()) {
            buf.put_u16_le(unit);
        }

        Ok(buf.freeze())
    }

    /// Decode a delimited buffer back into its text payload
    ///
    /// Everything after the first sentinel is discarded, including any
    /// trailing zero padding from fixed-size reads. A buffer without a
    /// sentinel decodes to its full text. An odd trailing byte is ignored.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, ProtocolError> {
        if bytes.len() % 2 != 0 {
            debug!("Ignoring odd trailing byte in {}-byte text frame", bytes.len());
        }

        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        let end = match self.find_sentinel(&units) {
            Some(pos) => pos,
            None => {
                debug!("Text frame has no delimiter, keeping the whole buffer");
                units.len()
            }
        };

        char::decode_utf16(units[..end].iter().copied())
            .collect::<Result<String, _>>()
            .map_err(|e| ProtocolError::InvalidEncoding(e.to_string()))
    }

    /// Position of the first sentinel in a sequence of code units
    fn find_sentinel(&self, units: &[u16]) -> Option<usize> {
        units
            .windows(self.sentinel_units.len())
            .position(|window| window == self.sentinel_units.as_slice())
    }
}
