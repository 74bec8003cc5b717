use bytes::{BufMut, Bytes, BytesMut};

use super::{checksum, escape_into, unescape, FRAME_END, FRAME_START};
use crate::error::TransportError;

/// A framed packet as it travels over a byte-stream channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
    pub crc: u16,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let crc = checksum(&payload);
        Self { payload, crc }
    }

    /// Decodes one raw frame, delimiters included. Anything preceding the
    /// last start code is line noise and gets dropped.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, TransportError> {
        let start = raw
            .iter()
            .rposition(|&b| b == FRAME_START)
            .ok_or_else(|| TransportError::Integrity("Missing frame start code".into()))?;
        let body = match raw[start + 1..].split_last() {
            Some((&FRAME_END, body)) => body,
            _ => return Err(TransportError::Integrity("Missing frame end code".into())),
        };

        let decoded = unescape(body)?;
        if decoded.len() < 2 {
            return Err(TransportError::Integrity(format!(
                "Frame too short: {} bytes",
                decoded.len()
            )));
        }

        let (payload, crc_bytes) = decoded.split_at(decoded.len() - 2);
        let received_crc = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
        let calculated_crc = checksum(payload);
        if calculated_crc != received_crc {
            return Err(TransportError::Integrity(format!(
                "CRC mismatch: expected {:#06x}, got {:#06x}",
                calculated_crc, received_crc
            )));
        }

        Ok(Self {
            payload: Bytes::copy_from_slice(payload),
            crc: received_crc,
        })
    }

    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(2 * (self.payload.len() + 2) + 2);
        dst.put_u8(FRAME_START);
        escape_into(&self.payload, dst);
        escape_into(&self.crc.to_le_bytes(), dst);
        dst.put_u8(FRAME_END);
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }
}
