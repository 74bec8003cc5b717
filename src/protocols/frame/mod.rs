//! Byte-stream framing for serial class channels.
//!
//! ```text
//! | FRAME_START | escape(payload) | escape(crc16 le) | FRAME_END |
//! ```
//!
//! Reserved codes inside the payload or checksum are replaced by `ESCAPE`
//! followed by the bitwise complement of the code, so an unescaped
//! `FRAME_END` always marks the end of a frame.

use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_16_IBM_3740};
use tokio_util::codec::{Decoder, Encoder};

mod types;
pub use self::types::Frame;

use crate::error::TransportError;

pub const FRAME_START: u8 = 0x56;
pub const FRAME_END: u8 = 0x9E;
pub const ESCAPE: u8 = 0xCC;

pub const FRAME_START_ESC_SEQ: [u8; 2] = [ESCAPE, !FRAME_START];
pub const FRAME_END_ESC_SEQ: [u8; 2] = [ESCAPE, !FRAME_END];
pub const ESCAPE_ESC_SEQ: [u8; 2] = [ESCAPE, !ESCAPE];

// CRC-16/CCITT-FALSE
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

pub fn checksum(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

fn is_reserved(byte: u8) -> bool {
    matches!(byte, FRAME_START | FRAME_END | ESCAPE)
}

pub fn escape_into(data: &[u8], dst: &mut BytesMut) {
    for &byte in data {
        match byte {
            FRAME_START => dst.put_slice(&FRAME_START_ESC_SEQ),
            FRAME_END => dst.put_slice(&FRAME_END_ESC_SEQ),
            ESCAPE => dst.put_slice(&ESCAPE_ESC_SEQ),
            _ => dst.put_u8(byte),
        }
    }
}

pub fn unescape(data: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter();
    while let Some(&byte) = iter.next() {
        match byte {
            ESCAPE => {
                let code = iter.next().map(|b| !b).ok_or_else(|| {
                    TransportError::Integrity("Escape code at end of frame".into())
                })?;
                if !is_reserved(code) {
                    return Err(TransportError::Integrity(format!(
                        "Invalid escape sequence {:#04x} {:#04x}",
                        ESCAPE, !code
                    )));
                }
                out.push(code);
            }
            FRAME_START | FRAME_END => {
                return Err(TransportError::Integrity(format!(
                    "Unescaped reserved code {:#04x} inside frame",
                    byte
                )));
            }
            _ => out.push(byte),
        }
    }
    Ok(out)
}

/// Position of the first `terminator` in `data` that is not the second byte
/// of an escape sequence.
pub fn find_unescaped(data: &[u8], terminator: u8) -> Option<usize> {
    let mut escaped = false;
    for (i, &byte) in data.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        if byte == terminator {
            return Some(i);
        }
        escaped = byte == ESCAPE;
    }
    None
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Frame::new(item).encode_into(dst);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(end) = find_unescaped(src, FRAME_END) else {
            return Ok(None);
        };
        // The raw frame is consumed even when it fails to decode so the next
        // call starts on a fresh frame.
        let raw = src.split_to(end + 1);
        Frame::from_bytes(&raw).map(|frame| Some(frame.payload))
    }
}
