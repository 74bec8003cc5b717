use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use super::types::{Command, Status};
use crate::error::{Error, Result};

pub const MAX_SEQUENCE_NUMBER: u8 = 31;

const SEQUENCE_MASK: u8 = 0x1F;
const SYNC_BIT: u8 = 0x80;
const RESEND_BIT: u8 = 0x40;
const HEADER_SIZE: usize = 2;

fn check_sequence(sequence: u8) -> Result<()> {
    if sequence > MAX_SEQUENCE_NUMBER {
        return Err(Error::InvalidValue(format!(
            "Sequence number {} out of range [0..{}]",
            sequence, MAX_SEQUENCE_NUMBER
        )));
    }
    Ok(())
}

/// Host to client packet.
///
/// ```text
/// | sync:1 | reserved:2 | sequence:5 | command:8 | data:0..N |
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdPacket {
    pub sync: bool,
    pub sequence: u8,
    pub command: Command,
    pub data: Bytes,
}

impl CmdPacket {
    pub fn new(sequence: u8, command: Command, data: impl Into<Bytes>, sync: bool) -> Result<Self> {
        check_sequence(sequence)?;
        Ok(Self {
            sync,
            sequence,
            command,
            data: data.into(),
        })
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::InvalidValue(format!(
                "Command packet too short: {} bytes",
                bytes.len()
            )));
        }
        let command = Command::try_from(bytes[1])?;
        Self::new(
            bytes[0] & SEQUENCE_MASK,
            command,
            Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
            bytes[0] & SYNC_BIT != 0,
        )
    }

    pub fn to_binary(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.data.len());
        let mut header = self.sequence & SEQUENCE_MASK;
        if self.sync {
            header |= SYNC_BIT;
        }
        buf.put_u8(header);
        buf.put_u8(self.command as u8);
        buf.extend_from_slice(&self.data);
        buf.freeze()
    }
}

impl fmt::Display for CmdPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Command:  {} ({:#04x})\nSequence: {}\nSync:     {}\nData:     {:02x?}",
            self.command, self.command as u8, self.sequence, self.sync, &self.data[..]
        )
    }
}

/// Client to host packet.
///
/// ```text
/// | reserved:1 | resend:1 | reserved:1 | sequence:5 | status:8 | data:0..N |
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPacket {
    pub sequence: u8,
    pub status: Status,
    pub resend: bool,
    pub data: Bytes,
}

impl StatusPacket {
    pub fn new(sequence: u8, status: Status, data: impl Into<Bytes>, resend: bool) -> Result<Self> {
        check_sequence(sequence)?;
        Ok(Self {
            sequence,
            status,
            resend,
            data: data.into(),
        })
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::InvalidValue(format!(
                "Status packet too short: {} bytes",
                bytes.len()
            )));
        }
        let status = Status::try_from(bytes[1])?;
        Self::new(
            bytes[0] & SEQUENCE_MASK,
            status,
            Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
            bytes[0] & RESEND_BIT != 0,
        )
    }

    pub fn to_binary(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.data.len());
        let mut header = self.sequence & SEQUENCE_MASK;
        if self.resend {
            header |= RESEND_BIT;
        }
        buf.put_u8(header);
        buf.put_u8(self.status as u8);
        buf.extend_from_slice(&self.data);
        buf.freeze()
    }
}

impl fmt::Display for StatusPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Status:   {} ({:#04x})\nSequence: {}\nResend:   {}\nData:     {:02x?}",
            self.status, self.status as u8, self.sequence, self.resend, &self.data[..]
        )
    }
}
