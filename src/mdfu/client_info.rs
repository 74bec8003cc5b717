//! Client capability records exchanged through GET_CLIENT_INFO.
//!
//! The payload is a list of TLV records, `type:1 | length:1 | value:length`.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::types::Version;
use crate::error::{Error, Result};
use crate::protocols::packet::Command;

const TIMEOUT_UNIT_MS: u64 = 100;
const BUFFER_INFO_SIZE: usize = 3;
const PROTOCOL_VERSION_SIZE: usize = 3;
const COMMAND_TIMEOUT_SIZE: usize = 3;
const INTER_TRANSACTION_DELAY_SIZE: usize = 4;

/// Command id used for the default timeout in the command timeouts record.
const DEFAULT_TIMEOUT_ID: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientInfoType {
    ProtocolVersion = 1,
    BufferInfo = 2,
    CommandTimeouts = 3,
    InterTransactionDelay = 4,
}

impl TryFrom<u8> for ClientInfoType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::ProtocolVersion),
            2 => Ok(Self::BufferInfo),
            3 => Ok(Self::CommandTimeouts),
            4 => Ok(Self::InterTransactionDelay),
            _ => Err(Error::ClientInfo(format!("Invalid client info type: {:#04x}", value))),
        }
    }
}

/// Delay the client needs between two transactions, transferred as a
/// little-endian nanosecond count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct InterTransactionDelay {
    ns: u32,
}

impl InterTransactionDelay {
    pub const MAX_INTER_TRANSACTION_DELAY_SECONDS: f64 = u32::MAX as f64 / 1e9;

    pub fn new(seconds: f64) -> Result<Self> {
        if !(0.0..=Self::MAX_INTER_TRANSACTION_DELAY_SECONDS).contains(&seconds) {
            return Err(Error::InvalidValue(format!(
                "Inter transaction delay {}s out of range [0..{}]",
                seconds,
                Self::MAX_INTER_TRANSACTION_DELAY_SECONDS
            )));
        }
        // Float to int casts saturate, which keeps the maximum at u32::MAX.
        Ok(Self {
            ns: (seconds * 1e9).round() as u32,
        })
    }

    pub fn from_ns(ns: u32) -> Self {
        Self { ns }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; INTER_TRANSACTION_DELAY_SIZE] = bytes.try_into().map_err(|_| {
            Error::InvalidValue(format!(
                "Inter transaction delay needs {} bytes, got {}",
                INTER_TRANSACTION_DELAY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self {
            ns: u32::from_le_bytes(bytes),
        })
    }

    pub fn to_bytes(&self) -> [u8; INTER_TRANSACTION_DELAY_SIZE] {
        self.ns.to_le_bytes()
    }

    pub fn ns(&self) -> u32 {
        self.ns
    }

    pub fn seconds(&self) -> f64 {
        self.ns as f64 / 1e9
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(u64::from(self.ns))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub protocol_version: Version,
    pub buffer_count: u8,
    pub buffer_size: u16,
    pub default_timeout: Option<Duration>,
    pub timeouts: BTreeMap<Command, Duration>,
    pub inter_transaction_delay: Option<InterTransactionDelay>,
}

impl ClientInfo {
    pub fn new(
        protocol_version: Version,
        buffer_count: u8,
        buffer_size: u16,
        default_timeout: Duration,
    ) -> Result<Self> {
        let info = Self {
            protocol_version,
            buffer_count,
            buffer_size,
            default_timeout: Some(default_timeout),
            timeouts: BTreeMap::new(),
            inter_transaction_delay: None,
        };
        info.validate()?;
        Ok(info)
    }

    pub fn with_timeout(mut self, command: Command, timeout: Duration) -> Self {
        self.timeouts.insert(command, timeout);
        self
    }

    pub fn with_inter_transaction_delay(mut self, delay: InterTransactionDelay) -> Self {
        self.inter_transaction_delay = Some(delay);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.buffer_count == 0 {
            return Err(Error::ClientInfo("Buffer count must be at least 1".into()));
        }
        if self.buffer_size == 0 {
            return Err(Error::ClientInfo("Buffer size must not be zero".into()));
        }
        Ok(())
    }

    /// Command specific timeout if the client reported one, else its default.
    pub fn timeout_for(&self, command: Command) -> Option<Duration> {
        self.timeouts.get(&command).copied().or(self.default_timeout)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut protocol_version = None;
        let mut buffer_info = None;
        let mut default_timeout = None;
        let mut timeouts = BTreeMap::new();
        let mut inter_transaction_delay = None;

        let mut rest = data;
        while !rest.is_empty() {
            let &[kind, length, ..] = rest else {
                return Err(Error::ClientInfo("Truncated client info record header".into()));
            };
            let kind = ClientInfoType::try_from(kind)?;
            let length = length as usize;
            let value = rest.get(2..2 + length).ok_or_else(|| {
                Error::ClientInfo(format!(
                    "{:?} record declares {} bytes but only {} remain",
                    kind,
                    length,
                    rest.len() - 2
                ))
            })?;
            rest = &rest[2 + length..];

            match kind {
                ClientInfoType::ProtocolVersion => {
                    check_length(kind, value, PROTOCOL_VERSION_SIZE)?;
                    protocol_version = Some(Version::new(value[0], value[1], value[2]));
                }
                ClientInfoType::BufferInfo => {
                    check_length(kind, value, BUFFER_INFO_SIZE)?;
                    let size = u16::from_le_bytes([value[0], value[1]]);
                    buffer_info = Some((size, value[2]));
                }
                ClientInfoType::CommandTimeouts => {
                    if value.is_empty() || value.len() % COMMAND_TIMEOUT_SIZE != 0 {
                        return Err(Error::ClientInfo(format!(
                            "Invalid command timeouts record length {}",
                            value.len()
                        )));
                    }
                    for entry in value.chunks_exact(COMMAND_TIMEOUT_SIZE) {
                        let units = u16::from_le_bytes([entry[1], entry[2]]);
                        let timeout = Duration::from_millis(u64::from(units) * TIMEOUT_UNIT_MS);
                        if entry[0] == DEFAULT_TIMEOUT_ID {
                            default_timeout = Some(timeout);
                        } else {
                            let command = Command::try_from(entry[0]).map_err(|_| {
                                Error::ClientInfo(format!(
                                    "Timeout for unknown command {:#04x}",
                                    entry[0]
                                ))
                            })?;
                            timeouts.insert(command, timeout);
                        }
                    }
                }
                ClientInfoType::InterTransactionDelay => {
                    check_length(kind, value, INTER_TRANSACTION_DELAY_SIZE)?;
                    inter_transaction_delay = Some(InterTransactionDelay::from_bytes(value)?);
                }
            }
        }

        let protocol_version = protocol_version
            .ok_or_else(|| Error::ClientInfo("Missing mandatory protocol version record".into()))?;
        let (buffer_size, buffer_count) = buffer_info
            .ok_or_else(|| Error::ClientInfo("Missing mandatory buffer info record".into()))?;

        let info = Self {
            protocol_version,
            buffer_count,
            buffer_size,
            default_timeout,
            timeouts,
            inter_transaction_delay,
        };
        info.validate()?;
        Ok(info)
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(32);

        buf.put_u8(ClientInfoType::BufferInfo as u8);
        buf.put_u8(BUFFER_INFO_SIZE as u8);
        buf.put_u16_le(self.buffer_size);
        buf.put_u8(self.buffer_count);

        buf.put_u8(ClientInfoType::ProtocolVersion as u8);
        buf.put_u8(PROTOCOL_VERSION_SIZE as u8);
        buf.put_u8(self.protocol_version.major);
        buf.put_u8(self.protocol_version.minor);
        buf.put_u8(self.protocol_version.patch);

        let mut entries: Vec<(u8, Duration)> = Vec::new();
        if let Some(timeout) = self.default_timeout {
            entries.push((DEFAULT_TIMEOUT_ID, timeout));
        }
        entries.extend(self.timeouts.iter().map(|(cmd, t)| (*cmd as u8, *t)));
        if !entries.is_empty() {
            buf.put_u8(ClientInfoType::CommandTimeouts as u8);
            buf.put_u8((entries.len() * COMMAND_TIMEOUT_SIZE) as u8);
            for (id, timeout) in entries {
                buf.put_u8(id);
                buf.put_u16_le(timeout_units(timeout)?);
            }
        }

        if let Some(delay) = self.inter_transaction_delay {
            buf.put_u8(ClientInfoType::InterTransactionDelay as u8);
            buf.put_u8(INTER_TRANSACTION_DELAY_SIZE as u8);
            buf.extend_from_slice(&delay.to_bytes());
        }

        Ok(buf.freeze())
    }
}

fn check_length(kind: ClientInfoType, value: &[u8], expected: usize) -> Result<()> {
    if value.len() != expected {
        return Err(Error::ClientInfo(format!(
            "{:?} record has length {}, expected {}",
            kind,
            value.len(),
            expected
        )));
    }
    Ok(())
}

fn timeout_units(timeout: Duration) -> Result<u16> {
    let units = (timeout.as_millis() + u128::from(TIMEOUT_UNIT_MS / 2)) / u128::from(TIMEOUT_UNIT_MS);
    u16::try_from(units)
        .map_err(|_| Error::ClientInfo(format!("Timeout {:?} does not fit the record", timeout)))
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MDFU client information")?;
        writeln!(f, "  Protocol version: {}", self.protocol_version)?;
        writeln!(f, "  Buffers:          {} x {} bytes", self.buffer_count, self.buffer_size)?;
        match self.default_timeout {
            Some(t) => writeln!(f, "  Default timeout:  {:.1}s", t.as_secs_f64())?,
            None => writeln!(f, "  Default timeout:  not reported")?,
        }
        for (command, timeout) in &self.timeouts {
            writeln!(f, "  {} timeout: {:.1}s", command, timeout.as_secs_f64())?;
        }
        if let Some(delay) = self.inter_transaction_delay {
            write!(f, "  Inter transaction delay: {}ns", delay.ns())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANDATORY: [u8; 15] = [
        2, 3, 128, 0, 2, // buffer info: 128 bytes, 2 buffers
        1, 3, 1, 2, 3, // protocol version 1.2.3
        3, 3, 0, 10, 0, // default timeout 1s
    ];

    #[test]
    fn decode_mandatory_records() {
        let info = ClientInfo::from_bytes(&MANDATORY).unwrap();
        let expected =
            ClientInfo::new(Version::new(1, 2, 3), 2, 128, Duration::from_secs(1)).unwrap();
        assert_eq!(info, expected);
    }

    #[test]
    fn decode_command_timeouts_and_delay() {
        let data = [
            2, 3, 128, 0, 2, //
            1, 3, 1, 2, 3, //
            3, 9, 0, 10, 0, // default timeout 1s
            3, 10, 0, // WRITE_CHUNK 1s
            4, 0xF4, 0x01, // GET_IMAGE_STATE 50s
            4, 4, 100, 0, 0, 0, // 100ns inter transaction delay
        ];
        let info = ClientInfo::from_bytes(&data).unwrap();
        assert_eq!(info.timeout_for(Command::WriteChunk), Some(Duration::from_secs(1)));
        assert_eq!(info.timeout_for(Command::GetImageState), Some(Duration::from_secs(50)));
        assert_eq!(info.timeout_for(Command::EndTransfer), Some(Duration::from_secs(1)));
        assert_eq!(info.inter_transaction_delay, Some(InterTransactionDelay::from_ns(100)));
    }

    #[test]
    fn encode_then_decode_preserves_fields() {
        let info = ClientInfo::new(Version::new(1, 0, 0), 1, 512, Duration::from_secs(1))
            .unwrap()
            .with_timeout(Command::GetImageState, Duration::from_secs(5))
            .with_timeout(Command::WriteChunk, Duration::from_millis(200))
            .with_inter_transaction_delay(InterTransactionDelay::new(100e-9).unwrap());
        let decoded = ClientInfo::from_bytes(&info.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn record_order_is_not_significant() {
        let data = [1, 3, 1, 2, 3, 3, 3, 0, 10, 0, 2, 3, 128, 0, 2];
        assert_eq!(
            ClientInfo::from_bytes(&data).unwrap(),
            ClientInfo::from_bytes(&MANDATORY).unwrap()
        );
    }

    #[test]
    fn command_timeouts_are_optional() {
        let info = ClientInfo::from_bytes(&MANDATORY[..10]).unwrap();
        assert_eq!(info.default_timeout, None);
        assert_eq!(info.timeout_for(Command::WriteChunk), None);
    }

    #[test]
    fn invalid_record_length() {
        let data = [2, 2, 2, 0, 3, 1, 3, 1, 2, 3, 3, 3, 0, 10, 0];
        assert!(matches!(ClientInfo::from_bytes(&data), Err(Error::ClientInfo(_))));
    }

    #[test]
    fn command_timeouts_length_not_multiple_of_three() {
        let data = [&MANDATORY[..10], &[3, 4, 0, 10, 0, 0]].concat();
        assert!(matches!(ClientInfo::from_bytes(&data), Err(Error::ClientInfo(_))));
    }

    #[test]
    fn command_timeout_for_unknown_command() {
        let data = [&MANDATORY[..10], &[3, 3, 0x09, 10, 0]].concat();
        assert!(matches!(ClientInfo::from_bytes(&data), Err(Error::ClientInfo(_))));
    }

    #[test]
    fn length_past_end_of_data() {
        let data = [1, 3, 1, 2, 3, 2, 3, 128, 0];
        assert!(matches!(ClientInfo::from_bytes(&data), Err(Error::ClientInfo(_))));
    }

    #[test]
    fn invalid_record_type() {
        let mut data = MANDATORY;
        data[0] = 0;
        assert!(matches!(ClientInfo::from_bytes(&data), Err(Error::ClientInfo(_))));
    }

    #[test]
    fn missing_protocol_version() {
        let data = [2, 3, 128, 0, 2, 3, 3, 0, 10, 0];
        assert!(matches!(ClientInfo::from_bytes(&data), Err(Error::ClientInfo(_))));
    }

    #[test]
    fn missing_buffer_info() {
        let data = [1, 3, 1, 2, 3];
        assert!(matches!(ClientInfo::from_bytes(&data), Err(Error::ClientInfo(_))));
    }

    #[test]
    fn zero_buffer_count_is_rejected() {
        assert!(ClientInfo::new(Version::new(1, 0, 0), 0, 64, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn inter_transaction_delay_conversion() {
        let delay = InterTransactionDelay::new(1.0).unwrap();
        assert_eq!(delay.seconds(), 1.0);
        assert_eq!(delay.ns(), 1_000_000_000);

        let delay = InterTransactionDelay::new(0.123456789).unwrap();
        assert_eq!(delay.to_bytes(), 123456789u32.to_le_bytes());

        let delay = InterTransactionDelay::from_bytes(&123456789u32.to_le_bytes()).unwrap();
        assert_eq!(delay.seconds(), 0.123456789);
        assert_eq!(delay.ns(), 123456789);
    }

    #[test]
    fn inter_transaction_delay_limits() {
        let max = InterTransactionDelay::MAX_INTER_TRANSACTION_DELAY_SECONDS;
        assert_eq!(InterTransactionDelay::new(max).unwrap().ns(), u32::MAX);
        assert!(InterTransactionDelay::new(-1.0).is_err());
        assert!(InterTransactionDelay::new(max + 1.0).is_err());
        assert!(InterTransactionDelay::new(f64::NAN).is_err());
    }

    #[test]
    fn inter_transaction_delay_needs_four_bytes() {
        assert!(InterTransactionDelay::from_bytes(&[1, 2, 3]).is_err());
        assert!(InterTransactionDelay::from_bytes(&[1, 2, 3, 4, 5]).is_err());
    }
}
