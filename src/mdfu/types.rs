use std::fmt;

use crate::error::Error;

/// MDFU protocol version triple. Ordering is major, then minor, then patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Highest protocol version this host implements.
pub const MDFU_PROTOCOL_VERSION: Version = Version::new(1, 2, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    Valid = 0x01,
    Invalid = 0x02,
}

impl ImageState {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Valid => "Image is valid",
            Self::Invalid => "Image is invalid",
        }
    }
}

impl TryFrom<u8> for ImageState {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Valid),
            0x02 => Ok(Self::Invalid),
            _ => Err(Error::InvalidValue(format!("Invalid image state: {:#04x}", value))),
        }
    }
}

/// Cause attached to a COMMAND_NOT_EXECUTED status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdNotExecutedCause {
    TransportIntegrityCheckError = 0,
    CommandTooLong = 1,
    CommandTooShort = 2,
    SequenceNumberInvalid = 3,
}

impl CmdNotExecutedCause {
    pub fn description(&self) -> &'static str {
        match self {
            Self::TransportIntegrityCheckError => {
                "Command received failed the Transport Integrity Check indicating that \
                 the command was corrupted during transportation from the host to the client"
            }
            Self::CommandTooLong => "Received command exceeded the size of the client buffer",
            Self::CommandTooShort => "Received command was too short",
            Self::SequenceNumberInvalid => "Sequence number of the received command is invalid",
        }
    }
}

impl TryFrom<u8> for CmdNotExecutedCause {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::TransportIntegrityCheckError),
            1 => Ok(Self::CommandTooLong),
            2 => Ok(Self::CommandTooShort),
            3 => Ok(Self::SequenceNumberInvalid),
            _ => Err(Error::InvalidValue(format!(
                "Invalid command not executed cause: {:#04x}",
                value
            ))),
        }
    }
}

/// Cause attached to an ABORT_FILE_TRANSFER status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTransferAbortCause {
    GenericClientError = 0,
    InvalidFile = 1,
    InvalidClientDeviceId = 2,
    AddressError = 3,
    EraseError = 4,
    WriteError = 5,
    ReadError = 6,
    ApplicationVersionError = 7,
}

impl FileTransferAbortCause {
    pub fn description(&self) -> &'static str {
        match self {
            Self::GenericClientError => "An unknown error occurred in the client",
            Self::InvalidFile => "The file is not a valid firmware image",
            Self::InvalidClientDeviceId => "The firmware image is not intended for this client device",
            Self::AddressError => "The firmware image contains an invalid address",
            Self::EraseError => "The client memory could not be erased",
            Self::WriteError => "The client memory could not be written",
            Self::ReadError => "The client memory could not be read",
            Self::ApplicationVersionError => {
                "The client rejected the application version of the firmware image"
            }
        }
    }
}

impl TryFrom<u8> for FileTransferAbortCause {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::GenericClientError),
            1 => Ok(Self::InvalidFile),
            2 => Ok(Self::InvalidClientDeviceId),
            3 => Ok(Self::AddressError),
            4 => Ok(Self::EraseError),
            5 => Ok(Self::WriteError),
            6 => Ok(Self::ReadError),
            7 => Ok(Self::ApplicationVersionError),
            _ => Err(Error::InvalidValue(format!("Invalid file abort cause: {:#04x}", value))),
        }
    }
}
