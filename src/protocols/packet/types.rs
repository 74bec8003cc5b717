use std::fmt;

use crate::error::Error;

/// MDFU commands issued by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Command {
    GetClientInfo = 0x01,
    StartTransfer = 0x02,
    WriteChunk = 0x03,
    GetImageState = 0x04,
    EndTransfer = 0x05,
}

impl Command {
    pub fn description(&self) -> &'static str {
        match self {
            Self::GetClientInfo => "Get client information",
            Self::StartTransfer => "Start a firmware image transfer",
            Self::WriteChunk => "Write a chunk of the firmware image",
            Self::GetImageState => "Get the state of the transferred image",
            Self::EndTransfer => "End the firmware image transfer",
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::GetClientInfo),
            0x02 => Ok(Self::StartTransfer),
            0x03 => Ok(Self::WriteChunk),
            0x04 => Ok(Self::GetImageState),
            0x05 => Ok(Self::EndTransfer),
            _ => Err(Error::CmdNotSupported(value)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GetClientInfo => "GET_CLIENT_INFO",
            Self::StartTransfer => "START_TRANSFER",
            Self::WriteChunk => "WRITE_CHUNK",
            Self::GetImageState => "GET_IMAGE_STATE",
            Self::EndTransfer => "END_TRANSFER",
        };
        f.write_str(name)
    }
}

/// Status codes returned by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success = 0x01,
    CommandNotSupported = 0x02,
    NotAuthorized = 0x03,
    CommandNotExecuted = 0x04,
    AbortFileTransfer = 0x05,
}

impl Status {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Success => "Command received and executed successfully",
            Self::CommandNotSupported => "Command received but not supported",
            Self::NotAuthorized => "Command received but not authorized",
            Self::CommandNotExecuted => "Command received but could not be executed",
            Self::AbortFileTransfer => "Client aborted the file transfer",
        }
    }
}

impl TryFrom<u8> for Status {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Success),
            0x02 => Ok(Self::CommandNotSupported),
            0x03 => Ok(Self::NotAuthorized),
            0x04 => Ok(Self::CommandNotExecuted),
            0x05 => Ok(Self::AbortFileTransfer),
            _ => Err(Error::StatusInvalid(value)),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "SUCCESS",
            Self::CommandNotSupported => "COMMAND_NOT_SUPPORTED",
            Self::NotAuthorized => "NOT_AUTHORIZED",
            Self::CommandNotExecuted => "COMMAND_NOT_EXECUTED",
            Self::AbortFileTransfer => "ABORT_FILE_TRANSFER",
        };
        f.write_str(name)
    }
}
