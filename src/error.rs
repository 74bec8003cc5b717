use thiserror::Error;

/// Channel level faults. These are recoverable: the protocol engine decides
/// whether to retry.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Timeout while waiting for data")]
    Timeout,

    #[error("Frame integrity error: {0}")]
    Integrity(String),

    #[error("Channel closed")]
    Closed,

    #[error("Channel IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Client info error: {0}")]
    ClientInfo(String),

    #[error("Command not supported: {0:#04x}")]
    CmdNotSupported(u8),

    #[error("Invalid status: {0:#04x}")]
    StatusInvalid(u8),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Update failed: {0}")]
    Update(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hex file error: {0}")]
    HexFile(#[from] ihex::ReaderError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, Error>;
