//! Microchip Device Firmware Update (MDFU) host and client library
//!
//! This library updates firmware on embedded devices over any channel that
//! can move bytes: serial ports, TCP sockets or in-memory pipes for testing.
//!
//! # Features
//! - Command/status packet codec with sequence numbers and resend handling
//! - Escaped, CRC-checked framing for byte-stream channels
//! - Passthrough transport for channels that keep packet boundaries
//! - Client capability negotiation (buffer size, timeouts, delays)
//! - Simulated client for end-to-end testing, in-process or behind a TCP listener
//!
//! # Protocol Stack
//! - Protocol engine ([`Mdfu`])
//! - Packet layer ([`CmdPacket`], [`StatusPacket`])
//! - Transport layer ([`SerialTransport`], [`PacketTransport`])
//! - Channel layer ([`channel`])
//!
//! # Examples
//!
//! ## Serial Device Update
//! ```no_run
//! use mdfu::channel::SerialChannel;
//! use mdfu::{MdfuConfig, SerialTransport};
//!
//! #[tokio::main]
//! async fn main() -> mdfu::Result<()> {
//!     let image = mdfu::image::load("firmware.bin").await?;
//!     let transport = SerialTransport::new(SerialChannel::new("/dev/ttyUSB0", 115200));
//!     mdfu::update_firmware(transport, &image, MdfuConfig::new()).await
//! }
//! ```
//!
//! ## Simulated Update
//! ```no_run
//! use mdfu::channel::MemoryChannel;
//! use mdfu::{ClientConfig, MdfuClient, MdfuConfig, SerialTransport};
//!
//! #[tokio::main]
//! async fn main() -> mdfu::Result<()> {
//!     let (host, device) = MemoryChannel::byte_pair();
//!     let mut client = MdfuClient::new(SerialTransport::new(device), ClientConfig::new());
//!     client.start()?;
//!
//!     mdfu::update_firmware(SerialTransport::new(host), &[0xFF; 512], MdfuConfig::new()).await?;
//!     let received = client.stop().await?;
//!     assert_eq!(&received[..], &[0xFF; 512][..]);
//!     Ok(())
//! }
//! ```

pub mod channel;
mod client;
mod error;
pub mod image;
mod mdfu;
mod protocols;
mod transport;

pub use client::{ClientConfig, MdfuClient};
pub use error::{Error, Result, TransportError};
pub use mdfu::{
    ClientInfo, ClientInfoType, CmdNotExecutedCause, FileTransferAbortCause, ImageState,
    InterTransactionDelay, Mdfu, MdfuConfig, Version, MDFU_PROTOCOL_VERSION,
};
pub use protocols::frame::{Frame, FrameCodec, ESCAPE, FRAME_END, FRAME_START};
pub use protocols::packet::{CmdPacket, Command, Status, StatusPacket, MAX_SEQUENCE_NUMBER};
pub use transport::{PacketTransport, SerialTransport, Transport};

/// Performs a firmware update over the given transport
pub async fn update_firmware<T: Transport>(transport: T, image: &[u8], config: MdfuConfig) -> Result<()> {
    let mut host = Mdfu::new(transport, config)?;
    host.run_upgrade(image).await
}

/// Reads the capabilities reported by the client
pub async fn read_client_info<T: Transport>(transport: T, config: MdfuConfig) -> Result<ClientInfo> {
    let mut host = Mdfu::new(transport, config)?;
    host.open().await?;
    let info = host.get_client_info().await;
    host.close().await?;
    info
}
