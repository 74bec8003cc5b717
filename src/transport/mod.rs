//! Transports deliver whole MDFU packets over a [`Channel`](crate::channel::Channel).
//!
//! Byte-stream channels go through [`SerialTransport`], which frames,
//! escapes and checksums every packet. Channels that already preserve
//! message boundaries (I2C, SPI) use [`PacketTransport`].

use bytes::Bytes;
use std::future::Future;
use std::time::Duration;

mod packet;
mod serial;

pub use self::packet::PacketTransport;
pub use self::serial::SerialTransport;

use crate::error::TransportError;

/// Back-off between channel reads that came back empty before the deadline.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub trait Transport: Send {
    fn open(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Reads one packet. Fails with [`TransportError::Timeout`] when no
    /// complete packet arrives within `timeout`, measured over all channel
    /// reads together.
    fn read(&mut self, timeout: Duration) -> impl Future<Output = Result<Bytes, TransportError>> + Send;

    fn write(&mut self, packet: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Drops everything received but not yet read, without waiting.
    fn discard_input(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
