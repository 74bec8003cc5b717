use bytes::Bytes;
use log::debug;
use std::time::Duration;
use tokio::time::Instant;

use super::{Transport, IDLE_POLL_INTERVAL};
use crate::channel::{Channel, WaitPolicy};
use crate::error::TransportError;

/// Largest packet a 16-bit buffer size plus header can produce.
const MAX_PACKET_SIZE: usize = u16::MAX as usize + 16;

/// Passthrough transport for channels that keep message boundaries.
pub struct PacketTransport<C> {
    channel: C,
}

impl<C: Channel> PacketTransport<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }
}

impl<C: Channel> Transport for PacketTransport<C> {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.channel.open().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.channel.close().await
    }

    async fn read(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout);
            }
            let remaining = deadline - now;
            let packet = self
                .channel
                .read(MAX_PACKET_SIZE, WaitPolicy::Bounded(remaining))
                .await?;
            if !packet.is_empty() {
                return Ok(packet);
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL.min(remaining)).await;
        }
    }

    async fn write(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        debug!("Sending packet of {} bytes", packet.len());
        self.channel.write(packet).await
    }

    async fn discard_input(&mut self) -> Result<(), TransportError> {
        let mut discarded = 0;
        while !self
            .channel
            .read(MAX_PACKET_SIZE, WaitPolicy::NonBlocking)
            .await?
            .is_empty()
        {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("Discarded {} stale packets", discarded);
        }
        Ok(())
    }
}
