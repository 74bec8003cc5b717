use bytes::{Bytes, BytesMut};
use log::warn;
use tokio::sync::mpsc;

use super::{Channel, WaitPolicy};
use crate::error::TransportError;

/// One end of an in-memory pipe.
///
/// In byte mode the pipe behaves like a serial line: reads return any number
/// of bytes up to the requested size and message boundaries are lost. In
/// packet mode each read returns exactly one message, like an I2C or SPI
/// transaction.
#[derive(Debug)]
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    pending: BytesMut,
    packet_mode: bool,
    is_open: bool,
}

impl MemoryChannel {
    fn pair(packet_mode: bool) -> (Self, Self) {
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();

        let end = |tx, rx| Self {
            tx,
            rx,
            pending: BytesMut::new(),
            packet_mode,
            is_open: false,
        };
        (end(tx1, rx2), end(tx2, rx1))
    }

    /// Linked byte-stream ends, host first.
    pub fn byte_pair() -> (Self, Self) {
        Self::pair(false)
    }

    /// Linked message preserving ends, host first.
    pub fn packet_pair() -> (Self, Self) {
        Self::pair(true)
    }

    fn read_packet(&mut self, packet: Bytes, max_bytes: usize) -> Bytes {
        if packet.len() > max_bytes {
            warn!(
                "Truncating {} byte packet to requested {} bytes",
                packet.len(),
                max_bytes
            );
            return packet.slice(..max_bytes);
        }
        packet
    }

    fn take_pending(&mut self, max_bytes: usize) -> Bytes {
        while let Ok(chunk) = self.rx.try_recv() {
            self.pending.extend_from_slice(&chunk);
        }
        let n = max_bytes.min(self.pending.len());
        self.pending.split_to(n).freeze()
    }
}

impl Channel for MemoryChannel {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.is_open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.is_open = false;
        self.pending.clear();
        Ok(())
    }

    async fn read(&mut self, max_bytes: usize, wait: WaitPolicy) -> Result<Bytes, TransportError> {
        if !self.is_open || max_bytes == 0 {
            return Ok(Bytes::new());
        }
        if !self.packet_mode && !self.pending.is_empty() {
            return Ok(self.take_pending(max_bytes));
        }

        match wait.run(self.rx.recv()).await {
            Some(Some(chunk)) if self.packet_mode => Ok(self.read_packet(chunk, max_bytes)),
            Some(Some(chunk)) => {
                self.pending.extend_from_slice(&chunk);
                Ok(self.take_pending(max_bytes))
            }
            // Peer dropped or nothing arrived in time
            Some(None) | None => Ok(Bytes::new()),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(Bytes::copy_from_slice(data))
            .map_err(|_| TransportError::Closed)
    }
}
