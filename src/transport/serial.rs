use bytes::{Bytes, BytesMut};
use log::debug;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder};

use super::{Transport, IDLE_POLL_INTERVAL};
use crate::channel::{Channel, WaitPolicy};
use crate::error::TransportError;
use crate::protocols::frame::FrameCodec;

const READ_CHUNK_SIZE: usize = 256;
const BUFFER_SIZE: usize = 1024;

/// Framed transport for serial class channels.
pub struct SerialTransport<C> {
    channel: C,
    codec: FrameCodec,
    rx_buffer: BytesMut,
    tx_buffer: BytesMut,
}

impl<C: Channel> SerialTransport<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            codec: FrameCodec::new(),
            rx_buffer: BytesMut::with_capacity(BUFFER_SIZE),
            tx_buffer: BytesMut::with_capacity(BUFFER_SIZE),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Pulls one more chunk from the channel into the receive buffer.
    async fn fill(&mut self, deadline: Instant) -> Result<(), TransportError> {
        let now = Instant::now();
        if now >= deadline {
            return Err(TransportError::Timeout);
        }
        let remaining = deadline - now;
        let chunk = self
            .channel
            .read(READ_CHUNK_SIZE, WaitPolicy::Bounded(remaining))
            .await?;
        if chunk.is_empty() {
            tokio::time::sleep(IDLE_POLL_INTERVAL.min(remaining)).await;
        } else {
            self.rx_buffer.extend_from_slice(&chunk);
        }
        Ok(())
    }
}

impl<C: Channel> Transport for SerialTransport<C> {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.rx_buffer.clear();
        self.channel.open().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.channel.close().await
    }

    async fn read(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.codec.decode(&mut self.rx_buffer)? {
                return Ok(payload);
            }
            self.fill(deadline).await?;
        }
    }

    async fn write(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        self.tx_buffer.clear();
        self.codec
            .encode(Bytes::copy_from_slice(packet), &mut self.tx_buffer)?;
        debug!("Sending frame of {} bytes", self.tx_buffer.len());
        self.channel.write(&self.tx_buffer).await
    }

    async fn discard_input(&mut self) -> Result<(), TransportError> {
        let mut discarded = self.rx_buffer.len();
        self.rx_buffer.clear();
        loop {
            let chunk = self
                .channel
                .read(READ_CHUNK_SIZE, WaitPolicy::NonBlocking)
                .await?;
            if chunk.is_empty() {
                break;
            }
            discarded += chunk.len();
        }
        if discarded > 0 {
            debug!("Discarded {} stale input bytes", discarded);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{MemoryChannel, StreamChannel};
    use crate::protocols::frame::{
        Frame, ESCAPE_ESC_SEQ, FRAME_END, FRAME_END_ESC_SEQ, FRAME_START, FRAME_START_ESC_SEQ,
    };
    use std::collections::VecDeque;

    /// Hands out one scripted read per call, then idles until the wait ends.
    struct ScriptedChannel {
        reads: VecDeque<Bytes>,
        read_calls: usize,
    }

    impl ScriptedChannel {
        fn bytewise(data: &[u8]) -> Self {
            Self {
                reads: data.iter().map(|b| Bytes::copy_from_slice(&[*b])).collect(),
                read_calls: 0,
            }
        }
    }

    impl Channel for ScriptedChannel {
        async fn open(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn read(&mut self, _max: usize, wait: WaitPolicy) -> Result<Bytes, TransportError> {
            self.read_calls += 1;
            match self.reads.pop_front() {
                Some(chunk) => Ok(chunk),
                None => {
                    if let WaitPolicy::Bounded(limit) = wait {
                        tokio::time::sleep(limit.min(Duration::from_millis(50))).await;
                    }
                    Ok(Bytes::new())
                }
            }
        }

        async fn write(&mut self, _data: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn read_validates_checksum() {
        let data: Vec<u8> = [
            &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55][..],
            &FRAME_START_ESC_SEQ,
            &FRAME_END_ESC_SEQ,
            &ESCAPE_ESC_SEQ,
        ]
        .concat();

        // No checksum at all
        let raw = [&[FRAME_START][..], &data, &[FRAME_END]].concat();
        let mut transport = SerialTransport::new(ScriptedChannel::bytewise(&raw));
        let result = transport.read(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TransportError::Integrity(_))));

        let frame = Frame::new(data.clone());
        let mut transport = SerialTransport::new(ScriptedChannel::bytewise(&frame.to_bytes()));
        assert_eq!(&transport.read(Duration::from_secs(1)).await.unwrap()[..], &data[..]);
    }

    #[tokio::test]
    async fn read_times_out_over_many_reads() {
        let mut transport = SerialTransport::new(ScriptedChannel::bytewise(&[]));
        let started = Instant::now();
        let result = transport.read(Duration::from_millis(200)).await;
        assert!(matches!(result, Err(TransportError::Timeout)));
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(transport.channel().read_calls > 1);
    }

    #[tokio::test]
    async fn partial_frame_times_out() {
        let frame = Frame::new(vec![1, 2, 3]).to_bytes();
        let mut transport =
            SerialTransport::new(ScriptedChannel::bytewise(&frame[..frame.len() - 1]));
        let result = transport.read(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(TransportError::Timeout)));
    }

    async fn exchange_sizes<C: Channel>(host: C, client: C) {
        let mut host = SerialTransport::new(host);
        let mut client = SerialTransport::new(client);
        host.open().await.unwrap();
        client.open().await.unwrap();

        for len in [257usize, 1025, 1600] {
            let msg: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();

            client.write(&msg).await.unwrap();
            assert_eq!(&host.read(Duration::from_secs(1)).await.unwrap()[..], &msg[..]);

            host.write(&msg).await.unwrap();
            assert_eq!(&client.read(Duration::from_secs(1)).await.unwrap()[..], &msg[..]);
        }
    }

    #[tokio::test]
    async fn discard_input_drops_buffered_frames() {
        let (host, client) = MemoryChannel::byte_pair();
        let mut host = SerialTransport::new(host);
        let mut client = SerialTransport::new(client);
        host.open().await.unwrap();
        client.open().await.unwrap();

        client.write(&[0x01, 0x02]).await.unwrap();
        client.write(&[0x03, 0x04]).await.unwrap();
        assert_eq!(&host.read(Duration::from_secs(1)).await.unwrap()[..], &[0x01, 0x02]);

        // Second frame is already buffered
        host.discard_input().await.unwrap();
        let result = host.read(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(TransportError::Timeout)));

        client.write(&[0x05]).await.unwrap();
        assert_eq!(&host.read(Duration::from_secs(1)).await.unwrap()[..], &[0x05]);
    }

    #[tokio::test]
    async fn large_packets_over_memory_pipe() {
        let (host, client) = MemoryChannel::byte_pair();
        exchange_sizes(host, client).await;
    }

    #[tokio::test]
    async fn large_packets_over_socket_pair() {
        let (host, client) = StreamChannel::socket_pair(8192);
        exchange_sizes(host, client).await;
    }
}
