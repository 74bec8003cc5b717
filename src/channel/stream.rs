use bytes::Bytes;
use log::{debug, info};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::{Channel, WaitPolicy};
use crate::error::TransportError;

/// Channel over any tokio byte stream: TCP sockets, serial ports or an
/// in-process duplex pipe acting as a socket pair.
#[derive(Debug)]
pub struct StreamChannel<S> {
    stream: Option<S>,
}

impl<S> StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
        }
    }
}

impl StreamChannel<DuplexStream> {
    /// Two connected in-process stream ends, host first.
    pub fn socket_pair(max_buf_size: usize) -> (Self, Self) {
        let (host, client) = tokio::io::duplex(max_buf_size);
        (Self::new(host), Self::new(client))
    }
}

impl<S> Channel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.stream.is_none() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    async fn read(&mut self, max_bytes: usize, wait: WaitPolicy) -> Result<Bytes, TransportError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Bytes::new());
        };
        let mut buf = vec![0u8; max_bytes];
        match wait.run(stream.read(&mut buf)).await {
            Some(Ok(n)) => {
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(Bytes::new()),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }
}

/// Serial port that is opened on [`Channel::open`].
pub struct SerialChannel {
    path: String,
    baud_rate: u32,
    inner: Option<StreamChannel<SerialStream>>,
}

impl SerialChannel {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            inner: None,
        }
    }

    fn inner(&mut self) -> Result<&mut StreamChannel<SerialStream>, TransportError> {
        self.inner.as_mut().ok_or(TransportError::Closed)
    }
}

impl Channel for SerialChannel {
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.inner.is_some() {
            return Ok(());
        }
        info!("Opening serial port {} at {} baud", self.path, self.baud_rate);
        let port = tokio_serial::new(&self.path, self.baud_rate)
            .open_native_async()
            .map_err(|e| TransportError::Io(e.into()))?;
        self.inner = Some(StreamChannel::new(port));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut inner) = self.inner.take() {
            debug!("Closing serial port {}", self.path);
            inner.close().await?;
        }
        Ok(())
    }

    async fn read(&mut self, max_bytes: usize, wait: WaitPolicy) -> Result<Bytes, TransportError> {
        match self.inner.as_mut() {
            Some(inner) => inner.read(max_bytes, wait).await,
            None => Ok(Bytes::new()),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.inner()?.write(data).await
    }
}

/// TCP client socket that connects on [`Channel::open`].
#[derive(Debug)]
pub struct TcpChannel {
    addr: String,
    inner: Option<StreamChannel<TcpStream>>,
}

impl TcpChannel {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            inner: None,
        }
    }

    /// Wraps an already connected socket, e.g. one accepted by a listener.
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        let addr = stream.peer_addr()?.to_string();
        stream.set_nodelay(true)?;
        Ok(Self {
            addr,
            inner: Some(StreamChannel::new(stream)),
        })
    }
}

impl Channel for TcpChannel {
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.inner.is_some() {
            return Ok(());
        }
        info!("Connecting to {}", self.addr);
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        self.inner = Some(StreamChannel::new(stream));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut inner) = self.inner.take() {
            debug!("Closing connection to {}", self.addr);
            inner.close().await?;
        }
        Ok(())
    }

    async fn read(&mut self, max_bytes: usize, wait: WaitPolicy) -> Result<Bytes, TransportError> {
        match self.inner.as_mut() {
            Some(inner) => inner.read(max_bytes, wait).await,
            None => Ok(Bytes::new()),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.inner
            .as_mut()
            .ok_or(TransportError::Closed)?
            .write(data)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn socket_pair_large_messages() {
        let (mut host, mut client) = StreamChannel::socket_pair(4096);
        host.open().await.unwrap();
        client.open().await.unwrap();

        for len in [257usize, 1025, 1600] {
            let msg: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();

            client.write(&msg).await.unwrap();
            let mut received = Vec::new();
            while received.len() < len {
                let chunk = host
                    .read(len - received.len(), WaitPolicy::Bounded(Duration::from_secs(1)))
                    .await
                    .unwrap();
                assert!(!chunk.is_empty());
                received.extend_from_slice(&chunk);
            }
            assert_eq!(received, msg);
        }
    }

    #[tokio::test]
    async fn socket_pair_non_blocking() {
        let (mut host, mut client) = StreamChannel::socket_pair(64);
        assert!(client.read(5, WaitPolicy::NonBlocking).await.unwrap().is_empty());
        host.write(b"Hello").await.unwrap();
        assert_eq!(&client.read(3, WaitPolicy::NonBlocking).await.unwrap()[..], b"Hel");
        assert_eq!(&client.read(2, WaitPolicy::NonBlocking).await.unwrap()[..], b"lo");
    }

    #[tokio::test]
    async fn closed_stream() {
        let (mut host, _client) = StreamChannel::socket_pair(64);
        host.close().await.unwrap();
        assert!(host.read(5, WaitPolicy::Infinite).await.unwrap().is_empty());
        assert!(matches!(host.write(b"x").await, Err(TransportError::Closed)));
        assert!(matches!(host.open().await, Err(TransportError::Closed)));
    }
}
