//! MDFU client (responder) used to exercise the host against a simulated
//! device.
//!
//! The client runs on its own tokio task and owns its transport exclusively;
//! the only thing it shares with the host is the channel between them.

use bytes::Bytes;
use log::{debug, error, info};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

mod responder;

use self::responder::Responder;
use crate::channel::TcpChannel;
use crate::error::{Error, Result};
use crate::mdfu::{ClientInfo, MDFU_PROTOCOL_VERSION};
use crate::transport::{SerialTransport, Transport};

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Capabilities reported through GET_CLIENT_INFO.
    pub client_info: ClientInfo,
    /// Image size the client expects; any size is accepted when unset.
    pub image_size: Option<usize>,
    /// Upper bound for a single transport read inside the client loop.
    pub read_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_info: ClientInfo {
                protocol_version: MDFU_PROTOCOL_VERSION,
                buffer_count: 2,
                buffer_size: 128,
                default_timeout: Some(Duration::from_secs(1)),
                timeouts: Default::default(),
                inter_transaction_delay: None,
            },
            image_size: None,
            read_timeout: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_info(mut self, client_info: ClientInfo) -> Self {
        self.client_info = client_info;
        self
    }

    pub fn with_image_size(mut self, size: usize) -> Self {
        self.image_size = Some(size);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// Handle to a client task. `start` may be called once; `stop` consumes the
/// handle, so a fresh client is needed for every run.
pub struct MdfuClient<T> {
    responder: Option<Responder<T>>,
    task: Option<JoinHandle<Responder<T>>>,
    cancel: CancellationToken,
}

impl<T: Transport + 'static> MdfuClient<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            responder: Some(Responder::new(transport, config)),
            task: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        let responder = self
            .responder
            .take()
            .ok_or_else(|| Error::Protocol("MDFU client was already started".into()))?;
        debug!("Starting MDFU client task");
        self.task = Some(tokio::spawn(responder.run(self.cancel.clone())));
        Ok(())
    }

    /// Stops the client task, waits for it to release its transport and
    /// returns the image bytes it received.
    pub async fn stop(mut self) -> Result<Bytes> {
        self.cancel.cancel();
        let responder = match self.task.take() {
            Some(task) => task.await.map_err(|e| {
                error!("MDFU client task failed: {}", e);
                Error::Protocol(format!("MDFU client task failed: {}", e))
            })?,
            None => self
                .responder
                .take()
                .ok_or_else(|| Error::Protocol("MDFU client state lost".into()))?,
        };
        Ok(responder.into_image())
    }
}

impl MdfuClient<SerialTransport<TcpChannel>> {
    /// Waits for one host to connect on `listener` and starts serving it.
    pub async fn accept(listener: &TcpListener, config: ClientConfig) -> Result<Self> {
        let (stream, peer) = listener.accept().await?;
        info!("MDFU host connected from {}", peer);
        let channel = TcpChannel::from_stream(stream)?;
        let mut client = Self::new(SerialTransport::new(channel), config);
        client.start()?;
        Ok(client)
    }
}

impl<T> Drop for MdfuClient<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
