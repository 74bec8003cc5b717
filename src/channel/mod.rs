//! Physical channel abstraction below the transport layer.
//!
//! Every channel (in-memory pipes, sockets, serial ports) offers the same
//! contract: `open`, `close`, a `read` that returns between zero and
//! `max_bytes` bytes according to a [`WaitPolicy`], and `write`.

use bytes::Bytes;
use std::future::Future;
use std::time::Duration;

mod memory;
mod stream;

pub use self::memory::MemoryChannel;
pub use self::stream::{SerialChannel, StreamChannel, TcpChannel};

use crate::error::TransportError;

/// How long a channel read may wait for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Block until data arrives or the channel is closed.
    Infinite,
    /// Return immediately, possibly with no data.
    NonBlocking,
    /// Wait at most the given duration.
    Bounded(Duration),
}

impl WaitPolicy {
    /// Runs `fut` under this policy. `None` means the wait ran out first.
    pub async fn run<F: Future>(self, fut: F) -> Option<F::Output> {
        match self {
            Self::Infinite => Some(fut.await),
            // tokio's timeout polls the inner future before the timer, so a
            // zero timeout still picks up data that is already available.
            Self::NonBlocking => tokio::time::timeout(Duration::ZERO, fut).await.ok(),
            Self::Bounded(limit) => tokio::time::timeout(limit, fut).await.ok(),
        }
    }
}

pub trait Channel: Send {
    fn open(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Reads up to `max_bytes`. An empty result means no data arrived within
    /// the wait policy or the channel is closed.
    fn read(
        &mut self,
        max_bytes: usize,
        wait: WaitPolicy,
    ) -> impl Future<Output = Result<Bytes, TransportError>> + Send;

    fn write(&mut self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;
}
