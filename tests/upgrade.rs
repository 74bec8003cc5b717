//! End-to-end upgrade sessions between the host engine and the simulated
//! client over linked channel pairs and loopback TCP.

use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use mdfu::channel::{Channel, MemoryChannel, StreamChannel, TcpChannel, WaitPolicy};
use mdfu::{
    ClientConfig, ClientInfo, Command, Error, InterTransactionDelay, Mdfu, MdfuClient, MdfuConfig,
    PacketTransport, SerialTransport, Transport, TransportError, Version, MDFU_PROTOCOL_VERSION,
};

/// Channel wrapper that counts writes and can corrupt or hold back one of them.
struct Recording<C> {
    inner: C,
    writes: Arc<AtomicUsize>,
    corrupt_write: Option<usize>,
    delayed_write: Option<(usize, Duration)>,
}

impl<C: Channel> Recording<C> {
    fn new(inner: C) -> (Self, Arc<AtomicUsize>) {
        let writes = Arc::new(AtomicUsize::new(0));
        let channel = Self {
            inner,
            writes: writes.clone(),
            corrupt_write: None,
            delayed_write: None,
        };
        (channel, writes)
    }

    fn corrupting(mut self, write_index: usize) -> Self {
        self.corrupt_write = Some(write_index);
        self
    }

    fn delaying(mut self, write_index: usize, delay: Duration) -> Self {
        self.delayed_write = Some((write_index, delay));
        self
    }
}

impl<C: Channel> Channel for Recording<C> {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.inner.open().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await
    }

    async fn read(&mut self, max_bytes: usize, wait: WaitPolicy) -> Result<Bytes, TransportError> {
        self.inner.read(max_bytes, wait).await
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let index = self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some((delayed, delay)) = self.delayed_write {
            if delayed == index {
                tokio::time::sleep(delay).await;
            }
        }
        if self.corrupt_write == Some(index) {
            let mut data = data.to_vec();
            // Flips a reserved header bit, which never yields a frame code
            data[1] ^= 0x20;
            return self.inner.write(&data).await;
        }
        self.inner.write(data).await
    }
}

fn test_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

async fn run_session<H: Transport, D: Transport + 'static>(
    host: H,
    device: D,
    client_config: ClientConfig,
    image: &[u8],
) -> (mdfu::Result<()>, Bytes) {
    let mut client = MdfuClient::new(device, client_config);
    client.start().unwrap();

    let mut mdfu = Mdfu::new(host, MdfuConfig::new()).unwrap();
    let result = mdfu.run_upgrade(image).await;

    let received = client.stop().await.unwrap();
    (result, received)
}

#[tokio::test]
async fn upgrade_over_byte_pipe() {
    let image = vec![0xFF; 512];
    let (host, device) = MemoryChannel::byte_pair();
    let (result, received) = run_session(
        SerialTransport::new(host),
        SerialTransport::new(device),
        ClientConfig::new().with_image_size(image.len()),
        &image,
    )
    .await;
    result.unwrap();
    assert_eq!(&received[..], &image[..]);
}

#[tokio::test]
async fn upgrade_over_packet_pipe() {
    let image = vec![0xFF; 512];
    let (host, device) = MemoryChannel::packet_pair();
    let (result, received) = run_session(
        PacketTransport::new(host),
        PacketTransport::new(device),
        ClientConfig::new().with_image_size(image.len()),
        &image,
    )
    .await;
    result.unwrap();
    assert_eq!(&received[..], &image[..]);
}

#[tokio::test]
async fn upgrade_over_socket_pair() {
    let image = test_image(1000);
    let (host, device) = StreamChannel::socket_pair(4096);
    let (result, received) = run_session(
        SerialTransport::new(host),
        SerialTransport::new(device),
        ClientConfig::new().with_image_size(image.len()),
        &image,
    )
    .await;
    result.unwrap();
    assert_eq!(&received[..], &image[..]);
}

#[tokio::test]
async fn upgrade_over_loopback_tcp() {
    let image = test_image(700);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ClientConfig::new().with_image_size(image.len());
    let server = tokio::spawn(async move { MdfuClient::accept(&listener, config).await });

    let host = SerialTransport::new(TcpChannel::new(addr.to_string()));
    let mut mdfu = Mdfu::new(host, MdfuConfig::new()).unwrap();
    let result = mdfu.run_upgrade(&image).await;

    let client = server.await.unwrap().unwrap();
    let received = client.stop().await.unwrap();
    result.unwrap();
    assert_eq!(&received[..], &image[..]);
}

#[tokio::test]
async fn upgrade_with_client_timeouts_and_delay() {
    let info = ClientInfo::new(MDFU_PROTOCOL_VERSION, 4, 100, Duration::from_secs(1))
        .unwrap()
        .with_timeout(Command::WriteChunk, Duration::from_millis(500))
        .with_inter_transaction_delay(InterTransactionDelay::new(0.0005).unwrap());
    let image = test_image(333);
    let (host, device) = MemoryChannel::byte_pair();
    let (result, received) = run_session(
        SerialTransport::new(host),
        SerialTransport::new(device),
        ClientConfig::new().with_client_info(info).with_image_size(image.len()),
        &image,
    )
    .await;
    result.unwrap();
    assert_eq!(&received[..], &image[..]);
}

#[tokio::test]
async fn newer_client_version_aborts_before_transfer() {
    let info = ClientInfo::new(Version::new(99, 99, 99), 1, 256, Duration::from_secs(1)).unwrap();
    let (host, device) = MemoryChannel::byte_pair();
    let (result, received) = run_session(
        SerialTransport::new(host),
        SerialTransport::new(device),
        ClientConfig::new().with_client_info(info),
        &[0xFF],
    )
    .await;
    assert!(matches!(result, Err(Error::Update(_))));
    assert!(received.is_empty());
}

#[tokio::test]
async fn rejected_image_is_update_error() {
    let (host, device) = MemoryChannel::packet_pair();
    let (result, received) = run_session(
        PacketTransport::new(host),
        PacketTransport::new(device),
        ClientConfig::new().with_image_size(1024),
        &[0xFF; 512],
    )
    .await;
    assert!(matches!(result, Err(Error::Update(_))));
    assert_eq!(received.len(), 512);
}

#[tokio::test]
async fn corrupted_command_is_resent() {
    let image = test_image(512);
    let (host, device) = MemoryChannel::byte_pair();
    let (host, host_writes) = Recording::new(host);
    // GET_CLIENT_INFO, START_TRANSFER, then the first WRITE_CHUNK
    let host = host.corrupting(2);
    let (result, received) = run_session(
        SerialTransport::new(host),
        SerialTransport::new(device),
        ClientConfig::new().with_image_size(image.len()),
        &image,
    )
    .await;
    result.unwrap();
    assert_eq!(&received[..], &image[..]);
    // 2 + 4 chunks + image state + end transfer, plus one resend
    assert_eq!(host_writes.load(Ordering::SeqCst), 9);
}

#[tokio::test]
async fn late_status_does_not_desynchronize_session() {
    let info = ClientInfo::new(MDFU_PROTOCOL_VERSION, 2, 128, Duration::from_secs(1))
        .unwrap()
        .with_timeout(Command::WriteChunk, Duration::from_millis(100));
    let image = test_image(2048);
    let (host, device) = MemoryChannel::byte_pair();
    let (host, host_writes) = Recording::new(host);
    // Status of the first WRITE_CHUNK arrives after the host gave up on it
    let (device, _) = Recording::new(device);
    let device = device.delaying(2, Duration::from_millis(150));

    let (result, received) = run_session(
        SerialTransport::new(host),
        SerialTransport::new(device),
        ClientConfig::new().with_client_info(info).with_image_size(image.len()),
        &image,
    )
    .await;
    result.unwrap();
    assert_eq!(&received[..], &image[..]);
    // 2 + 16 chunks + image state + end transfer, plus the single retry
    assert_eq!(host_writes.load(Ordering::SeqCst), 21);
}

#[tokio::test]
async fn unresponsive_client_exhausts_retries() {
    let (host, _device) = MemoryChannel::byte_pair();
    let (host, host_writes) = Recording::new(host);
    let config = MdfuConfig::new()
        .with_retries(2)
        .with_fallback_timeout(Duration::from_millis(50));
    let mut mdfu = Mdfu::new(SerialTransport::new(host), config).unwrap();

    let result = mdfu.run_upgrade(&[0xFF; 64]).await;
    assert!(matches!(result, Err(Error::Update(_))));
    assert_eq!(host_writes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_can_only_start_once() {
    let (_host, device) = MemoryChannel::byte_pair();
    let mut client = MdfuClient::new(SerialTransport::new(device), ClientConfig::new());
    client.start().unwrap();
    assert!(client.start().is_err());
    assert!(client.stop().await.unwrap().is_empty());
}
