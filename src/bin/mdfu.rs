//! Command line host for MDFU firmware updates.

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::net::TcpListener;
use tracing_subscriber::filter::LevelFilter;

use mdfu::channel::{MemoryChannel, SerialChannel, TcpChannel};
use mdfu::{
    image, read_client_info, update_firmware, ClientConfig, ClientInfo, Error, MdfuClient,
    MdfuConfig, PacketTransport, SerialTransport, Transport, MDFU_PROTOCOL_VERSION,
};

/// MDFU host - update firmware on MDFU capable devices
#[derive(Parser, Debug)]
#[command(name = "mdfu", version, about, propagate_version = true)]
struct Cli {
    /// Log level (off, error, warn, info, debug, trace)
    #[arg(short, long, global = true, default_value = "info")]
    verbose: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transfer a firmware image to a device
    Update(UpdateArgs),

    /// Print the capabilities reported by a device
    ClientInfo(ConnectionArgs),

    /// Run an update against a simulated client
    Simulate(SimulateArgs),

    /// Serve a simulated client to one host connecting over TCP
    Client(ClientArgs),
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Serial port of the device
    #[arg(long, required_unless_present = "tcp", conflicts_with = "tcp")]
    serial: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = 115200)]
    baudrate: u32,

    /// Network address (host:port) of the device
    #[arg(long)]
    tcp: Option<String>,

    /// Transport retries per command
    #[arg(long, default_value_t = 5)]
    retries: usize,
}

impl ConnectionArgs {
    fn config(&self) -> MdfuConfig {
        MdfuConfig::new().with_retries(self.retries)
    }
}

#[derive(Args, Debug)]
struct UpdateArgs {
    /// Firmware image (binary, or Intel HEX with .hex extension)
    #[arg(long)]
    image: PathBuf,

    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mac {
    /// Byte-stream channel with framing
    Bytes,
    /// Packet channel without framing
    Packet,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Firmware image (binary, or Intel HEX with .hex extension)
    #[arg(long)]
    image: PathBuf,

    /// Channel type between host and simulated client
    #[arg(long, value_enum, default_value_t = Mac::Bytes)]
    mac: Mac,
}

#[derive(Args, Debug)]
struct ClientArgs {
    /// Address (host:port) to accept the host connection on
    #[arg(long, default_value = "127.0.0.1:5559")]
    listen: String,

    /// Size of one client buffer in bytes
    #[arg(long, default_value_t = 128)]
    buffer_size: u16,

    /// Number of client buffers
    #[arg(long, default_value_t = 2)]
    buffer_count: u8,

    /// Expected image size; any size is accepted when omitted
    #[arg(long)]
    image_size: Option<usize>,

    /// Write the received image to this file on exit
    #[arg(long)]
    output: Option<PathBuf>,
}

fn init_logging(level: &str) {
    let level = LevelFilter::from_str(level).unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

async fn update(args: UpdateArgs) -> mdfu::Result<()> {
    let image = image::load(&args.image).await?;
    let config = args.connection.config();
    match (args.connection.serial, args.connection.tcp) {
        (Some(port), _) => {
            let channel = SerialChannel::new(port, args.connection.baudrate);
            update_firmware(SerialTransport::new(channel), &image, config).await
        }
        (None, Some(addr)) => {
            update_firmware(SerialTransport::new(TcpChannel::new(addr)), &image, config).await
        }
        (None, None) => Err(Error::Configuration("No connection given".into())),
    }
}

async fn client_info(args: ConnectionArgs) -> mdfu::Result<()> {
    let config = args.config();
    let info = match (args.serial, args.tcp) {
        (Some(port), _) => {
            let channel = SerialChannel::new(port, args.baudrate);
            read_client_info(SerialTransport::new(channel), config).await?
        }
        (None, Some(addr)) => {
            read_client_info(SerialTransport::new(TcpChannel::new(addr)), config).await?
        }
        (None, None) => return Err(Error::Configuration("No connection given".into())),
    };
    println!("{}", info);
    Ok(())
}

async fn simulate_with<T: Transport + 'static>(host: T, device: T, image: &[u8]) -> mdfu::Result<()> {
    let mut client = MdfuClient::new(device, ClientConfig::new().with_image_size(image.len()));
    client.start()?;
    let result = update_firmware(host, image, MdfuConfig::new()).await;
    let received = client.stop().await?;
    result?;

    if received[..] != image[..] {
        return Err(Error::Update(
            "Simulated client received a different image".into(),
        ));
    }
    println!("Simulated client received {} bytes", received.len());
    Ok(())
}

async fn simulate(args: SimulateArgs) -> mdfu::Result<()> {
    let image = image::load(&args.image).await?;
    match args.mac {
        Mac::Bytes => {
            let (host, device) = MemoryChannel::byte_pair();
            simulate_with(SerialTransport::new(host), SerialTransport::new(device), &image).await
        }
        Mac::Packet => {
            let (host, device) = MemoryChannel::packet_pair();
            simulate_with(PacketTransport::new(host), PacketTransport::new(device), &image).await
        }
    }
}

async fn client(args: ClientArgs) -> mdfu::Result<()> {
    let info = ClientInfo::new(
        MDFU_PROTOCOL_VERSION,
        args.buffer_count,
        args.buffer_size,
        Duration::from_secs(1),
    )?;
    let mut config = ClientConfig::new().with_client_info(info);
    if let Some(size) = args.image_size {
        config = config.with_image_size(size);
    }

    let listener = TcpListener::bind(&args.listen).await?;
    println!("Waiting for MDFU host on {}", listener.local_addr()?);
    let client = MdfuClient::accept(&listener, config).await?;

    println!("Serving MDFU host, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    let received = client.stop().await?;
    println!("Client received {} bytes", received.len());

    if let Some(path) = args.output {
        tokio::fs::write(&path, &received).await?;
        println!("Image written to {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.verbose);

    let result = match cli.command {
        Commands::Update(args) => update(args).await,
        Commands::ClientInfo(args) => client_info(args).await,
        Commands::Simulate(args) => simulate(args).await,
        Commands::Client(args) => client(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("Operation failed with {}", e);
            ExitCode::FAILURE
        }
    }
}
