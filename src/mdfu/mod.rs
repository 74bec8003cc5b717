use bytes::Bytes;
use log::{debug, error, info, warn};

use crate::error::{Error, Result, TransportError};
use crate::protocols::packet::{CmdPacket, Command, Status, StatusPacket, MAX_SEQUENCE_NUMBER};
use crate::transport::Transport;

mod client_info;
mod config;
mod types;

pub use client_info::*;
pub use config::*;
pub use types::*;

/// MDFU host protocol engine.
///
/// Owns the session state (sequence number, retry budget and the cached
/// client information) and drives one command/status exchange at a time.
/// A new upgrade session needs a new instance.
pub struct Mdfu<T> {
    transport: T,
    config: MdfuConfig,
    retries: usize,
    sequence_number: u8,
    sync_pending: bool,
    is_open: bool,
    client: Option<ClientInfo>,
}

impl<T: Transport> Mdfu<T> {
    pub fn new(transport: T, config: MdfuConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            transport,
            retries: config.retries,
            config,
            sequence_number: 0,
            sync_pending: true,
            is_open: false,
            client: None,
        })
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn set_retries(&mut self, retries: usize) {
        self.retries = retries;
    }

    pub fn client_info(&self) -> Option<&ClientInfo> {
        self.client.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub async fn open(&mut self) -> Result<()> {
        self.transport.open().await?;
        self.sequence_number = 0;
        self.sync_pending = true;
        self.is_open = true;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        self.is_open = false;
        self.transport.close().await?;
        Ok(())
    }

    fn response_timeout(&self, command: Command) -> std::time::Duration {
        self.client
            .as_ref()
            .and_then(|client| client.timeout_for(command))
            .unwrap_or(self.config.fallback_timeout)
    }

    async fn transaction(
        &mut self,
        packet: &[u8],
        timeout: std::time::Duration,
    ) -> std::result::Result<Bytes, TransportError> {
        self.transport.write(packet).await?;
        if let Some(delay) = self.client.as_ref().and_then(|c| c.inter_transaction_delay) {
            tokio::time::sleep(delay.as_duration()).await;
        }
        self.transport.read(timeout).await
    }

    /// Sends a command and waits for the matching status.
    ///
    /// Transport faults are retried with the identical packet until the
    /// retry budget runs out. A status carrying the resend bit or a foreign
    /// sequence number makes the host send the command again without
    /// advancing the sequence number. Any accepted status advances it,
    /// whatever its status code. Input left over from earlier commands is
    /// discarded once, before the first attempt.
    pub async fn send_cmd(&mut self, command: Command, data: &[u8], sync: bool) -> Result<StatusPacket> {
        if !self.is_open {
            return Err(Error::Protocol("MDFU session is not open".into()));
        }

        let sync = sync || self.sync_pending;
        let packet = CmdPacket::new(self.sequence_number, command, Bytes::copy_from_slice(data), sync)?;
        let binary = packet.to_binary();
        let timeout = self.response_timeout(command);
        let mut retries = self.retries;
        let mut resends = self.config.resend_limit;

        // Late statuses of earlier commands must not answer this one
        self.transport.discard_input().await?;

        debug!("{}: {}", command, command.description());
        debug!("Sending MDFU command packet:\n{}", packet);
        loop {
            let response = match self.transaction(&binary, timeout).await {
                Ok(response) => response,
                Err(e) => {
                    if retries == 0 {
                        return Err(Error::Protocol(format!(
                            "{} failed, no retries left: {}",
                            command, e
                        )));
                    }
                    retries -= 1;
                    warn!("{} transport error: {}, retrying ({} left)", command, e, retries);
                    continue;
                }
            };

            let status = StatusPacket::from_binary(&response)
                .map_err(|e| Error::Protocol(format!("Invalid status packet: {}", e)))?;
            debug!("Received MDFU status packet:\n{}", status);

            if status.resend || status.sequence != packet.sequence {
                if resends == 0 {
                    return Err(Error::Protocol(format!(
                        "{} failed, client keeps requesting a resend",
                        command
                    )));
                }
                resends -= 1;
                warn!(
                    "Resending {} (sequence {}, status sequence {}, resend {})",
                    command, packet.sequence, status.sequence, status.resend
                );
                continue;
            }

            self.sequence_number = (self.sequence_number + 1) % (MAX_SEQUENCE_NUMBER + 1);
            self.sync_pending = false;
            return Ok(status);
        }
    }

    /// Like [`send_cmd`](Self::send_cmd), but anything other than SUCCESS
    /// becomes a protocol error.
    async fn execute(&mut self, command: Command, data: &[u8], sync: bool) -> Result<StatusPacket> {
        let status = self.send_cmd(command, data, sync).await?;
        if status.status != Status::Success {
            Self::log_error_cause(&status);
            return Err(Error::Protocol(format!(
                "{} failed with status {}: {}",
                command,
                status.status,
                status.status.description()
            )));
        }
        Ok(status)
    }

    pub async fn get_client_info(&mut self) -> Result<ClientInfo> {
        let status = self.execute(Command::GetClientInfo, &[], true).await?;
        let client = ClientInfo::from_bytes(&status.data)?;
        info!("{}", client);
        self.client = Some(client.clone());
        Ok(client)
    }

    pub async fn start_transfer(&mut self) -> Result<()> {
        self.execute(Command::StartTransfer, &[], false).await?;
        Ok(())
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.execute(Command::WriteChunk, chunk, false).await?;
        Ok(())
    }

    pub async fn end_transfer(&mut self) -> Result<()> {
        self.execute(Command::EndTransfer, &[], false).await?;
        Ok(())
    }

    pub async fn get_image_state(&mut self) -> Result<ImageState> {
        let status = self.execute(Command::GetImageState, &[], false).await?;
        let &[state] = &status.data[..] else {
            return Err(Error::Protocol(format!(
                "Image state response must be 1 byte, got {}",
                status.data.len()
            )));
        };
        ImageState::try_from(state).map_err(|e| Error::Protocol(e.to_string()))
    }

    /// Logs the cause carried by a failed status and returns the message.
    pub fn log_error_cause(status: &StatusPacket) -> Option<String> {
        let &[cause] = &status.data[..] else {
            return None;
        };
        let message = match status.status {
            Status::CommandNotExecuted => match CmdNotExecutedCause::try_from(cause) {
                Ok(cause) => format!("Command not executed cause: {}", cause.description()),
                Err(_) => format!("Invalid command not executed cause: {:#04x}", cause),
            },
            Status::AbortFileTransfer => match FileTransferAbortCause::try_from(cause) {
                Ok(cause) => format!("File transfer abort cause: {}", cause.description()),
                Err(_) => format!("Invalid file abort cause: {:#04x}", cause),
            },
            _ => return None,
        };
        error!("{}", message);
        Some(message)
    }

    /// Runs a complete firmware upgrade. Every failure is reported as
    /// [`Error::Update`].
    pub async fn run_upgrade(&mut self, image: &[u8]) -> Result<()> {
        let result = self.upgrade(image).await;

        if self.is_open {
            if let Err(e) = self.close().await {
                warn!("Failed to close MDFU session: {}", e);
            }
        }

        match result {
            Ok(()) => Ok(()),
            Err(Error::Update(msg)) => Err(Error::Update(msg)),
            Err(e) => Err(Error::Update(e.to_string())),
        }
    }

    async fn upgrade(&mut self, image: &[u8]) -> Result<()> {
        if !self.is_open {
            self.open().await?;
        }
        info!(
            "Starting MDFU upgrade: image size {} bytes, CRC32 {:#010x}",
            image.len(),
            crc32fast::hash(image)
        );

        let client = self.get_client_info().await?;
        if client.protocol_version > self.config.max_protocol_version {
            return Err(Error::Update(format!(
                "Client protocol version {} is newer than supported version {}",
                client.protocol_version, self.config.max_protocol_version
            )));
        }

        self.start_transfer().await?;

        let chunk_size = usize::from(client.buffer_size);
        let total_chunks = image.len().div_ceil(chunk_size);
        let mut last_progress = None;
        for (i, chunk) in image.chunks(chunk_size).enumerate() {
            self.write_chunk(chunk).await?;

            let progress = ((i + 1) * 100) / total_chunks;
            if last_progress != Some(progress) {
                info!("Progress: {}%", progress);
                last_progress = Some(progress);
            }
        }

        let state = self.get_image_state().await?;
        if state != ImageState::Valid {
            return Err(Error::Update(format!(
                "Client reported image state {:?}: {}",
                state,
                state.description()
            )));
        }

        self.end_transfer().await?;
        info!("Firmware upgrade completed successfully");
        Ok(())
    }
}
