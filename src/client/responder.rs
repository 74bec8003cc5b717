use bytes::{Bytes, BytesMut};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use super::ClientConfig;
use crate::error::{Error, TransportError};
use crate::mdfu::{CmdNotExecutedCause, FileTransferAbortCause, ImageState};
use crate::protocols::packet::{CmdPacket, Command, Status, StatusPacket, MAX_SEQUENCE_NUMBER};
use crate::transport::Transport;

const SEQUENCE_MASK: u8 = 0x1F;

fn status_reply(sequence: u8, status: Status, data: impl Into<Bytes>, resend: bool) -> Bytes {
    StatusPacket {
        sequence,
        status,
        resend,
        data: data.into(),
    }
    .to_binary()
}

fn not_executed(sequence: u8, cause: CmdNotExecutedCause, resend: bool) -> Bytes {
    status_reply(sequence, Status::CommandNotExecuted, vec![cause as u8], resend)
}

/// Client side protocol state, owned by the client task while it runs.
pub(super) struct Responder<T> {
    transport: T,
    config: ClientConfig,
    image: BytesMut,
    expected_sequence: Option<u8>,
    last_response: Option<(u8, Bytes)>,
}

impl<T: Transport> Responder<T> {
    pub(super) fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            image: BytesMut::new(),
            expected_sequence: None,
            last_response: None,
        }
    }

    pub(super) fn into_image(self) -> Bytes {
        self.image.freeze()
    }

    pub(super) async fn run(mut self, cancel: CancellationToken) -> Self {
        if let Err(e) = self.transport.open().await {
            error!("MDFU client failed to open transport: {}", e);
            return self;
        }
        info!("MDFU client started");

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.transport.read(self.config.read_timeout) => received,
            };

            let response = match received {
                Ok(packet) => self.handle_packet(&packet),
                Err(TransportError::Timeout) => continue,
                Err(TransportError::Integrity(reason)) => {
                    warn!("MDFU client received a corrupted frame: {}", reason);
                    not_executed(
                        self.expected_sequence.unwrap_or(0),
                        CmdNotExecutedCause::TransportIntegrityCheckError,
                        true,
                    )
                }
                Err(e) => {
                    error!("MDFU client transport failure: {}", e);
                    break;
                }
            };

            if let Err(e) = self.transport.write(&response).await {
                warn!("MDFU client failed to send status: {}", e);
            }
        }

        if let Err(e) = self.transport.close().await {
            warn!("MDFU client failed to close transport: {}", e);
        }
        info!("MDFU client stopped");
        self
    }

    fn accept(&mut self, sequence: u8, response: Bytes) -> Bytes {
        self.expected_sequence = Some((sequence + 1) % (MAX_SEQUENCE_NUMBER + 1));
        self.last_response = Some((sequence, response.clone()));
        response
    }

    fn handle_packet(&mut self, packet: &[u8]) -> Bytes {
        let command = match CmdPacket::from_binary(packet) {
            Ok(command) => command,
            Err(Error::CmdNotSupported(id)) => {
                let sequence = packet[0] & SEQUENCE_MASK;
                warn!("MDFU client received unsupported command {:#04x}", id);
                let response = status_reply(sequence, Status::CommandNotSupported, Bytes::new(), false);
                return self.accept(sequence, response);
            }
            Err(e) => {
                warn!("MDFU client received an invalid command packet: {}", e);
                let sequence = packet.first().map_or(0, |b| b & SEQUENCE_MASK);
                let response = not_executed(sequence, CmdNotExecutedCause::CommandTooShort, false);
                return self.accept(sequence, response);
            }
        };
        debug!("MDFU client received command packet:\n{}", command);

        if !command.sync {
            if let Some((sequence, response)) = &self.last_response {
                if *sequence == command.sequence {
                    debug!("Repeating status for sequence {}", sequence);
                    return response.clone();
                }
            }
            if let Some(expected) = self.expected_sequence {
                if expected != command.sequence {
                    warn!(
                        "MDFU client expected sequence {}, got {}",
                        expected, command.sequence
                    );
                    return not_executed(
                        command.sequence,
                        CmdNotExecutedCause::SequenceNumberInvalid,
                        true,
                    );
                }
            }
        }

        let response = self.execute(&command);
        self.accept(command.sequence, response)
    }

    fn execute(&mut self, command: &CmdPacket) -> Bytes {
        let sequence = command.sequence;
        match command.command {
            Command::GetClientInfo => match self.config.client_info.to_bytes() {
                Ok(info) => status_reply(sequence, Status::Success, info, false),
                Err(e) => {
                    error!("MDFU client cannot encode its client info: {}", e);
                    status_reply(
                        sequence,
                        Status::AbortFileTransfer,
                        vec![FileTransferAbortCause::GenericClientError as u8],
                        false,
                    )
                }
            },
            Command::StartTransfer => {
                self.image.clear();
                status_reply(sequence, Status::Success, Bytes::new(), false)
            }
            Command::WriteChunk => {
                if command.data.len() > usize::from(self.config.client_info.buffer_size) {
                    return not_executed(sequence, CmdNotExecutedCause::CommandTooLong, false);
                }
                self.image.extend_from_slice(&command.data);
                status_reply(sequence, Status::Success, Bytes::new(), false)
            }
            Command::GetImageState => {
                let complete = self
                    .config
                    .image_size
                    .map_or(true, |size| size == self.image.len());
                let state = if complete {
                    ImageState::Valid
                } else {
                    ImageState::Invalid
                };
                status_reply(sequence, Status::Success, vec![state as u8], false)
            }
            Command::EndTransfer => {
                info!("MDFU client received {} image bytes", self.image.len());
                status_reply(sequence, Status::Success, Bytes::new(), false)
            }
        }
    }
}
