// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The fcopy message loop.

use crate::device::FcopyTransport;
use crate::message::FcopyMessage;
use crate::message::NameEncoding;
use crate::transfer::TransferState;
use hyperv_fcopy_protocol::MAX_MESSAGE_SIZE;
use hyperv_fcopy_protocol::Status;
use std::convert::Infallible;
use thiserror::Error;

/// Configuration for [`FcopyService`].
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// The encoding of names in start copy messages.
    pub name_encoding: NameEncoding,
}

/// A fatal error talking to the host.
#[expect(missing_docs)] // self-explanatory variants
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to read message from the host")]
    Read(#[source] std::io::Error),
    #[error("failed to write status to the host")]
    WriteStatus(#[source] std::io::Error),
}

/// Processes fcopy messages from the host, one at a time.
pub struct FcopyService<T> {
    transport: T,
    config: ServiceConfig,
    state: TransferState,
    buf: Vec<u8>,
}

impl<T: FcopyTransport> FcopyService<T> {
    /// Returns a new service reading messages from `transport`.
    pub fn new(transport: T, config: ServiceConfig) -> Self {
        Self {
            transport,
            config,
            state: TransferState::Idle,
            buf: vec![0; MAX_MESSAGE_SIZE],
        }
    }

    /// The current transfer state.
    pub fn state(&self) -> &TransferState {
        &self.state
    }

    /// Processes messages until the transport fails.
    pub fn run(&mut self) -> Result<Infallible, ServiceError> {
        loop {
            self.process_next()?;
        }
    }

    /// Reads one message, handles it, and replies with its status.
    pub fn process_next(&mut self) -> Result<Status, ServiceError> {
        let n = self
            .transport
            .read_frame(&mut self.buf)
            .map_err(ServiceError::Read)?;
        let message = &self.buf[..n.min(self.buf.len())];
        let status = handle_message(&mut self.state, message, self.config.name_encoding);
        self.transport
            .write_status(status)
            .map_err(ServiceError::WriteStatus)?;
        Ok(status)
    }
}

fn handle_message(state: &mut TransferState, buf: &[u8], encoding: NameEncoding) -> Status {
    let message = match FcopyMessage::parse(buf, encoding) {
        Ok(message) => message,
        Err(err) => {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                "invalid message from host"
            );
            return Status::FAIL;
        }
    };

    let result = match message {
        FcopyMessage::StartCopy(request) => {
            tracing::debug!(
                path_name = ?request.path_name,
                file_name = ?request.file_name,
                flags = ?request.flags,
                file_size = request.file_size,
                "start file copy"
            );
            state.start(&request)
        }
        FcopyMessage::WriteBlock { offset, data } => state.write(offset, data),
        FcopyMessage::Complete => state.complete(),
        FcopyMessage::Cancel => state.cancel(),
        FcopyMessage::Unknown(operation) => {
            tracing::error!(?operation, "unknown operation");
            return Status::FAIL;
        }
    };

    match result {
        Ok(()) => Status::SUCCESS,
        Err(err) => {
            let status = err.status();
            if status == Status::ALREADY_EXISTS {
                tracing::info!(error = &err as &dyn std::error::Error, "not overwriting");
            } else {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    %status,
                    "fcopy operation failed"
                );
            }
            status
        }
    }
}
