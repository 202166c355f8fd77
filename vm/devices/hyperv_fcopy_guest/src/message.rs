// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Decoding of messages read from the fcopy device.

use hyperv_fcopy_protocol::CopyFlags;
use hyperv_fcopy_protocol::DATA_FRAGMENT;
use hyperv_fcopy_protocol::FcopyHeader;
use hyperv_fcopy_protocol::Operation;
use hyperv_fcopy_protocol::StartCopyMessage;
use hyperv_fcopy_protocol::W_MAX_PATH;
use hyperv_fcopy_protocol::WriteToFileHeader;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::os::unix::ffi::OsStrExt;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

/// How file and path names are encoded in a start copy message.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum NameEncoding {
    /// NUL-terminated UTF-8, as rewritten in place by the Linux driver.
    #[default]
    Utf8,
    /// NUL-terminated UTF-16, as sent by the host.
    Utf16,
}

/// A decoded start copy request.
#[derive(Debug, Clone)]
pub struct StartCopy {
    /// Directory the file is copied into.
    pub path_name: OsString,
    /// Name of the file inside `path_name`.
    pub file_name: OsString,
    /// Copy flags. Reserved bits are ignored.
    pub flags: CopyFlags,
    /// Total file size announced by the host.
    pub file_size: u64,
}

/// A message from the host.
#[derive(Debug)]
pub enum FcopyMessage<'a> {
    /// Start copying a new file.
    StartCopy(StartCopy),
    /// Write `data` at `offset` in the current file.
    WriteBlock {
        /// Offset in the target file.
        offset: u64,
        /// The payload, bounded by the bytes actually read.
        data: &'a [u8],
    },
    /// The current file is complete.
    Complete,
    /// The current file copy is cancelled.
    Cancel,
    /// An operation this implementation does not know about.
    Unknown(Operation),
}

/// An error decoding a message.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The message is too short to hold the common header.
    #[error("message too short for header: {0} bytes")]
    TruncatedHeader(usize),
    /// The message is too short for its operation.
    #[error("truncated {0:?} message")]
    TruncatedMessage(Operation),
    /// A name field is missing its terminator.
    #[error("unterminated name")]
    UnterminatedName,
    /// A UTF-16 name is not valid UTF-16.
    #[error("invalid utf-16 name")]
    InvalidName(#[source] std::string::FromUtf16Error),
    /// A write message claims more than the maximum fragment size.
    #[error("block of {0} bytes exceeds the maximum fragment size")]
    BlockTooLarge(usize),
    /// A write message claims more payload than was read.
    #[error("block of {size} bytes but only {available} bytes present")]
    TruncatedBlock {
        /// The size claimed by the message.
        size: usize,
        /// The payload bytes present.
        available: usize,
    },
}

impl<'a> FcopyMessage<'a> {
    /// Decodes a message read from the device.
    pub fn parse(buf: &'a [u8], encoding: NameEncoding) -> Result<Self, DecodeError> {
        let (header, _) = FcopyHeader::read_from_prefix(buf)
            .map_err(|_| DecodeError::TruncatedHeader(buf.len()))?;

        let message = match header.operation {
            Operation::START_FILE_COPY => {
                let (message, _) = StartCopyMessage::read_from_prefix(buf)
                    .map_err(|_| DecodeError::TruncatedMessage(header.operation))?;
                Self::StartCopy(StartCopy {
                    path_name: decode_name(&message.path_name, encoding)?,
                    file_name: decode_name(&message.file_name, encoding)?,
                    flags: message.copy_flags,
                    file_size: message.file_size.get(),
                })
            }
            Operation::WRITE_TO_FILE => {
                let (message, payload) = WriteToFileHeader::read_from_prefix(buf)
                    .map_err(|_| DecodeError::TruncatedMessage(header.operation))?;
                let size = message.size as usize;
                if size > DATA_FRAGMENT {
                    return Err(DecodeError::BlockTooLarge(size));
                }
                let data = payload.get(..size).ok_or(DecodeError::TruncatedBlock {
                    size,
                    available: payload.len(),
                })?;
                Self::WriteBlock {
                    offset: message.offset.get(),
                    data,
                }
            }
            Operation::COMPLETE_FCOPY => Self::Complete,
            Operation::CANCEL_FCOPY => Self::Cancel,
            operation => Self::Unknown(operation),
        };
        Ok(message)
    }
}

fn decode_name(raw: &[u16; W_MAX_PATH], encoding: NameEncoding) -> Result<OsString, DecodeError> {
    match encoding {
        NameEncoding::Utf8 => {
            let bytes = raw.as_bytes();
            let len = bytes
                .iter()
                .position(|&b| b == 0)
                .ok_or(DecodeError::UnterminatedName)?;
            Ok(OsStr::from_bytes(&bytes[..len]).to_os_string())
        }
        NameEncoding::Utf16 => {
            let len = raw
                .iter()
                .position(|&c| c == 0)
                .ok_or(DecodeError::UnterminatedName)?;
            let units: Vec<u16> = raw[..len].iter().map(|&c| u16::from_le(c)).collect();
            let name = String::from_utf16(&units).map_err(DecodeError::InvalidName)?;
            Ok(name.into())
        }
    }
}
