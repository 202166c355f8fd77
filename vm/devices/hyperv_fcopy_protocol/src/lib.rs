// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Protocol definitions for the Hyper-V file copy (fcopy) guest service.
//!
//! The host pushes files into the guest through a character device exposed by
//! the guest kernel. Each read from the device yields exactly one message,
//! starting with [`FcopyHeader`], and each message is answered with a single
//! [`Status`] word written back to the device.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use bitfield_struct::bitfield;
use std::fmt::Display;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::little_endian::U64 as U64LE;

/// The character device the guest kernel exposes for the fcopy service.
pub const FCOPY_DEVICE_PATH: &str = "/dev/vmbus/hv_fcopy";

/// Version 0 of the user-mode handshake.
pub const FCOPY_VERSION_0: u32 = 0;
/// Version 1 of the user-mode handshake.
pub const FCOPY_VERSION_1: u32 = 1;
/// The handshake version announced by this implementation.
pub const FCOPY_CURRENT_VERSION: u32 = FCOPY_VERSION_1;

/// Maximum length of a file or path name, in UTF-16 code units.
pub const W_MAX_PATH: usize = 260;

/// Largest payload the host sends in a single write message.
pub const DATA_FRAGMENT: usize = 6 * 1024;

/// Size of the buffer used to read a single message from the device.
///
/// This is not negotiated; it only needs to cover the largest message the
/// host emits.
pub const MAX_MESSAGE_SIZE: usize = 4096 * 2;

/// The operation carried by a message.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Operation(pub u32);

impl Operation {
    /// Begin a new file copy.
    pub const START_FILE_COPY: Self = Self(0);
    /// Write a block of data to the file being copied.
    pub const WRITE_TO_FILE: Self = Self(1);
    /// The copy finished; keep the file.
    pub const COMPLETE_FCOPY: Self = Self(2);
    /// The copy was abandoned; remove the file.
    pub const CANCEL_FCOPY: Self = Self(3);
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match *self {
            Self::START_FILE_COPY => "START_FILE_COPY",
            Self::WRITE_TO_FILE => "WRITE_TO_FILE",
            Self::COMPLETE_FCOPY => "COMPLETE_FCOPY",
            Self::CANCEL_FCOPY => "CANCEL_FCOPY",
            _ => return std::fmt::Debug::fmt(&self.0, f),
        };
        f.pad(s)
    }
}

/// The status word returned to the host for every message.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Status(pub u32);

impl Status {
    /// The operation succeeded.
    pub const SUCCESS: Self = Self(0);
    /// The operation failed (`E_FAIL`).
    pub const FAIL: Self = Self(0x80004005);
    /// The target file already exists and overwriting was not requested
    /// (`HRESULT_FROM_WIN32(ERROR_ALREADY_EXISTS)`).
    pub const ALREADY_EXISTS: Self = Self(0x80070050);
}

impl std::fmt::Debug for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match *self {
            Self::SUCCESS => "SUCCESS",
            Self::FAIL => "FAIL",
            Self::ALREADY_EXISTS => "ALREADY_EXISTS",
            _ => return write!(f, "{:#x}", self.0),
        };
        f.pad(s)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Common header for all fcopy messages.
#[repr(C)]
#[derive(Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct FcopyHeader {
    /// The operation to perform.
    pub operation: Operation,
    /// Reserved service identifier; currently unused.
    pub service_id0: [u8; 16],
    /// Reserved service identifier; currently unused.
    pub service_id1: [u8; 16],
}

/// Flags for [`StartCopyMessage`].
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct CopyFlags {
    /// Replace the target file if it already exists.
    pub over_write: bool,
    /// Create missing directories leading up to the target file.
    pub create_path: bool,
    /// Reserved; ignored.
    #[bits(30)]
    _reserved: u32,
}

/// Message starting a new file copy.
///
/// The guest driver converts both names from UTF-16 to NUL-terminated UTF-8
/// in place before the message reaches user mode, so the arrays below usually
/// hold UTF-8 bytes despite their type.
#[repr(C)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct StartCopyMessage {
    /// The message header.
    pub header: FcopyHeader,
    /// The name of the target file, NUL terminated.
    pub file_name: [u16; W_MAX_PATH],
    /// The directory of the target file, NUL terminated.
    pub path_name: [u16; W_MAX_PATH],
    /// Copy flags.
    pub copy_flags: CopyFlags,
    /// Total size of the file, in bytes. Informational only.
    pub file_size: U64LE,
}

/// Fixed portion of a message writing one block of file data. The payload
/// follows directly after this structure.
#[repr(C)]
#[derive(Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct WriteToFileHeader {
    /// The message header.
    pub header: FcopyHeader,
    /// Padding.
    pub pad: u32,
    /// File offset to write the payload at.
    pub offset: U64LE,
    /// Number of payload bytes.
    pub size: u32,
}
