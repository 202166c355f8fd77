// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Access to the fcopy character device.

use hyperv_fcopy_protocol::Status;
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;
use thiserror::Error;
use zerocopy::IntoBytes;

/// A channel carrying fcopy messages from the host and status words back.
///
/// Each call to [`read_frame`](Self::read_frame) must yield exactly one
/// message, and each message must be answered by exactly one call to
/// [`write_status`](Self::write_status) before the next read.
pub trait FcopyTransport {
    /// Reads the next message into `buf`, returning its length.
    fn read_frame(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Sends the status for the most recently read message.
    fn write_status(&mut self, status: Status) -> std::io::Result<()>;
}

/// Errors opening or registering with the fcopy device.
#[expect(missing_docs)] // self-explanatory variants
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to open the fcopy device")]
    Open(#[source] std::io::Error),
    #[error("failed to register with the fcopy device")]
    Handshake(#[source] std::io::Error),
    #[error("short handshake write: {0} bytes")]
    ShortHandshake(usize),
}

/// The fcopy character device, after a successful version handshake.
pub struct FcopyDevice {
    file: fs_err::File,
}

impl FcopyDevice {
    /// Opens the device at `path` and announces `version` to the host.
    pub fn open(path: impl AsRef<Path>, version: u32) -> Result<Self, DeviceError> {
        let file = fs_err::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map_err(DeviceError::Open)?;

        let mut device = Self { file };
        device.handshake(version)?;
        Ok(device)
    }

    fn handshake(&mut self, version: u32) -> Result<(), DeviceError> {
        let n = self
            .file
            .write(version.as_bytes())
            .map_err(DeviceError::Handshake)?;
        if n != size_of::<u32>() {
            return Err(DeviceError::ShortHandshake(n));
        }
        tracing::debug!(version, "registered with fcopy device");
        Ok(())
    }
}

impl FcopyTransport for FcopyDevice {
    fn read_frame(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.file().read_at(buf, 0)
    }

    fn write_status(&mut self, status: Status) -> std::io::Result<()> {
        let n = self.file.file().write_at(status.as_bytes(), 0)?;
        if n != size_of::<Status>() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short status write: {n} bytes"),
            ));
        }
        Ok(())
    }
}
