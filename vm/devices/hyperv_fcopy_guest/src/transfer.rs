// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The file transfer state machine.

use crate::message::StartCopy;
use crate::path::MaterializeError;
use hyperv_fcopy_protocol::Status;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;

/// An error processing a transfer operation.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The operation requires a copy in progress, and there is none.
    #[error("no file copy in progress")]
    NotTransferring,
    /// The target could not be prepared.
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    /// Writing a block failed.
    #[error("failed to write {len} bytes at offset {offset}")]
    Write {
        /// The file offset.
        offset: u64,
        /// The block length.
        len: usize,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
    /// A block was only partially written.
    #[error("short write at offset {offset}: {written} of {len} bytes")]
    ShortWrite {
        /// The file offset.
        offset: u64,
        /// The block length.
        len: usize,
        /// The number of bytes written.
        written: usize,
    },
    /// The target of a cancelled copy could not be removed.
    #[error("failed to remove cancelled file")]
    Remove(#[source] std::io::Error),
}

impl TransferError {
    /// The status reported to the host for this error.
    pub fn status(&self) -> Status {
        match self {
            Self::Materialize(err) => err.status(),
            _ => Status::FAIL,
        }
    }
}

/// A file copy in progress: the target path and the open target file.
#[derive(Debug)]
pub struct ActiveTransfer {
    path: PathBuf,
    file: File,
}

impl ActiveTransfer {
    /// The target path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one block at `offset`. Blocks may arrive in any order and may
    /// leave holes.
    fn write_block(&self, offset: u64, data: &[u8]) -> Result<(), TransferError> {
        let written = self
            .file
            .write_at(data, offset)
            .map_err(|err| TransferError::Write {
                offset,
                len: data.len(),
                err,
            })?;
        if written != data.len() {
            return Err(TransferError::ShortWrite {
                offset,
                len: data.len(),
                written,
            });
        }
        Ok(())
    }

    /// Closes the file, keeping it.
    fn complete(self) {
        tracing::info!(path = %self.path.display(), "file copy complete");
    }

    /// Closes the file and removes it.
    fn cancel(self) -> Result<(), TransferError> {
        let Self { path, file } = self;
        drop(file);
        match fs_err::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(TransferError::Remove(err)),
        }
        tracing::info!(path = %path.display(), "file copy cancelled");
        Ok(())
    }
}

/// The state of the fcopy service.
#[derive(Debug, Default)]
pub enum TransferState {
    /// No copy in progress.
    #[default]
    Idle,
    /// A copy is in progress.
    Transferring(ActiveTransfer),
}

impl TransferState {
    /// Returns the copy in progress, if any.
    pub fn active(&self) -> Option<&ActiveTransfer> {
        match self {
            Self::Idle => None,
            Self::Transferring(transfer) => Some(transfer),
        }
    }

    /// Starts a new copy.
    ///
    /// A copy that is still in progress is cancelled first.
    pub fn start(&mut self, request: &StartCopy) -> Result<(), TransferError> {
        if let Self::Transferring(previous) = std::mem::take(self) {
            tracing::warn!(
                path = %previous.path.display(),
                "new copy started before the previous one finished"
            );
            if let Err(err) = previous.cancel() {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    "failed to remove superseded file"
                );
            }
        }

        let (path, file) = crate::path::materialize(request)?;
        *self = Self::Transferring(ActiveTransfer { path, file });
        Ok(())
    }

    /// Writes a block to the copy in progress.
    ///
    /// A failed write leaves the copy in progress; the host is expected to
    /// cancel it.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), TransferError> {
        let Self::Transferring(transfer) = self else {
            return Err(TransferError::NotTransferring);
        };
        transfer.write_block(offset, data)
    }

    /// Finishes the copy in progress, keeping the file.
    pub fn complete(&mut self) -> Result<(), TransferError> {
        match std::mem::take(self) {
            Self::Idle => Err(TransferError::NotTransferring),
            Self::Transferring(transfer) => {
                transfer.complete();
                Ok(())
            }
        }
    }

    /// Abandons the copy in progress, removing the file. Does nothing when
    /// idle.
    pub fn cancel(&mut self) -> Result<(), TransferError> {
        match std::mem::take(self) {
            Self::Idle => Ok(()),
            Self::Transferring(transfer) => transfer.cancel(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperv_fcopy_protocol::CopyFlags;

    fn request(dir: &Path, file_name: &str, flags: CopyFlags) -> StartCopy {
        StartCopy {
            path_name: dir.as_os_str().to_owned(),
            file_name: file_name.into(),
            flags,
            file_size: 0,
        }
    }

    #[test]
    fn idle_rejects_write_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = TransferState::default();

        let err = state.write(0, b"X").unwrap_err();
        assert!(matches!(err, TransferError::NotTransferring));
        assert_eq!(err.status(), Status::FAIL);
        assert!(matches!(
            state.complete().unwrap_err(),
            TransferError::NotTransferring
        ));
        state.cancel().unwrap();
        state.cancel().unwrap();

        assert!(state.active().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn write_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = TransferState::default();
        state
            .start(&request(dir.path(), "a.bin", CopyFlags::new()))
            .unwrap();
        assert_eq!(state.active().unwrap().path(), dir.path().join("a.bin"));

        state.write(5, b"WORLD").unwrap();
        state.write(0, b"HELLO").unwrap();
        state.complete().unwrap();

        assert!(state.active().is_none());
        assert_eq!(
            std::fs::read(dir.path().join("a.bin")).unwrap(),
            b"HELLOWORLD"
        );
    }

    #[test]
    fn sparse_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = TransferState::default();
        state
            .start(&request(dir.path(), "sparse", CopyFlags::new()))
            .unwrap();
        state.write(4096, b"end").unwrap();
        state.complete().unwrap();

        let contents = std::fs::read(dir.path().join("sparse")).unwrap();
        assert_eq!(contents.len(), 4099);
        assert!(contents[..4096].iter().all(|&b| b == 0));
        assert_eq!(&contents[4096..], b"end");
    }

    #[test]
    fn cancel_removes_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = TransferState::default();
        state
            .start(&request(dir.path(), "a.bin", CopyFlags::new()))
            .unwrap();
        state.write(0, b"ABC").unwrap();
        state.cancel().unwrap();

        assert!(state.active().is_none());
        assert!(!dir.path().join("a.bin").exists());
    }

    #[test]
    fn cancel_tolerates_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = TransferState::default();
        state
            .start(&request(dir.path(), "a.bin", CopyFlags::new()))
            .unwrap();
        std::fs::remove_file(dir.path().join("a.bin")).unwrap();
        state.cancel().unwrap();
        assert!(state.active().is_none());
    }

    #[test]
    fn failed_start_stays_idle() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"keep").unwrap();

        let mut state = TransferState::default();
        let err = state
            .start(&request(dir.path(), "a.bin", CopyFlags::new()))
            .unwrap_err();
        assert_eq!(err.status(), Status::ALREADY_EXISTS);
        assert!(state.active().is_none());
        assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), b"keep");
    }

    #[test]
    fn start_supersedes_unfinished_copy() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = TransferState::default();
        state
            .start(&request(dir.path(), "first", CopyFlags::new()))
            .unwrap();
        state.write(0, b"partial").unwrap();

        state
            .start(&request(dir.path(), "second", CopyFlags::new()))
            .unwrap();
        assert!(!dir.path().join("first").exists());
        assert_eq!(state.active().unwrap().path(), dir.path().join("second"));

        state.write(0, b"done").unwrap();
        state.complete().unwrap();
        assert_eq!(std::fs::read(dir.path().join("second")).unwrap(), b"done");
    }
}
