// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Resolution of the target file for a start copy request.

use crate::message::StartCopy;
use hyperv_fcopy_protocol::Status;
use hyperv_fcopy_protocol::W_MAX_PATH;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::fs::File;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;

const DIRECTORY_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o744;

/// An error preparing the target of a file copy.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// The request has an empty directory path.
    #[error("empty target directory")]
    EmptyPath,
    /// The request has an empty file name.
    #[error("empty file name")]
    EmptyFileName,
    /// The file name would escape its directory.
    #[error("invalid file name {0:?}")]
    InvalidFileName(OsString),
    /// A directory on the way to the target is missing and path creation was
    /// not requested.
    #[error("invalid path: {0} does not exist")]
    MissingDirectory(PathBuf),
    /// A missing directory could not be created.
    #[error("failed to create {path}")]
    CreateDirectory {
        /// The directory.
        path: PathBuf,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
    /// The existence of a path could not be determined.
    #[error("failed to look up {path}")]
    Lookup {
        /// The path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
    /// The target exists and overwriting was not requested.
    #[error("{0} already exists")]
    AlreadyExists(PathBuf),
    /// The target could not be opened.
    #[error("failed to open {path}")]
    Open {
        /// The target file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
}

impl MaterializeError {
    /// The status reported to the host for this error.
    pub fn status(&self) -> Status {
        match self {
            Self::AlreadyExists(_) => Status::ALREADY_EXISTS,
            _ => Status::FAIL,
        }
    }
}

/// Prepares the target of `request` and opens it for writing.
///
/// Missing directories are created when the request asks for it. An existing
/// target is truncated only when the request allows overwriting.
pub fn materialize(request: &StartCopy) -> Result<(PathBuf, File), MaterializeError> {
    let target = target_path(&request.path_name, &request.file_name)?;
    tracing::info!(target = %target.display(), "target file name");

    create_directories(Path::new(&request.path_name), request.flags.create_path())?;

    if exists(&target)? {
        tracing::info!(target = %target.display(), "file exists");
        if !request.flags.over_write() {
            return Err(MaterializeError::AlreadyExists(target));
        }
    }

    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(&target)
        .map_err(|err| MaterializeError::Open {
            path: target.clone(),
            err,
        })?;

    Ok((target, file))
}

/// Joins the directory and file name, limited to the size of the host's path
/// buffer.
fn target_path(path_name: &OsStr, file_name: &OsStr) -> Result<PathBuf, MaterializeError> {
    if path_name.is_empty() {
        return Err(MaterializeError::EmptyPath);
    }
    if file_name.is_empty() {
        return Err(MaterializeError::EmptyFileName);
    }
    if file_name == "." || file_name == ".." || file_name.as_bytes().contains(&b'/') {
        return Err(MaterializeError::InvalidFileName(file_name.to_owned()));
    }

    let mut target = [path_name.as_bytes(), b"/", file_name.as_bytes()].concat();
    if target.len() >= W_MAX_PATH {
        tracing::warn!(
            len = target.len(),
            "target path too long, truncating to {} bytes",
            W_MAX_PATH - 1
        );
        target.truncate(W_MAX_PATH - 1);
    }
    Ok(PathBuf::from(OsStr::from_bytes(&target)))
}

/// Walks `dir` one component at a time, making sure each prefix exists.
fn create_directories(dir: &Path, create: bool) -> Result<(), MaterializeError> {
    let mut prefix = PathBuf::new();
    if dir.as_os_str().as_bytes().starts_with(b"/") {
        prefix.push("/");
    }
    for component in dir
        .as_os_str()
        .as_bytes()
        .split(|&b| b == b'/')
        .filter(|c| !c.is_empty())
    {
        prefix.push(OsStr::from_bytes(component));
        if exists(&prefix)? {
            continue;
        }
        if !create {
            return Err(MaterializeError::MissingDirectory(prefix));
        }
        std::fs::DirBuilder::new()
            .mode(DIRECTORY_MODE)
            .create(&prefix)
            .map_err(|err| MaterializeError::CreateDirectory {
                path: prefix.clone(),
                err,
            })?;
        tracing::debug!(path = %prefix.display(), "created directory");
    }
    Ok(())
}

fn exists(path: &Path) -> Result<bool, MaterializeError> {
    path.try_exists().map_err(|err| MaterializeError::Lookup {
        path: path.to_owned(),
        err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperv_fcopy_protocol::CopyFlags;
    use std::io::Read;
    use std::os::unix::fs::PermissionsExt;

    fn request(dir: &Path, file_name: &str, flags: CopyFlags) -> StartCopy {
        StartCopy {
            path_name: dir.as_os_str().to_owned(),
            file_name: file_name.into(),
            flags,
            file_size: 0,
        }
    }

    fn mode(path: &Path) -> u32 {
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn open_in_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _file) = materialize(&request(dir.path(), "a.bin", CopyFlags::new())).unwrap();
        assert_eq!(path, dir.path().join("a.bin"));
        assert!(path.is_file());
    }

    #[test]
    fn create_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let deeper = dir.path().join("new").join("deeper");
        let (path, _file) = materialize(&request(
            &deeper,
            "x",
            CopyFlags::new().with_create_path(true),
        ))
        .unwrap();

        assert_eq!(path, deeper.join("x"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        // The process umask can only clear bits.
        assert_eq!(mode(&dir.path().join("new")) & !0o755, 0);
        assert_eq!(mode(&deeper) & !0o755, 0);
        assert_eq!(mode(&path) & !0o744, 0);
    }

    #[test]
    fn missing_directory_without_create_path() {
        let dir = tempfile::tempdir().unwrap();
        let deeper = dir.path().join("new").join("deeper");
        let err = materialize(&request(&deeper, "x", CopyFlags::new())).unwrap_err();
        assert!(matches!(err, MaterializeError::MissingDirectory(ref p) if *p == dir.path().join("new")));
        assert_eq!(err.status(), Status::FAIL);
        assert!(!dir.path().join("new").exists());
    }

    #[test]
    fn redundant_separators() {
        let dir = tempfile::tempdir().unwrap();
        let raw = format!("{}//a///b/", dir.path().display());
        let (path, _file) = materialize(&request(
            Path::new(&raw),
            "f",
            CopyFlags::new().with_create_path(true),
        ))
        .unwrap();
        assert!(dir.path().join("a/b").is_dir());
        assert_eq!(
            std::fs::canonicalize(path).unwrap(),
            std::fs::canonicalize(dir.path().join("a/b/f")).unwrap()
        );
    }

    #[test]
    fn existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.bin");
        std::fs::write(&target, b"original").unwrap();

        let err = materialize(&request(dir.path(), "a.bin", CopyFlags::new())).unwrap_err();
        assert!(matches!(err, MaterializeError::AlreadyExists(_)));
        assert_eq!(err.status(), Status::ALREADY_EXISTS);
        assert_eq!(std::fs::read(&target).unwrap(), b"original");

        let (_, mut file) = materialize(&request(
            dir.path(),
            "a.bin",
            CopyFlags::new().with_over_write(true),
        ))
        .unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();
        assert!(contents.is_empty());
        assert_eq!(std::fs::metadata(&target).unwrap().len(), 0);
    }

    #[test]
    fn rejected_names() {
        let dir = tempfile::tempdir().unwrap();
        for (name, expected) in [
            ("", "empty file name"),
            (".", "invalid file name"),
            ("..", "invalid file name"),
            ("../escape", "invalid file name"),
        ] {
            let err = materialize(&request(dir.path(), name, CopyFlags::new())).unwrap_err();
            assert!(err.to_string().starts_with(expected), "{name:?}: {err}");
            assert_eq!(err.status(), Status::FAIL);
        }

        let err = materialize(&request(Path::new(""), "x", CopyFlags::new())).unwrap_err();
        assert!(matches!(err, MaterializeError::EmptyPath));
    }

    #[test]
    fn long_target_is_truncated() {
        let name = "n".repeat(300);
        let path = target_path(OsStr::new("/tmp"), OsStr::new(&name)).unwrap();
        assert_eq!(path.as_os_str().len(), W_MAX_PATH - 1);
        assert!(path.starts_with("/tmp"));
    }
}
