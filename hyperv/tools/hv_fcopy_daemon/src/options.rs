// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Command line options.

#![cfg(target_os = "linux")]

use clap::Parser;
use hyperv_fcopy_guest::NameEncoding;
use std::path::PathBuf;

/// Hyper-V guest file copy daemon.
///
/// Receives files pushed by the host (for example with Copy-VMFile) and
/// writes them into the guest file system.
#[derive(Parser, Debug)]
#[clap(name = "hv_fcopy_daemon")]
pub struct Options {
    /// Stay in the foreground, don't daemonize.
    #[clap(short = 'n', long)]
    pub no_daemon: bool,

    /// Path to the fcopy character device.
    #[clap(long, default_value = hyperv_fcopy_protocol::FCOPY_DEVICE_PATH)]
    pub device: PathBuf,

    /// Decode file names as UTF-16 instead of driver-converted UTF-8.
    #[clap(long)]
    pub utf16_names: bool,
}

impl Options {
    pub fn name_encoding(&self) -> NameEncoding {
        if self.utf16_names {
            NameEncoding::Utf16
        } else {
            NameEncoding::Utf8
        }
    }
}
