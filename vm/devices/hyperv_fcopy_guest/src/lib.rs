// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Guest side of the Hyper-V file copy (fcopy) integration service.
//!
//! The host copies files into the guest one at a time. It starts a copy,
//! sends the file contents as a series of blocks, and then either completes
//! or cancels the copy. Every message is answered with a single status word
//! before the next one is read.

#![cfg(target_os = "linux")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod device;
pub mod message;
pub mod path;
pub mod service;
pub mod transfer;

pub use device::FcopyDevice;
pub use device::FcopyTransport;
pub use message::NameEncoding;
pub use service::FcopyService;
pub use service::ServiceConfig;
