// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The Hyper-V file copy daemon, which runs in a Linux guest and writes files
//! copied in by the host.

mod options;
mod trace;

#[cfg(not(target_os = "linux"))]
fn main() -> anyhow::Result<()> {
    anyhow::bail!("unsupported on this platform")
}

#[cfg(target_os = "linux")]
fn main() -> anyhow::Result<()> {
    use anyhow::Context;
    use clap::Parser;
    use hyperv_fcopy_guest::FcopyDevice;
    use hyperv_fcopy_guest::FcopyService;
    use hyperv_fcopy_guest::ServiceConfig;

    let options = options::Options::parse();

    if !options.no_daemon {
        // Keep stdio so that the service manager collects the log.
        nix::unistd::daemon(true, true).context("failed to daemonize")?;
    }

    trace::init_tracing()?;
    tracing::info!(pid = std::process::id(), "hv_fcopy starting");

    let device = FcopyDevice::open(
        &options.device,
        hyperv_fcopy_protocol::FCOPY_CURRENT_VERSION,
    )
    .with_context(|| format!("failed to register with {}", options.device.display()))?;

    let mut service = FcopyService::new(
        device,
        ServiceConfig {
            name_encoding: options.name_encoding(),
        },
    );
    match service.run().context("fcopy service failed")? {}
}
