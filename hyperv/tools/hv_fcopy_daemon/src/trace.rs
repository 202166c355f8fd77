// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`tracing`] support.

#![cfg(target_os = "linux")]

use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding a target filter, in `RUST_LOG` syntax.
const LOG_FILTER_VAR: &str = "HV_FCOPY_LOG";

/// Initialize tracing, logging to stderr.
pub fn init_tracing() -> anyhow::Result<()> {
    let targets = match std::env::var(LOG_FILTER_VAR) {
        Ok(filter) => filter
            .parse::<Targets>()
            .map_err(|err| anyhow::anyhow!("invalid {LOG_FILTER_VAR} value: {err}"))?,
        Err(_) => Targets::new().with_default(LevelFilter::INFO),
    };

    tracing_subscriber::fmt()
        .compact()
        .with_ansi(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_writer(std::io::stderr)
        .with_max_level(LevelFilter::TRACE)
        .log_internal_errors(true)
        .finish()
        .with(targets)
        .init();

    Ok(())
}
