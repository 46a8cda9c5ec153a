// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Log output. Session tasks run in a `mesh` span naming the local participant, and link tasks
//! in a nested `link` span naming the remote one, so every line says whose mesh it is about.

use anyhow::{Context, Result};
use time::macros::format_description;
use tracing::Subscriber;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::{format::FmtSpan, time::UtcTime, MakeWriter};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const QUIET_FILTER: &str = "peermesh=info";
const VERBOSE_FILTER: &str = "peermesh=debug";

/// Without `--debug` or `RUST_LOG`, only our own info lines are printed, prefixed by their spans.
pub fn initialize(debug: bool) -> Result<()> {
    let verbose = debug || std::env::var_os("RUST_LOG").is_some();

    if verbose {
        tracing::subscriber::set_global_default(verbose_subscriber()?)
    } else {
        tracing::subscriber::set_global_default(quiet_subscriber(std::io::stdout))
    }
    .context("Setting default log subscriber failed")
}

fn quiet_subscriber<W>(writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(QUIET_FILTER))
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_writer(writer)
        .finish()
}

/// `RUST_LOG` wins over the default directive. Closing spans are logged too, which shows how
/// long each link lived.
fn verbose_subscriber() -> Result<impl Subscriber + Send + Sync + 'static> {
    let directive: Directive = VERBOSE_FILTER.parse().context("Invalid default directive")?;
    let filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env()
        .context("Invalid RUST_LOG directive")?;
    let timer = UtcTime::new(format_description!("[hour]:[minute]:[second].[subsecond digits:3]Z"));
    Ok(FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_timer(timer)
        .finish())
}
