//! Global logging system.

use std::{
    env,
    panic,
};
use anyhow::*;
use std::result::Result::Ok;
use backtrace::Backtrace;
use tracing_subscriber::{
    fmt::{
        self,
        time::uptime,
    },
    prelude::*,
    Registry,
    EnvFilter,
};


/// Default logging environment filter. Our crates are debug, everything else is warn.
const DEFAULT_FILTER: &'static str =
    "warn,graphics=info,tile_data=debug,mesh_data=debug,isomap=debug,isomap_demo=debug";

/// Installs a `tracing` backend writing to stdout. Accepts `RUST_LOG` env filters, which
/// apply on top of the defaults. Also routes panics and their backtraces through logging.
pub fn init_logging() -> Result<()> {
    let format = fmt::format()
        .compact()
        .with_timer(uptime())
        .with_line_number(true);
    let stdout_log = fmt::layer()
        .event_format(format);

    let mut filter = DEFAULT_FILTER.to_owned();
    if let Ok(env_filter) = env::var(EnvFilter::DEFAULT_ENV) {
        filter.push(',');
        filter.push_str(&env_filter);
    }

    let subscriber = Registry::default()
        .with(EnvFilter::new(filter))
        .with(stdout_log);
    tracing::subscriber::set_global_default(subscriber)
        .context("unable to install log subscriber")?;

    panic::set_hook(Box::new(|info| {
        error!("{}", info);
        if env::var("RUST_BACKTRACE").map(|val| val == "1").unwrap_or(true) {
            error!("{:?}", Backtrace::new());
        }
    }));
    trace!("installed custom panic hook");
    Ok(())
}
