//! Logging setup: verbosity and config level mapped onto an `EnvFilter`.
//!
//! The `LOG` environment variable overrides both when set, which keeps
//! ad-hoc debugging possible without touching configuration.

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

pub fn init(verbosity: u8, log_level: LogLevel) {
    let default_level = match verbosity {
        0 => log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let default_directive = default_level
        .parse()
        .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into());
    let filter = EnvFilter::builder()
        .with_default_directive(default_directive)
        .with_env_var("LOG")
        .from_env_lossy();

    // Ignore double-init: tests and embedders may have installed their own
    // subscriber already.
    let _ = tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
