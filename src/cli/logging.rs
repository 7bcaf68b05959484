//! Logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber on stderr.
///
/// The verbosity count maps to a default filter (info, debug, trace); an
/// explicit `RUST_LOG` always wins.
pub fn init_logging(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "astrolabe=info,warn",
        1 => "astrolabe=debug,info",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(true)
        .init();
}
