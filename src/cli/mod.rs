//! CLI support: logging initialization.

mod logging;

pub use logging::init_logging;
