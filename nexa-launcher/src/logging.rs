//! Logging bootstrap
//!
//! The level comes from the `debug_logging` setting; `RUST_LOG` still wins
//! when set.

use log::LevelFilter;

pub fn level_for(debug_logging: bool) -> LevelFilter {
    if debug_logging {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

pub fn init(debug_logging: bool) {
    let result = env_logger::Builder::new()
        .filter_level(level_for(debug_logging))
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();

    if result.is_err() {
        log::debug!("[logging] Logger already initialized");
    }
}
