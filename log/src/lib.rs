use std::env;
use std::sync::Mutex;

use slog::Drain;
use slog::Fuse;
use slog_async::Async;
use slog_json::Json;

pub use slog::{debug, error, info, o, trace, warn, Discard, Level, Logger};

/// The environment variable holding the minimum level to log.
pub const LEVEL_VARIABLE: &str = "RECORDINGS_LOG_LEVEL";

/// Creates the root JSON logger, filtered at the level named by
/// `RECORDINGS_LOG_LEVEL` (`info` if unset or unparseable).
pub fn initialize_logger() -> Logger {
    let level = env::var(LEVEL_VARIABLE)
        .ok()
        .and_then(|level| level.parse::<Level>().ok())
        .unwrap_or(Level::Info);

    initialize_logger_at(level)
}

pub fn initialize_logger_at(level: Level) -> Logger {
    let drain = Mutex::new(Json::default(std::io::stderr())).map(Fuse);
    let drain = Async::new(drain).build().filter_level(level).fuse();

    Logger::root(
        drain,
        o!("service" => info::NAME, "version" => info::VERSION, "revision" => info::REVISION, "build_timestamp" => info::BUILD_TIMESTAMP),
    )
}

/// Routes `slog-scope` through `slog-envlogger`, honouring `RUST_LOG`.
/// The guard must be kept alive for as long as logging is needed.
#[cfg(feature = "env_logging")]
pub fn initialize_global_logger() -> slog_scope::GlobalLoggerGuard {
    slog_envlogger::init().expect("initialize slog-envlogger")
}
