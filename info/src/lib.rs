//! Build metadata shared by the server, the helpers and the logger.

pub const NAME: &str = "recordings";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const REVISION: Option<&str> = option_env!("RECORDINGS_REVISION");

pub const BUILD_TIMESTAMP: Option<&str> = option_env!("BUILD_TIMESTAMP");
