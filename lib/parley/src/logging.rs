pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::{Config, LoggerConfig};

/// Builds the root terminal logger. The accepted levels are the sloggers
/// severities: `trace`, `debug`, `info`, `warning`, `error`, `critical`.
pub fn init(level: &str) -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(&format!(
        "type = \"terminal\"\nlevel = \"{}\"\ndestination = \"stderr\"\n",
        level
    ))
    .expect("Invalid logging configuration");

    config.build_logger().expect("Failed to build the logger")
}
