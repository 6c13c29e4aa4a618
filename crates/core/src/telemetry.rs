use tracing::Level;

use crate::config::{LogFormat, LoggingConfig};

/// Installs the global subscriber. Returns `false` when one was already
/// installed, so hosts and tests may call it more than once.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let log_level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt().with_target(false).with_max_level(log_level);

    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.is_ok()
}
