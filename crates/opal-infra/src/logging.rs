//! Logging setup, grounded on `rvoip-infra-common::logging::setup`.
//!
//! The media plane core never calls `println!`; every component logs
//! through `tracing`, and the host application decides the sink. This
//! module only offers a convenience initializer for tests and examples.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            app_name: "opal-media".to_string(),
        }
    }
}

/// Initialize a `tracing` subscriber from `LoggingConfig`. Safe to call more
/// than once; later calls are ignored (a re-init would otherwise panic).
pub fn init_logging(config: LoggingConfig) {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
