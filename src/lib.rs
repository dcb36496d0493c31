// src/lib.rs

pub mod cli;
pub mod config;
pub mod ldap;
pub mod models;
pub mod raddb;
pub mod store;
pub mod sync;

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Ставит глобальный fmt subscriber. `RUST_LOG` важнее уровня из конфига.
///
/// Повторные вызовы игнорируются, так что вызывать можно и из тестов.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_ascii_lowercase()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if config.enable_json_output {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
