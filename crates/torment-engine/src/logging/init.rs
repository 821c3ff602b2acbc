use std::sync::Once;

use log::LevelFilter;

/// Where log filters come from.
///
/// An explicit `env_filter` wins, then `RUST_LOG`. With neither, the crate logs
/// at info and the wgpu internals only report warnings.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// `env_logger` directives, e.g. "torment_engine=trace,wgpu_core=warn".
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
        }
    }
}

/// Crates that log every submission at info on some backends.
const WGPU_INTERNALS: [&str; 3] = ["wgpu_core", "wgpu_hal", "naga"];

fn logger_builder(config: LoggingConfig, rust_log: Option<String>) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();

    match config.env_filter.or(rust_log) {
        Some(filter) => {
            builder.parse_filters(&filter);
        }
        None => {
            builder.filter_level(LevelFilter::Info);
            for module in WGPU_INTERNALS {
                builder.filter_module(module, LevelFilter::Warn);
            }
        }
    }

    builder.write_style(config.write_style);
    builder
}

static INIT: Once = Once::new();

/// Installs the `env_logger` backend behind the `log` facade.
///
/// Only the first call does anything. A logger installed earlier (e.g. by a
/// test harness) is left in place.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = logger_builder(config, std::env::var("RUST_LOG").ok());
        if builder.try_init().is_ok() {
            log::debug!("logging initialized");
        }
    });
}
