//! Logging setup shared by the server binary and integration tests.
//!
//! Mirrors the teacher's multi-layer `tracing-subscriber` setup: an
//! `EnvFilter` driven by `HSC_REGISTRY_SERVER_LOG_LEVEL` (falling back to
//! `RUST_LOG` when that isn't a valid directive), console output, and an
//! optional rolling file appender. Kept deliberately small -- no
//! OpenTelemetry layer, since this registry has no metrics/tracing-export
//! surface.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub console_enabled: bool,
    pub file_enabled: bool,
    pub log_dir: PathBuf,
    pub default_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
            file_enabled: false,
            log_dir: PathBuf::from("./logs"),
            default_level: "info".to_string(),
        }
    }
}

/// Initializes the global tracing subscriber. Returns a guard that must be
/// held for the lifetime of the process when file logging is enabled --
/// dropping it stops the background flush worker.
pub fn init(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&config.default_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = Registry::default().with(filter);

    if config.file_enabled {
        std::fs::create_dir_all(&config.log_dir)?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, "beacon-registry.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false);

        if config.console_enabled {
            registry
                .with(tracing_subscriber::fmt::layer())
                .with(file_layer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to init tracing subscriber: {e}"))?;
        } else {
            registry
                .with(file_layer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to init tracing subscriber: {e}"))?;
        }
        Ok(Some(guard))
    } else {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init tracing subscriber: {e}"))?;
        Ok(None)
    }
}
