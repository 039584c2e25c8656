use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cmd::{LogContext, LogLevel};
use crate::config::LoggingConfig;

/// Destination for `LOG` commands.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, context: Option<&LogContext>) -> Result<()>;
}

/// Forwards `LOG` commands to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

fn render_context(context: Option<&LogContext>) -> String {
    context
        .map(|map| Value::Object(map.clone()).to_string())
        .unwrap_or_default()
}

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str, context: Option<&LogContext>) -> Result<()> {
        let context = render_context(context);
        match level {
            LogLevel::Debug => tracing::debug!(context = %context, "{message}"),
            LogLevel::Info => tracing::info!(context = %context, "{message}"),
            LogLevel::Warn => tracing::warn!(context = %context, "{message}"),
            LogLevel::Error => tracing::error!(context = %context, "{message}"),
        }
        Ok(())
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init(cfg: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("logging: build filter")?;

    if let Some(path) = cfg.file.as_ref() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("logging: create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("logging: open {}", path.display()))?;
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .try_init()
            .context("logging: install subscriber")?;
        tracing::info!(path = %path.display(), "Logging initialized");
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .try_init()
        .context("logging: install subscriber")?;
    Ok(())
}
