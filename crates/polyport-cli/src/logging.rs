//! Subscriber setup for the binary

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type Base = Layered<EnvFilter, Registry>;

/// Logging flags shared by every subcommand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Also append logs to this file
    pub file: Option<PathBuf>,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
            json: false,
        }
    }
}

impl LogOptions {
    /// Filter from `RUST_LOG`, falling back to `level`
    pub fn filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level)
                .with_context(|| format!("invalid log level `{}`", self.level)),
        }
    }

    /// Install the global subscriber; logs go to stderr so stdout stays a report
    pub fn init(&self) -> Result<()> {
        let mut layers: Vec<Box<dyn Layer<Base> + Send + Sync>> = Vec::new();
        if self.json {
            layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed());
        } else {
            layers.push(fmt::layer().with_target(false).with_writer(std::io::stderr).boxed());
        }

        if let Some(path) = &self.file {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let writer = Mutex::new(file);
            if self.json {
                layers.push(fmt::layer().json().with_writer(writer).boxed());
            } else {
                layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
            }
        }

        tracing_subscriber::registry()
            .with(self.filter()?)
            .with(layers)
            .try_init()
            .context("a global logger is already installed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_level_is_reported() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let options = LogOptions {
            level: "polyport=loud".into(),
            ..LogOptions::default()
        };
        assert!(options.filter().is_err());
        assert!(LogOptions::default().filter().is_ok());
    }
}
