//! Logging bootstrap.
//!
//! The platform logs through `tracing`; this module wires up a
//! `tracing-subscriber` pipeline from a serde-deserialisable
//! [`LoggingConfig`] or a hand-built [`LoggingBuilder`].  Initialisation uses
//! `try_init`, so calling it when a subscriber is already installed (tests,
//! embedding applications) is harmless.
//!
//! ```rust,ignore
//! use solder_framework::logging::LoggingBuilder;
//!
//! LoggingBuilder::new()
//!     .directive("solder_framework=debug")
//!     .init();
//! ```

use serde::Deserialize;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line, abbreviated.
    #[default]
    Compact,
    /// Single-line with full metadata.
    Full,
    /// Multi-line, human-oriented.
    Pretty,
}

/// Declarative logging settings, typically deserialised from the embedding
/// application's configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level: `trace` | `debug` | `info` | `warn` | `error`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Extra `target=level` directives.
    pub filters: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::default(),
            filters: Vec::new(),
        }
    }
}

/// Initialises logging from a config; repeated initialisation is a no-op.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

/// Builder for the tracing pipeline.
#[derive(Debug, Default)]
pub struct LoggingBuilder {
    level: Option<String>,
    directives: Vec<String>,
    format: LogFormat,
}

impl LoggingBuilder {
    /// Creates a builder with compact output at the default level.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies settings from a [`LoggingConfig`].
    pub fn from_config(config: &LoggingConfig) -> Self {
        Self {
            level: Some(config.level.clone()),
            directives: config.filters.clone(),
            format: config.format,
        }
    }

    /// Sets the base level.
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    /// Adds a `target=level` filter directive.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Sets the output format.
    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn build_filter(&self) -> EnvFilter {
        // RUST_LOG wins over the configured base level.
        let base = self.level.clone().unwrap_or_else(|| "info".into());
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base));
        for directive in &self.directives {
            if let Ok(parsed) = directive.parse() {
                filter = filter.add_directive(parsed);
            }
        }
        filter
    }

    /// Installs the subscriber, ignoring failure.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber, reporting failure.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let filter = self.build_filter();
        match self.format {
            LogFormat::Compact => tracing_subscriber::registry()
                .with(fmt::layer().compact())
                .with(filter)
                .try_init(),
            LogFormat::Full => tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(fmt::layer().pretty())
                .with(filter)
                .try_init(),
        }
    }
}
