//! Logging setup for dependency-weaver
//!
//! The engine emits `tracing` events under the `dependency_weaver` target:
//! resolution steps and singleton cache hits at TRACE, construction, provider
//! calls and compilation progress at DEBUG, compile and emit summaries at INFO.
//! This module installs a subscriber for binaries and tests that want to see
//! them.
//!
//! # Features
//!
//! - `logging` - emit events (default)
//! - `logging-json` - JSON subscriber output
//! - `logging-pretty` - human-readable subscriber output
//!
//! # Example
//!
//! ```rust,ignore
//! use dependency_weaver::logging;
//!
//! logging::init();
//!
//! logging::builder()
//!     .with_level(tracing::Level::TRACE)
//!     .weaver_only()
//!     .compact()
//!     .init();
//! ```

#[cfg(feature = "logging")]
use tracing::Level;

/// Target of every event the engine emits
pub const TARGET: &str = "dependency_weaver";

/// Environment variable that overrides the builder's filter
pub const ENV_FILTER: &str = "DEPENDENCY_WEAVER_LOG";

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON lines
    #[default]
    Json,
    /// Multi-line, colored
    Pretty,
    /// Single line
    Compact,
}

/// Builder for the logging subscriber
#[cfg(feature = "logging")]
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    from_env: bool,
    with_file: bool,
    with_line_number: bool,
    with_thread_ids: bool,
}

#[cfg(feature = "logging")]
impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Json,
            target: None,
            from_env: true,
            with_file: false,
            with_line_number: false,
            with_thread_ids: false,
        }
    }
}

#[cfg(feature = "logging")]
impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn trace(self) -> Self {
        self.with_level(Level::TRACE)
    }

    pub fn debug(self) -> Self {
        self.with_level(Level::DEBUG)
    }

    pub fn info(self) -> Self {
        self.with_level(Level::INFO)
    }

    /// Only show events from `target`
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Only show events emitted by the engine
    pub fn weaver_only(self) -> Self {
        self.with_target_filter(TARGET)
    }

    /// Ignore [`ENV_FILTER`] even when it is set
    pub fn ignore_env(mut self) -> Self {
        self.from_env = false;
        self
    }

    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    pub fn with_thread_ids(mut self) -> Self {
        self.with_thread_ids = true;
        self
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// Filter directive built from the level and target settings.
    pub fn directive(&self) -> String {
        match self.target {
            Some(target) => format!("{target}={}", self.level),
            None => self.level.to_string(),
        }
    }

    /// Install the subscriber, failing if one is already set.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn try_init(self) -> crate::Result<()> {
        use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

        let filter = match self.from_env {
            true => EnvFilter::try_from_env(ENV_FILTER)
                .unwrap_or_else(|_| EnvFilter::new(self.directive())),
            false => EnvFilter::new(self.directive()),
        };

        let base = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_thread_ids(self.with_thread_ids)
            .with_target(true);
        let layer = match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => base.json().boxed(),
            // Without the json feature JSON falls back to the default format
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => base.boxed(),
            LogFormat::Pretty => base.pretty().boxed(),
            LogFormat::Compact => base.compact().boxed(),
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init()
            .map_err(|e| crate::DiError::Config(format!("logging: {e}")))
    }

    /// Install the subscriber; an already installed subscriber is kept.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// No-op without a subscriber feature.
    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn init(self) {}
}

#[cfg(feature = "logging")]
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// Install the default subscriber: JSON with `logging-json`, otherwise pretty.
#[cfg(feature = "logging")]
pub fn init() {
    #[cfg(feature = "logging-json")]
    builder().json().init();
    #[cfg(not(feature = "logging-json"))]
    builder().pretty().init();
}

/// Install a subscriber that shows only engine events.
#[cfg(feature = "logging")]
pub fn init_weaver_only() {
    builder().weaver_only().compact().init();
}

#[cfg(all(test, feature = "logging"))]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = LoggingBuilder::default();
        assert_eq!(builder.level, Level::DEBUG);
        assert_eq!(builder.format, LogFormat::Json);
        assert!(builder.from_env);
        assert_eq!(builder.directive(), "DEBUG");
    }

    #[test]
    fn test_builder_chain() {
        let builder = LoggingBuilder::new()
            .trace()
            .compact()
            .with_file()
            .ignore_env()
            .weaver_only();

        assert_eq!(builder.format, LogFormat::Compact);
        assert!(builder.with_file);
        assert!(!builder.from_env);
        assert_eq!(builder.directive(), "dependency_weaver=TRACE");
    }
}
