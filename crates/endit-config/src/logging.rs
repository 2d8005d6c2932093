//! Structured logging utilities for the Endit provider.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use endit_config::log_flush_info;
//!
//! log_flush_info!(id = %id, "Flush request written");
//! log_watch_warn!(dir = %dir.display(), "Event queue overflow");
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const FLUSH: &'static str = "FLUSH";
    pub const STAGE: &'static str = "STAGE";
    pub const WATCH: &'static str = "WATCH";
    pub const DISPATCH: &'static str = "DISPATCH";
    pub const ENGINE: &'static str = "ENGINE";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

// === FLUSH logging macros ===

#[macro_export]
macro_rules! log_flush_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = "FLUSH", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_flush_info {
    ($($arg:tt)+) => {
        tracing::info!(component = "FLUSH", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_flush_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = "FLUSH", $($arg)+)
    };
}

// === STAGE logging macros ===

#[macro_export]
macro_rules! log_stage_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = "STAGE", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_stage_info {
    ($($arg:tt)+) => {
        tracing::info!(component = "STAGE", $($arg)+)
    };
}

// === WATCH logging macros ===

#[macro_export]
macro_rules! log_watch_error {
    ($($arg:tt)+) => {
        tracing::error!(component = "WATCH", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_watch_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = "WATCH", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_watch_info {
    ($($arg:tt)+) => {
        tracing::info!(component = "WATCH", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_watch_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = "WATCH", $($arg)+)
    };
}

// === DISPATCH logging macros ===

#[macro_export]
macro_rules! log_dispatch_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = "DISPATCH", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_dispatch_info {
    ($($arg:tt)+) => {
        tracing::info!(component = "DISPATCH", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_dispatch_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = "DISPATCH", $($arg)+)
    };
}

// === ENGINE logging macros ===

#[macro_export]
macro_rules! log_engine_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = "ENGINE", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_engine_info {
    ($($arg:tt)+) => {
        tracing::info!(component = "ENGINE", $($arg)+)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup; `RUST_LOG` takes precedence.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
