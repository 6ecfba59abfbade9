//! Infrastructure - cold path support
//!
//! This module contains non-latency-critical code:
//! - Configuration management
//! - Logging and metrics
//! - Buffer pooling shared with the read path

pub mod config;
pub mod logging;
pub mod metrics;
pub mod pool;

pub use config::{Config, ConfigError, LoggingConfig, StreamOptions};
pub use metrics::{MetricsSnapshot, StreamMetrics};
pub use pool::{BufferPool, ObjectPool};
