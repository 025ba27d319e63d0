//! # Observability
//!
//! The library reports through `tracing` events; this module wires up a
//! subscriber for binaries, benches and tests that want to see them.
//!
//! ```rust,no_run
//! use upfe_core::config::FrontendConfig;
//! use upfe_core::observe::init_logging;
//!
//! let config = FrontendConfig::load().unwrap_or_default();
//! init_logging(&config.logging);
//! ```

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
