//! Common infrastructure for the RVOIP switching core
//!
//! Shared plumbing that every switch component leans on:
//!
//! - [`logging`]: subscriber setup with a non-blocking drain worker and a
//!   handle for changing the level while the process runs
//! - [`config`]: typed configuration loading and the section/tag lookup
//!   registry modules pull their settings from
//! - [`errors`]: the error type shared by both

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{load_config, load_config_str, ConfigNode, ConfigRegistry, TomlConfigRegistry};
pub use errors::{Error, Result};
pub use logging::{log_welcome, parse_log_level, setup_logging, LogHandle, LoggingConfig};
