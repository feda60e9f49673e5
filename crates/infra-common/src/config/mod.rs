//! Configuration loading
//!
//! Two flavours of configuration live here. Typed settings (limits, timers,
//! queue sizes) are deserialized straight into a struct with [`load_config`].
//! Free-form per-module data (dialplan contexts, profiles) is exposed as a node
//! tree through the [`ConfigRegistry`] lookup interface.

mod registry;

pub use registry::{ConfigNode, ConfigRegistry, TomlConfigRegistry};

use crate::errors::Result;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Load a typed configuration from an optional TOML file plus environment
/// overrides.
///
/// Environment variables use `prefix` and a double underscore as the nesting
/// separator, e.g. `SWITCH_LIMITS__MAX_SESSIONS=500`. Missing files are not an
/// error so that defaults plus environment are enough to boot.
pub fn load_config<T: DeserializeOwned>(path: Option<&Path>, env_prefix: &str) -> Result<T> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(
            config::File::from(path)
                .format(config::FileFormat::Toml)
                .required(false),
        );
    }
    builder = builder.add_source(
        config::Environment::with_prefix(env_prefix)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );
    let settings = builder.build()?;
    Ok(settings.try_deserialize::<T>()?)
}

/// Load a typed configuration from an in-memory TOML document
pub fn load_config_str<T: DeserializeOwned>(toml: &str) -> Result<T> {
    let settings = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()?;
    Ok(settings.try_deserialize::<T>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(default)]
    struct Limits {
        max_sessions: u32,
        name: String,
    }

    impl Default for Limits {
        fn default() -> Self {
            Self {
                max_sessions: 1000,
                name: "switch".to_string(),
            }
        }
    }

    #[test]
    fn test_load_from_str_keeps_defaults() {
        let limits: Limits = load_config_str("max_sessions = 12").unwrap();
        assert_eq!(limits.max_sessions, 12);
        assert_eq!(limits.name, "switch");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "name = \"edge\"").unwrap();
        let limits: Limits = load_config(Some(file.path()), "INFRA_TEST_NOPE").unwrap();
        assert_eq!(limits.name, "edge");
        assert_eq!(limits.max_sessions, 1000);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let limits: Limits =
            load_config(Some(Path::new("/nonexistent/switch.toml")), "INFRA_TEST_NOPE").unwrap();
        assert_eq!(limits, Limits::default());
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "max_sessions = 5").unwrap();
        std::env::set_var("INFRA_TEST_ENV_MAX_SESSIONS", "77");
        let limits: Result<Limits> = load_config(Some(file.path()), "INFRA_TEST_ENV");
        std::env::remove_var("INFRA_TEST_ENV_MAX_SESSIONS");
        assert_eq!(limits.unwrap().max_sessions, 77);
    }
}
