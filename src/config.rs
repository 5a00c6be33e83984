use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::{HarnessError, HarnessResult};
use crate::log_sink::LogLevel;
use crate::occurrence::MatchOptions;

pub const DEFAULT_CONFIG_FILE: &str = "harness.toml";
pub const ENV_PREFIX: &str = "AUTH_HARNESS_";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HarnessConfig {
    /// Bridge timeout used when a caller does not pass one.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Tolerance ceiling applied when a test does not choose one.
    #[serde(default = "default_max_log_level")]
    pub max_log_level: LogLevel,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
    #[serde(default)]
    pub overlapping: bool,
    #[serde(default)]
    pub echo_records: bool,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_true() -> bool {
    true
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            default_timeout_ms: default_timeout_ms(),
            max_log_level: default_max_log_level(),
            case_sensitive: true,
            overlapping: false,
            echo_records: false,
        }
    }
}

impl HarnessConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            case_sensitive: self.case_sensitive,
            overlapping: self.overlapping,
        }
    }

    pub fn to_toml_string(&self) -> HarnessResult<String> {
        toml::to_string(self).map_err(|e| HarnessError::invalid_config("toml", e.to_string()))
    }

    fn validate(self) -> HarnessResult<Self> {
        if self.default_timeout_ms == 0 {
            return Err(HarnessError::invalid_config(
                "default_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(self)
    }
}

fn figment(path: &Path, env_prefix: &str) -> Figment {
    Figment::from(Serialized::defaults(HarnessConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(env_prefix))
}

/// Loads `harness.toml` from the working directory, then `AUTH_HARNESS_*`
/// environment overrides. A missing file is not an error.
pub fn load_config() -> HarnessResult<HarnessConfig> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

pub fn load_config_from<P: AsRef<Path>>(path: P) -> HarnessResult<HarnessConfig> {
    load_config_with_prefix(path, ENV_PREFIX)
}

pub fn load_config_with_prefix<P: AsRef<Path>>(
    path: P,
    env_prefix: &str,
) -> HarnessResult<HarnessConfig> {
    let config: HarnessConfig = figment(path.as_ref(), env_prefix).extract()?;
    config.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_apply_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            load_config_with_prefix(dir.path().join("absent.toml"), "AUTH_HARNESS_T1_").unwrap();
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.default_timeout(), Duration::from_secs(10));
        assert_eq!(config.match_options(), MatchOptions::default());
    }

    #[test]
    fn test_file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "default_timeout_ms = 250").unwrap();
        writeln!(file, "max_log_level = \"Warning\"").unwrap();
        writeln!(file, "overlapping = true").unwrap();

        let config = load_config_with_prefix(&path, "AUTH_HARNESS_T2_").unwrap();
        assert_eq!(config.default_timeout_ms, 250);
        assert_eq!(config.max_log_level, LogLevel::Warning);
        assert!(config.overlapping);
        assert!(config.case_sensitive);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        std::fs::write(&path, "default_timeout_ms = 250\n").unwrap();

        std::env::set_var("AUTH_HARNESS_T3_DEFAULT_TIMEOUT_MS", "900");
        std::env::set_var("AUTH_HARNESS_T3_ECHO_RECORDS", "true");
        let config = load_config_with_prefix(&path, "AUTH_HARNESS_T3_").unwrap();
        std::env::remove_var("AUTH_HARNESS_T3_DEFAULT_TIMEOUT_MS");
        std::env::remove_var("AUTH_HARNESS_T3_ECHO_RECORDS");

        assert_eq!(config.default_timeout_ms, 900);
        assert!(config.echo_records);
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        std::fs::write(&path, "default_timeout_ms = 0\n").unwrap();

        let err = load_config_with_prefix(&path, "AUTH_HARNESS_T4_").unwrap_err();
        assert!(matches!(err, HarnessError::InvalidConfig { .. }));
    }

    #[test]
    fn test_serialized_config_round_trips_through_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        let config = HarnessConfig {
            default_timeout_ms: 1234,
            max_log_level: LogLevel::Error,
            case_sensitive: false,
            overlapping: true,
            echo_records: false,
        };
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = load_config_with_prefix(&path, "AUTH_HARNESS_T5_").unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_config_reads_working_directory_file() {
        // No harness.toml ships with the crate.
        assert!(!Path::new(DEFAULT_CONFIG_FILE).exists());
        let config = load_config().unwrap();
        assert!(config.default_timeout_ms > 0);
        assert_eq!(
            config,
            load_config_with_prefix(DEFAULT_CONFIG_FILE, ENV_PREFIX).unwrap()
        );
    }
}
