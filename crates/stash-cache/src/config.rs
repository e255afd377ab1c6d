//! Cache configuration and per-call options

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Environment variable prefix used by [`CacheConfig::load`] and
/// [`CacheConfig::from_env`].
pub const ENV_PREFIX: &str = "STASH";

/// Default freshness lifetime of an entry (one hour).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);

/// Default stale-while-revalidate window (disabled).
pub const DEFAULT_STALE_WHILE_REVALIDATE: Duration = Duration::ZERO;

/// Engine-level configuration.
///
/// `max_age` and `stale_while_revalidate` are the defaults applied to every
/// write whose [`CacheOptions`] leave the corresponding field unset. In
/// configuration files both are expressed in (fractional) seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default freshness lifetime
    #[serde(with = "seconds")]
    pub max_age: Duration,
    /// Default window after `max_age` in which stale values are served
    #[serde(with = "seconds")]
    pub stale_while_revalidate: Duration,
    /// Allow at most one in-flight background revalidation per key
    pub dedupe_revalidations: bool,
    /// Enable metrics collection
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            stale_while_revalidate: DEFAULT_STALE_WHILE_REVALIDATE,
            dedupe_revalidations: false,
            enable_metrics: true,
        }
    }
}

impl CacheConfig {
    /// Build a configuration from numeric seconds, rejecting negative or
    /// non-finite values.
    pub fn from_secs(max_age: f64, stale_while_revalidate: f64) -> Result<Self> {
        Ok(Self {
            max_age: duration_from_secs("max_age", max_age)?,
            stale_while_revalidate: duration_from_secs(
                "stale_while_revalidate",
                stale_while_revalidate,
            )?,
            ..Self::default()
        })
    }

    /// Load configuration from an optional file, overridden by `STASH_*`
    /// environment variables.
    ///
    /// The file format is chosen from its extension (toml, yaml, json). A
    /// missing file is not an error; unset fields keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Like [`CacheConfig::load`] with a custom environment prefix.
    pub fn load_with_prefix<P: AsRef<Path>>(path: P, env_prefix: &str) -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::from(path.as_ref().to_path_buf()).required(false))
            .add_source(Environment::with_prefix(env_prefix).try_parsing(true));

        let config = builder.build()?;
        let cache_config: CacheConfig = config.try_deserialize()?;
        tracing::debug!(
            path = %path.as_ref().display(),
            max_age_secs = cache_config.max_age.as_secs_f64(),
            stale_while_revalidate_secs = cache_config.stale_while_revalidate.as_secs_f64(),
            "Loaded cache configuration"
        );
        Ok(cache_config)
    }

    /// Read configuration from `STASH_*` environment variables only.
    pub fn from_env() -> Result<Self> {
        let config = Config::builder()
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_stale_while_revalidate(mut self, window: Duration) -> Self {
        self.stale_while_revalidate = window;
        self
    }

    pub fn with_dedupe_revalidations(mut self, enabled: bool) -> Self {
        self.dedupe_revalidations = enabled;
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    /// Merge per-call options over these defaults, field by field.
    pub fn resolve(&self, options: &CacheOptions) -> EntryPolicy {
        EntryPolicy {
            max_age: options.max_age.unwrap_or(self.max_age),
            stale_while_revalidate: options
                .stale_while_revalidate
                .unwrap_or(self.stale_while_revalidate),
        }
    }
}

/// Per-call caching options. Unset fields fall back to [`CacheConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheOptions {
    pub max_age: Option<Duration>,
    pub stale_while_revalidate: Option<Duration>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_stale_while_revalidate(mut self, window: Duration) -> Self {
        self.stale_while_revalidate = Some(window);
        self
    }
}

/// Fully resolved freshness windows, stored on every entry at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPolicy {
    pub max_age: Duration,
    pub stale_while_revalidate: Duration,
}

/// Convert seconds into a [`Duration`], rejecting negative, NaN and
/// out-of-range values.
pub fn duration_from_secs(field: &'static str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| CacheError::InvalidDuration {
        field,
        message: format!("{secs}: {e}"),
    })
}

/// Serde adapter for durations written as fractional seconds.
pub(crate) mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration {secs}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_age, Duration::from_secs(3600));
        assert_eq!(config.stale_while_revalidate, Duration::ZERO);
        assert!(!config.dedupe_revalidations);
        assert!(config.enable_metrics);
    }

    #[test]
    fn test_resolve_partial_override() {
        let config = CacheConfig::default().with_stale_while_revalidate(Duration::from_secs(30));
        let options = CacheOptions::new().with_max_age(Duration::from_secs(5));

        let policy = config.resolve(&options);
        assert_eq!(policy.max_age, Duration::from_secs(5));
        assert_eq!(policy.stale_while_revalidate, Duration::from_secs(30));
    }

    #[test]
    fn test_resolve_empty_options_uses_defaults() {
        let config = CacheConfig::default();
        let policy = config.resolve(&CacheOptions::default());
        assert_eq!(policy.max_age, DEFAULT_MAX_AGE);
        assert_eq!(policy.stale_while_revalidate, DEFAULT_STALE_WHILE_REVALIDATE);
    }

    #[test]
    fn test_from_secs_rejects_negative() {
        let err = CacheConfig::from_secs(-1.0, 0.0).unwrap_err();
        assert!(matches!(
            err,
            CacheError::InvalidDuration { field: "max_age", .. }
        ));

        let err = CacheConfig::from_secs(1.0, f64::NAN).unwrap_err();
        assert!(matches!(
            err,
            CacheError::InvalidDuration {
                field: "stale_while_revalidate",
                ..
            }
        ));
    }

    #[test]
    fn test_from_secs_fractional() {
        let config = CacheConfig::from_secs(1.5, 0.25).unwrap();
        assert_eq!(config.max_age, Duration::from_millis(1500));
        assert_eq!(config.stale_while_revalidate, Duration::from_millis(250));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "max_age = 60").unwrap();
        writeln!(file, "stale_while_revalidate = 2.5").unwrap();
        writeln!(file, "dedupe_revalidations = true").unwrap();

        let config = CacheConfig::load_with_prefix(file.path(), "STASH_TEST_TOML").unwrap();
        assert_eq!(config.max_age, Duration::from_secs(60));
        assert_eq!(config.stale_while_revalidate, Duration::from_millis(2500));
        assert!(config.dedupe_revalidations);
        assert!(config.enable_metrics);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            CacheConfig::load_with_prefix(dir.path().join("absent.toml"), "STASH_TEST_MISSING")
                .unwrap();
        assert_eq!(config, CacheConfig::default());
    }

    #[test]
    fn test_load_rejects_negative_seconds() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "max_age = -5").unwrap();

        let result = CacheConfig::load_with_prefix(file.path(), "STASH_TEST_NEGATIVE");
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "max_age = 60").unwrap();
        std::env::set_var("STASH_TEST_ENV_MAX_AGE", "120");

        let config = CacheConfig::load_with_prefix(file.path(), "STASH_TEST_ENV").unwrap();
        std::env::remove_var("STASH_TEST_ENV_MAX_AGE");

        assert_eq!(config.max_age, Duration::from_secs(120));
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = CacheConfig::default()
            .with_max_age(Duration::from_secs(10))
            .with_stale_while_revalidate(Duration::from_millis(500));

        let text = toml::to_string(&config).unwrap();
        let parsed: CacheConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    proptest! {
        #[test]
        fn prop_resolve_merges_each_field_independently(
            default_max in 0u64..10_000,
            default_swr in 0u64..10_000,
            call_max in proptest::option::of(0u64..10_000),
            call_swr in proptest::option::of(0u64..10_000),
        ) {
            let config = CacheConfig::default()
                .with_max_age(Duration::from_secs(default_max))
                .with_stale_while_revalidate(Duration::from_secs(default_swr));
            let options = CacheOptions {
                max_age: call_max.map(Duration::from_secs),
                stale_while_revalidate: call_swr.map(Duration::from_secs),
            };

            let policy = config.resolve(&options);
            prop_assert_eq!(policy.max_age.as_secs(), call_max.unwrap_or(default_max));
            prop_assert_eq!(
                policy.stale_while_revalidate.as_secs(),
                call_swr.unwrap_or(default_swr)
            );
        }
    }
}
