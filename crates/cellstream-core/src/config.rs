//! Configuration loading and typed config structures for the pipeline.
//!
//! The canonical configuration lives in `cellstream-config.yaml` at the
//! project root. Every field has a default, so an empty file (or a missing
//! section) yields the stock pipeline: the bundled circle feed in Web
//! Mercator, level-10 cells, a rendezvous handoff, 500 ms write pacing, a
//! milestone every 10 writes, and the Dragonfly store at
//! `redis://localhost:6379`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cellstream_spatial::CoveringConfig;
use cellstream_types::{FeatureId, Srid};
use serde::Deserialize;

use crate::aggregator::AggregatorOptions;
use crate::feed::CyclePolicy;
use crate::handoff::HandoffPolicy;
use crate::ingest::ProducerOptions;

/// Environment variable overriding `feed.path`.
pub const FEED_PATH_ENV: &str = "CELLSTREAM_FEED_PATH";

/// Environment variable overriding `store.dragonfly_url`.
pub const DRAGONFLY_URL_ENV: &str = "DRAGONFLY_URL";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The values parsed but make no sense together.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level pipeline configuration.
///
/// Mirrors the structure of `cellstream-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PipelineConfig {
    /// Where readings come from and how they are stamped.
    #[serde(default)]
    pub feed: FeedConfig,

    /// S2 level band and cell cap.
    #[serde(default)]
    pub covering: CoveringConfig,

    /// Write pacing, milestones, and retries.
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Stage coupling.
    #[serde(default)]
    pub pipeline: HandoffConfig,

    /// Store backend selection.
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `CELLSTREAM_FEED_PATH` overrides `feed.path`
    /// - `DRAGONFLY_URL` overrides `store.dragonfly_url`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if the values fail validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if the values fail validation.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as unit, not as an empty map.
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its
    /// value if set.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(FEED_PATH_ENV) {
            self.feed.path = PathBuf::from(path);
        }
        if let Some(url) = lookup(DRAGONFLY_URL_ENV) {
            self.store.dragonfly_url = url;
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.covering
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.feed.feature_id.trim().is_empty() {
            return Err(ConfigError::Invalid("feed.feature_id is empty".to_owned()));
        }
        if self.feed.retry_backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "feed.retry_backoff_ms must be at least 1".to_owned(),
            ));
        }
        if self.feed.max_retry_backoff_ms < self.feed.retry_backoff_ms {
            return Err(ConfigError::Invalid(
                "feed.max_retry_backoff_ms must not be below feed.retry_backoff_ms".to_owned(),
            ));
        }
        if self.aggregator.max_write_attempts == 0 {
            return Err(ConfigError::Invalid(
                "aggregator.max_write_attempts must be at least 1".to_owned(),
            ));
        }
        if self.store.backend == StoreBackend::Dragonfly && self.store.dragonfly_url.is_empty() {
            return Err(ConfigError::Invalid(
                "store.dragonfly_url is required for the dragonfly backend".to_owned(),
            ));
        }
        Ok(())
    }

    /// Producer pass policy.
    pub fn producer_options(&self) -> ProducerOptions {
        ProducerOptions {
            cycle: CyclePolicy::from_passes(self.feed.passes),
            restart_delay: Duration::from_millis(self.feed.restart_delay_ms),
            retry_backoff: Duration::from_millis(self.feed.retry_backoff_ms),
            max_retry_backoff: Duration::from_millis(self.feed.max_retry_backoff_ms),
        }
    }

    /// Aggregator tuning.
    pub const fn aggregator_options(&self) -> AggregatorOptions {
        AggregatorOptions {
            write_pacing: Duration::from_millis(self.aggregator.write_pacing_ms),
            milestone_every: self.aggregator.milestone_every,
            max_write_attempts: self.aggregator.max_write_attempts,
        }
    }

    /// Handoff capacity policy.
    pub fn handoff_policy(&self) -> HandoffPolicy {
        HandoffPolicy::from_capacity(self.pipeline.handoff_capacity)
    }
}

/// Feed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedConfig {
    /// CSV file of `x,y,z` readings.
    #[serde(default = "default_feed_path")]
    pub path: PathBuf,

    /// EPSG code of the readings.
    #[serde(default = "default_source_srid")]
    pub source_srid: u32,

    /// Feature id stamped on every reading.
    #[serde(default = "default_feature_id")]
    pub feature_id: String,

    /// Number of passes over the feed; `0` cycles forever.
    #[serde(default)]
    pub passes: u32,

    /// Pause between passes in milliseconds.
    #[serde(default)]
    pub restart_delay_ms: u64,

    /// First pause after a pass that produced no records, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Cap on the doubling idle-pass pause, in milliseconds.
    #[serde(default = "default_max_retry_backoff_ms")]
    pub max_retry_backoff_ms: u64,
}

impl FeedConfig {
    /// The configured source reference system.
    pub const fn srid(&self) -> Srid {
        Srid(self.source_srid)
    }

    /// The configured feature id.
    pub fn feature_id(&self) -> FeatureId {
        FeatureId::new(self.feature_id.clone())
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            path: default_feed_path(),
            source_srid: default_source_srid(),
            feature_id: default_feature_id(),
            passes: 0,
            restart_delay_ms: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            max_retry_backoff_ms: default_max_retry_backoff_ms(),
        }
    }
}

/// Aggregator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AggregatorConfig {
    /// Pause after each successful write, in milliseconds.
    #[serde(default = "default_write_pacing_ms")]
    pub write_pacing_ms: u64,

    /// Successful writes between milestones.
    #[serde(default = "default_milestone_every")]
    pub milestone_every: u64,

    /// Attempts for each delete/put replace.
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            write_pacing_ms: default_write_pacing_ms(),
            milestone_every: default_milestone_every(),
            max_write_attempts: default_max_write_attempts(),
        }
    }
}

/// Stage coupling configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct HandoffConfig {
    /// Records the producer may run ahead; `0` is a rendezvous.
    #[serde(default)]
    pub handoff_capacity: usize,
}

/// Which store backend to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process map; contents are lost on exit.
    Memory,
    /// `Dragonfly` or any Redis-protocol server.
    #[default]
    Dragonfly,
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Backend to open.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL for the `Dragonfly` backend.
    #[serde(default = "default_dragonfly_url")]
    pub dragonfly_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            dragonfly_url: default_dragonfly_url(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_feed_path() -> PathBuf {
    PathBuf::from("data/circle_of_points.csv")
}

const fn default_source_srid() -> u32 {
    3857
}

fn default_feature_id() -> String {
    "endless circle".to_owned()
}

const fn default_retry_backoff_ms() -> u64 {
    100
}

const fn default_max_retry_backoff_ms() -> u64 {
    30_000
}

const fn default_write_pacing_ms() -> u64 {
    500
}

const fn default_milestone_every() -> u64 {
    10
}

const fn default_max_write_attempts() -> u32 {
    1
}

fn default_dragonfly_url() -> String {
    "redis://localhost:6379".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_describe_the_stock_pipeline() {
        let config = PipelineConfig::default();
        assert_eq!(config.feed.srid(), Srid::WEB_MERCATOR);
        assert_eq!(config.feed.feature_id().as_str(), "endless circle");
        assert_eq!(config.covering, CoveringConfig::default());
        assert_eq!(config.handoff_policy(), HandoffPolicy::Rendezvous);
        assert_eq!(config.producer_options().cycle, CyclePolicy::Endless);
        assert_eq!(config.aggregator_options(), AggregatorOptions::default());
        assert_eq!(config.store.backend, StoreBackend::Dragonfly);
        assert_eq!(config.store.dragonfly_url, "redis://localhost:6379");
        assert_eq!(
            config.producer_options().retry_backoff,
            Duration::from_millis(100)
        );
        assert_eq!(
            config.producer_options().max_retry_backoff,
            Duration::from_secs(30)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
feed:
  path: "/tmp/points.csv"
  source_srid: 4326
  feature_id: "buoy 7"
  passes: 3
  restart_delay_ms: 250
  retry_backoff_ms: 50
  max_retry_backoff_ms: 2000

covering:
  min_level: 8
  max_level: 12
  max_cells: 4

aggregator:
  write_pacing_ms: 0
  milestone_every: 100
  max_write_attempts: 2

pipeline:
  handoff_capacity: 16

store:
  backend: dragonfly
  dragonfly_url: "redis://cache:6379"

logging:
  level: "debug"
"#;
        let mut config: PipelineConfig = serde_yml::from_str(yaml).unwrap();
        config.apply_overrides(no_env);
        config.validate().unwrap();

        assert_eq!(config.feed.path, PathBuf::from("/tmp/points.csv"));
        assert_eq!(config.feed.srid(), Srid::WGS84);
        assert_eq!(config.producer_options().cycle, CyclePolicy::Passes(3));
        assert_eq!(
            config.producer_options().restart_delay,
            Duration::from_millis(250)
        );
        assert_eq!(
            config.producer_options().max_retry_backoff,
            Duration::from_secs(2)
        );
        assert_eq!(config.covering.max_level, 12);
        assert_eq!(config.aggregator_options().write_pacing, Duration::ZERO);
        assert_eq!(config.aggregator_options().max_write_attempts, 2);
        assert!(matches!(config.handoff_policy(), HandoffPolicy::Buffered(n) if n.get() == 16));
        assert_eq!(config.store.backend, StoreBackend::Dragonfly);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: PipelineConfig =
            serde_yml::from_str("aggregator:\n  milestone_every: 5\n").unwrap();
        assert_eq!(config.aggregator.milestone_every, 5);
        assert_eq!(config.aggregator.write_pacing_ms, 500);
        assert_eq!(config.feed, FeedConfig::default());
    }

    #[test]
    fn empty_document_is_default() {
        let config = PipelineConfig::parse("").unwrap();
        assert_eq!(config.aggregator, AggregatorConfig::default());
    }

    #[test]
    fn overrides_replace_feed_path_and_url() {
        let mut config = PipelineConfig::default();
        config.apply_overrides(|name| match name {
            FEED_PATH_ENV => Some("/data/other.csv".to_owned()),
            DRAGONFLY_URL_ENV => Some("redis://df:6380".to_owned()),
            _ => None,
        });
        assert_eq!(config.feed.path, PathBuf::from("/data/other.csv"));
        assert_eq!(config.store.dragonfly_url, "redis://df:6380");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = PipelineConfig::default();
        config.covering.min_level = 12;
        config.covering.max_level = 10;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = PipelineConfig::default();
        config.aggregator.max_write_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.feed.feature_id = "  ".to_owned();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.feed.retry_backoff_ms = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.feed.max_retry_backoff_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn memory_backend_is_opt_in() {
        let config = PipelineConfig::parse("store:\n  backend: memory\n").unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn unknown_backend_fails_to_parse() {
        let result = serde_yml::from_str::<PipelineConfig>("store:\n  backend: postgres\n");
        assert!(result.is_err());
    }
}
