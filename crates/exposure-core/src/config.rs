//! TOML-based remote configuration snapshot.
//!
//! Holds every numeric parameter the decision core reads:
//! - risk thresholds and reminder periods
//! - analytics sampling rates
//! - dummy traffic means, window durations and continuation probabilities
//! - the target size of ingestion requests
//!
//! A local copy lives at `~/.config/exposure/config.toml`. Keys accept both
//! the field names and the names used by the remote configuration service.
//! From the core's point of view the snapshot is read-only: a refresh swaps
//! the whole value through [`ConfigProvider::replace`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::calendar::MAX_CONFIGURED_SECS;
use crate::error::ConfigError;
use crate::storage::data_dir;

/// Backend endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_ingestion_url")]
    pub ingestion: String,
    #[serde(default = "default_analytics_url")]
    pub analytics: String,
}

/// Configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Minimum `total_risk_score` for an exposure to count as a close contact.
    #[serde(default = "default_minimum_risk_score")]
    pub exposure_info_minimum_risk_score: i32,

    /// Repeat interval (s) of the reminder while in the risk state.
    #[serde(default = "default_day")]
    pub risk_reminder_notification_period: f64,

    /// Minimum interval (s) between two "service not active" notifications.
    #[serde(default = "default_day")]
    pub service_not_active_notification_period: f64,

    /// Interval (s) between two background detections.
    #[serde(default = "default_exposure_detection_period")]
    pub exposure_detection_period: f64,

    /// Maximum age (s) of the last detection before a foreground session forces one.
    #[serde(default = "default_day")]
    pub maximum_exposure_detection_waiting_time: f64,

    #[serde(default = "default_with_exposure_rate")]
    pub operational_info_with_exposure_sampling_rate: f64,

    #[serde(default = "default_without_exposure_rate")]
    pub operational_info_without_exposure_sampling_rate: f64,

    /// Mean (s) of the delay before the analytics dummy window opens.
    #[serde(
        default = "default_dummy_analytics_delay",
        alias = "dummy_analytics_waiting_time"
    )]
    pub dummy_analytics_mean_stochastic_delay: f64,

    /// Mean (s) between two requests of a dummy ingestion sequence.
    #[serde(
        default = "default_request_waiting_time",
        alias = "dummy_teks_average_request_waiting_time"
    )]
    pub dummy_ingestion_average_request_waiting_time: f64,

    /// Chance of sending another dummy request after the i-th one.
    #[serde(
        default = "default_request_probabilities",
        alias = "dummy_teks_request_probabilities"
    )]
    pub dummy_ingestion_request_probabilities: Vec<f64>,

    /// Mean (s) of the delay before the dummy ingestion window opens.
    #[serde(
        default = "default_ingestion_delay",
        alias = "dummy_teks_average_opportunity_waiting_time"
    )]
    pub dummy_ingestion_mean_stochastic_delay: f64,

    #[serde(
        default = "default_ingestion_window_duration",
        alias = "dummy_teks_window_duration"
    )]
    pub dummy_ingestion_window_duration: f64,

    /// Mean (s) from session start to the first dummy request.
    #[serde(
        default = "default_start_up_delay",
        alias = "dummy_teks_average_start_waiting_time"
    )]
    pub dummy_ingestion_average_start_up_delay: f64,

    /// Bytes every ingestion request (genuine or dummy) is padded to.
    #[serde(default = "default_target_size", alias = "teks_packet_size")]
    pub ingestion_request_target_size: usize,

    /// Upper bound (s) on a configuration refresh before a detection proceeds anyway.
    #[serde(default = "default_refresh_timeout")]
    pub configuration_refresh_timeout: f64,

    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

fn default_minimum_risk_score() -> i32 {
    20
}
fn default_day() -> f64 {
    86_400.0
}
fn default_exposure_detection_period() -> f64 {
    14_400.0
}
fn default_with_exposure_rate() -> f64 {
    1.0
}
fn default_without_exposure_rate() -> f64 {
    0.6
}
fn default_dummy_analytics_delay() -> f64 {
    2_592_000.0
}
fn default_request_waiting_time() -> f64 {
    10.0
}
fn default_request_probabilities() -> Vec<f64> {
    vec![0.95, 0.1]
}
fn default_ingestion_delay() -> f64 {
    5_184_000.0
}
fn default_ingestion_window_duration() -> f64 {
    1_209_600.0
}
fn default_start_up_delay() -> f64 {
    15.0
}
fn default_target_size() -> usize {
    110_000
}
fn default_refresh_timeout() -> f64 {
    10.0
}
fn default_ingestion_url() -> String {
    "https://upload.immuni.gov.it".into()
}
fn default_analytics_url() -> String {
    "https://analytics.immuni.gov.it".into()
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            ingestion: default_ingestion_url(),
            analytics: default_analytics_url(),
        }
    }
}

impl EndpointsConfig {
    pub fn ingestion_url(&self) -> Result<url::Url, ConfigError> {
        parse_endpoint("endpoints.ingestion", &self.ingestion)
    }

    pub fn analytics_url(&self) -> Result<url::Url, ConfigError> {
        parse_endpoint("endpoints.analytics", &self.analytics)
    }
}

fn parse_endpoint(key: &str, value: &str) -> Result<url::Url, ConfigError> {
    url::Url::parse(value).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            exposure_info_minimum_risk_score: default_minimum_risk_score(),
            risk_reminder_notification_period: default_day(),
            service_not_active_notification_period: default_day(),
            exposure_detection_period: default_exposure_detection_period(),
            maximum_exposure_detection_waiting_time: default_day(),
            operational_info_with_exposure_sampling_rate: default_with_exposure_rate(),
            operational_info_without_exposure_sampling_rate: default_without_exposure_rate(),
            dummy_analytics_mean_stochastic_delay: default_dummy_analytics_delay(),
            dummy_ingestion_average_request_waiting_time: default_request_waiting_time(),
            dummy_ingestion_request_probabilities: default_request_probabilities(),
            dummy_ingestion_mean_stochastic_delay: default_ingestion_delay(),
            dummy_ingestion_window_duration: default_ingestion_window_duration(),
            dummy_ingestion_average_start_up_delay: default_start_up_delay(),
            ingestion_request_target_size: default_target_size(),
            configuration_refresh_timeout: default_refresh_timeout(),
            endpoints: EndpointsConfig::default(),
        }
    }
}

impl Configuration {
    /// Continuation probability after the `index`-th dummy request, clamped to
    /// the last element once the index runs past the list.
    ///
    /// # Panics
    /// If the probability list is empty. [`Configuration::validate`] rejects
    /// such a configuration, so reaching this is a programming error.
    pub fn dummy_request_probability(&self, index: usize) -> f64 {
        let probabilities = &self.dummy_ingestion_request_probabilities;
        probabilities
            .get(index)
            .or_else(|| probabilities.last())
            .copied()
            .unwrap_or_else(|| panic!("no dummy ingestion request probabilities configured"))
    }

    /// Check the invariants the decision core relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rates = [
            (
                "operational_info_with_exposure_sampling_rate",
                self.operational_info_with_exposure_sampling_rate,
            ),
            (
                "operational_info_without_exposure_sampling_rate",
                self.operational_info_without_exposure_sampling_rate,
            ),
        ];
        for (key, rate) in rates {
            if !(0.0..=1.0).contains(&rate) {
                return Err(invalid(key, format!("{rate} is not a probability")));
            }
        }

        if self.dummy_ingestion_request_probabilities.is_empty() {
            return Err(invalid(
                "dummy_ingestion_request_probabilities",
                "at least one probability is required".into(),
            ));
        }
        if let Some(p) = self
            .dummy_ingestion_request_probabilities
            .iter()
            .find(|p| !(0.0..=1.0).contains(*p))
        {
            return Err(invalid(
                "dummy_ingestion_request_probabilities",
                format!("{p} is not a probability"),
            ));
        }

        let durations = [
            ("risk_reminder_notification_period", self.risk_reminder_notification_period),
            (
                "service_not_active_notification_period",
                self.service_not_active_notification_period,
            ),
            ("exposure_detection_period", self.exposure_detection_period),
            (
                "maximum_exposure_detection_waiting_time",
                self.maximum_exposure_detection_waiting_time,
            ),
            (
                "dummy_analytics_mean_stochastic_delay",
                self.dummy_analytics_mean_stochastic_delay,
            ),
            (
                "dummy_ingestion_average_request_waiting_time",
                self.dummy_ingestion_average_request_waiting_time,
            ),
            (
                "dummy_ingestion_mean_stochastic_delay",
                self.dummy_ingestion_mean_stochastic_delay,
            ),
            ("dummy_ingestion_window_duration", self.dummy_ingestion_window_duration),
            (
                "dummy_ingestion_average_start_up_delay",
                self.dummy_ingestion_average_start_up_delay,
            ),
            ("configuration_refresh_timeout", self.configuration_refresh_timeout),
        ];
        for (key, secs) in durations {
            if !secs.is_finite() || secs < 0.0 {
                return Err(invalid(key, format!("{secs} is not a valid duration")));
            }
            if secs > MAX_CONFIGURED_SECS {
                return Err(invalid(
                    key,
                    format!("{secs} exceeds the maximum of {MAX_CONFIGURED_SECS} seconds"),
                ));
            }
        }

        if self.ingestion_request_target_size == 0 {
            return Err(invalid("ingestion_request_target_size", "must be positive".into()));
        }

        self.endpoints.ingestion_url()?;
        self.endpoints.analytics_url()?;

        Ok(())
    }

    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let mut parts = key.split('.').peekable();
        if parts.peek().map_or(true, |p| p.is_empty()) {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|e| invalid(key, e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| {
                                    invalid(key, format!("cannot parse '{value}' as number"))
                                })?
                        } else {
                            return Err(invalid(key, format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(key, e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        }

        Err(ConfigError::UnknownKey(key.to_string()))
    }

    /// Default location: `<data dir>/config.toml`.
    pub fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("config.toml"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from the default location, writing defaults if the file is missing.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from `path`, writing defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed or fails
    /// validation, or if the default cannot be written.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg = Self::from_toml_str(&content)?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// Parse the JSON document served by the remote configuration service.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Return a copy with `key` set to `value`. The result is validated; `self`
    /// is never patched in place.
    pub fn with_value(&self, key: &str, value: &str) -> Result<Self, ConfigError> {
        let mut json =
            serde_json::to_value(self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Self =
            serde_json::from_value(json).map_err(|e| invalid(key, e.to_string()))?;
        updated.validate()?;
        Ok(updated)
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}

fn invalid(key: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    }
}

/// Atomically replaceable configuration snapshot shared across tasks.
#[derive(Debug)]
pub struct ConfigProvider {
    current: RwLock<Arc<Configuration>>,
}

impl ConfigProvider {
    pub fn new(config: Configuration) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// The snapshot in effect right now. Holders keep their copy even if a
    /// refresh lands meanwhile.
    pub fn snapshot(&self) -> Arc<Configuration> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a whole new configuration after validating it.
    pub fn replace(&self, config: Configuration) -> Result<(), ConfigError> {
        config.validate()?;
        let next = Arc::new(config);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        tracing::info!("configuration replaced");
        Ok(())
    }
}

/// Where fresh configurations come from.
#[async_trait]
pub trait ConfigurationSource: Send + Sync {
    async fn fetch(&self) -> Result<Configuration, ConfigError>;
}

/// Reads the local TOML file on every fetch.
#[derive(Debug, Clone)]
pub struct FileConfigurationSource {
    pub path: PathBuf,
}

#[async_trait]
impl ConfigurationSource for FileConfigurationSource {
    async fn fetch(&self) -> Result<Configuration, ConfigError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ConfigError::FetchFailed(format!("{}: {e}", self.path.display())))?;
        Configuration::from_toml_str(&content)
    }
}

impl ConfigProvider {
    /// Fetch and swap in a new configuration, waiting at most `timeout`.
    ///
    /// Returns whether the snapshot was replaced. Failures and timeouts keep
    /// the current snapshot so the caller can go on with it.
    pub async fn refresh(&self, source: &dyn ConfigurationSource, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, source.fetch()).await {
            Ok(Ok(config)) => match self.replace(config) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "rejected fetched configuration");
                    false
                }
            },
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "configuration refresh failed");
                false
            }
            Err(_) => {
                tracing::warn!(timeout_secs = timeout.as_secs_f64(), "configuration refresh timed out");
                false
            }
        }
    }
}

impl Default for ConfigProvider {
    fn default() -> Self {
        Self::new(Configuration::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Configuration::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed = Configuration::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn config_default_values() {
        let cfg = Configuration::default();
        assert_eq!(cfg.exposure_info_minimum_risk_score, 20);
        assert_eq!(cfg.operational_info_with_exposure_sampling_rate, 1.0);
        assert_eq!(cfg.operational_info_without_exposure_sampling_rate, 0.6);
        assert_eq!(cfg.dummy_ingestion_request_probabilities, vec![0.95, 0.1]);
        assert_eq!(cfg.dummy_ingestion_window_duration, 1_209_600.0);
        assert_eq!(cfg.ingestion_request_target_size, 110_000);
    }

    #[test]
    fn remote_keys_are_accepted() {
        let json = r#"{
            "dummy_teks_request_probabilities": [0.5],
            "teks_packet_size": 2048,
            "dummy_analytics_waiting_time": 60
        }"#;
        let cfg = Configuration::from_json_str(json).unwrap();
        assert_eq!(cfg.dummy_ingestion_request_probabilities, vec![0.5]);
        assert_eq!(cfg.ingestion_request_target_size, 2048);
        assert_eq!(cfg.dummy_analytics_mean_stochastic_delay, 60.0);
        assert_eq!(cfg.exposure_info_minimum_risk_score, 20);
    }

    #[test]
    fn probability_index_clamps_to_last() {
        let cfg = Configuration::default();
        assert_eq!(cfg.dummy_request_probability(0), 0.95);
        assert_eq!(cfg.dummy_request_probability(1), 0.1);
        assert_eq!(cfg.dummy_request_probability(7), 0.1);
    }

    #[test]
    #[should_panic(expected = "no dummy ingestion request probabilities")]
    fn empty_probabilities_are_fatal() {
        let cfg = Configuration {
            dummy_ingestion_request_probabilities: vec![],
            ..Configuration::default()
        };
        cfg.dummy_request_probability(0);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let empty = Configuration {
            dummy_ingestion_request_probabilities: vec![],
            ..Configuration::default()
        };
        assert!(matches!(empty.validate(), Err(ConfigError::InvalidValue { .. })));

        let rate = Configuration {
            operational_info_without_exposure_sampling_rate: 1.5,
            ..Configuration::default()
        };
        assert!(rate.validate().is_err());

        let negative = Configuration {
            dummy_ingestion_window_duration: -1.0,
            ..Configuration::default()
        };
        assert!(negative.validate().is_err());

        let huge = Configuration {
            dummy_ingestion_average_start_up_delay: 1e300,
            ..Configuration::default()
        };
        assert!(matches!(
            huge.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "dummy_ingestion_average_start_up_delay"
        ));

        let long_window = Configuration {
            dummy_ingestion_window_duration: MAX_CONFIGURED_SECS + 1.0,
            ..Configuration::default()
        };
        assert!(long_window.validate().is_err());
        let longest = Configuration {
            dummy_ingestion_window_duration: MAX_CONFIGURED_SECS,
            ..Configuration::default()
        };
        assert!(longest.validate().is_ok());

        let url = Configuration {
            endpoints: EndpointsConfig {
                ingestion: "not a url".into(),
                ..EndpointsConfig::default()
            },
            ..Configuration::default()
        };
        assert!(url.validate().is_err());
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Configuration::default();
        assert_eq!(cfg.get("exposure_info_minimum_risk_score").as_deref(), Some("20"));
        assert_eq!(
            cfg.get("endpoints.analytics").as_deref(),
            Some("https://analytics.immuni.gov.it")
        );
        assert!(cfg.get("endpoints.missing").is_none());
    }

    #[test]
    fn with_value_returns_updated_copy() {
        let cfg = Configuration::default();
        let updated = cfg
            .with_value("operational_info_without_exposure_sampling_rate", "0.25")
            .unwrap();
        assert_eq!(updated.operational_info_without_exposure_sampling_rate, 0.25);
        assert_eq!(cfg.operational_info_without_exposure_sampling_rate, 0.6);

        let updated = cfg
            .with_value("dummy_ingestion_request_probabilities", "[0.5, 0.2, 0.1]")
            .unwrap();
        assert_eq!(updated.dummy_ingestion_request_probabilities, vec![0.5, 0.2, 0.1]);
    }

    #[test]
    fn with_value_rejects_unknown_and_invalid() {
        let cfg = Configuration::default();
        assert!(matches!(
            cfg.with_value("nonexistent_key", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(cfg
            .with_value("operational_info_with_exposure_sampling_rate", "abc")
            .is_err());
        assert!(cfg
            .with_value("dummy_ingestion_request_probabilities", "[]")
            .is_err());
    }

    #[test]
    fn load_from_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Configuration::load_from(&path).unwrap();
        assert_eq!(cfg, Configuration::default());
        assert!(path.exists());

        let modified = cfg.with_value("ingestion_request_target_size", "4096").unwrap();
        modified.save_to(&path).unwrap();
        assert_eq!(Configuration::load_from(&path).unwrap(), modified);
    }

    #[test]
    fn load_from_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "dummy_ingestion_request_probabilities = []\n").unwrap();
        assert!(Configuration::load_from(&path).is_err());
    }

    #[test]
    fn provider_replaces_whole_snapshot() {
        let provider = ConfigProvider::default();
        let before = provider.snapshot();

        let next = Configuration {
            ingestion_request_target_size: 1024,
            ..Configuration::default()
        };
        provider.replace(next).unwrap();

        assert_eq!(before.ingestion_request_target_size, 110_000);
        assert_eq!(provider.snapshot().ingestion_request_target_size, 1024);

        let bad = Configuration {
            dummy_ingestion_request_probabilities: vec![],
            ..Configuration::default()
        };
        assert!(provider.replace(bad).is_err());
        assert_eq!(provider.snapshot().ingestion_request_target_size, 1024);
    }

    struct SlowSource;

    #[async_trait]
    impl ConfigurationSource for SlowSource {
        async fn fetch(&self) -> Result<Configuration, ConfigError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Configuration::default())
        }
    }

    #[tokio::test]
    async fn refresh_reads_the_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.toml");
        std::fs::write(&path, "teks_packet_size = 2048\n").unwrap();

        let provider = ConfigProvider::default();
        let source = FileConfigurationSource { path };
        assert!(provider.refresh(&source, Duration::from_secs(5)).await);
        assert_eq!(provider.snapshot().ingestion_request_target_size, 2048);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_timeout_keeps_current_snapshot() {
        let provider = ConfigProvider::default();
        assert!(!provider.refresh(&SlowSource, Duration::from_secs(10)).await);
        assert_eq!(*provider.snapshot(), Configuration::default());
    }
}
