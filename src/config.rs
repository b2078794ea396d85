use crate::prompt::{DEFAULT_LOG_CAPACITY, DEFAULT_PROMPT_TIMEOUT};
use serde::Deserialize;
use std::{env, path::PathBuf, time::Duration};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct EbayCredentials {
    pub app_id: String,
    pub cert_id: String,
    pub refresh_token: String,
    pub environment: String,
}

impl EbayCredentials {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("PROD")
            || self.environment.eq_ignore_ascii_case("PRODUCTION")
    }
}

/// Service settings. Built-in defaults, then the YAML file named by
/// `RELIST_CONFIG`, then individual environment variables.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub port: u16,
    pub prompt_timeout_secs: u64,
    pub log_capacity: usize,
    pub update_wait_secs: u64,
    pub artifact_dir: PathBuf,
    pub request_max_bytes: usize,
    pub seller_pays_fee: bool,
    pub ebay_fixed_fee: f64,
    pub ebay_network_enabled: bool,
    pub metrics_key: Option<String>,
    pub http_timeout_secs: u64,
    pub http_connect_timeout_secs: u64,
    pub ebay: EbayCredentials,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            prompt_timeout_secs: DEFAULT_PROMPT_TIMEOUT.as_secs(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            update_wait_secs: 25,
            artifact_dir: PathBuf::from("bulk_products"),
            request_max_bytes: 2 * 1024 * 1024,
            seller_pays_fee: false,
            ebay_fixed_fee: 0.72,
            ebay_network_enabled: false,
            metrics_key: None,
            http_timeout_secs: 15,
            http_connect_timeout_secs: 5,
            ebay: EbayCredentials {
                environment: "SANDBOX".to_string(),
                ..EbayCredentials::default()
            },
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env::var("RELIST_CONFIG").ok().filter(|p| !p.trim().is_empty()) {
            Some(path) => {
                let path = PathBuf::from(path);
                let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                info!(target: "relist.api", path = %path.display(), "loaded config file");
                Self::from_yaml(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Applies `KEY=value` overrides from `lookup`. Values that do not parse
    /// leave the current setting alone.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = parsed(&lookup, "PORT") {
            self.port = port;
        }
        if let Some(secs) = parsed::<u64, _>(&lookup, "PROMPT_TIMEOUT_SECS").filter(|v| *v > 0) {
            self.prompt_timeout_secs = secs;
        }
        if let Some(capacity) = parsed::<usize, _>(&lookup, "LOG_CAPACITY").filter(|v| *v > 0) {
            self.log_capacity = capacity;
        }
        if let Some(secs) = parsed(&lookup, "UPDATE_WAIT_SECS") {
            self.update_wait_secs = secs;
        }
        if let Some(dir) = lookup("ARTIFACT_DIR").filter(|v| !v.trim().is_empty()) {
            self.artifact_dir = PathBuf::from(dir.trim());
        }
        if let Some(bytes) = parsed::<usize, _>(&lookup, "REQUEST_MAX_BYTES").filter(|v| *v > 0) {
            self.request_max_bytes = bytes;
        }
        if let Some(flag) = lookup("SELLER_PAY_FEE").and_then(|v| parse_env_bool(&v)) {
            self.seller_pays_fee = flag;
        }
        if let Some(fee) = parsed::<f64, _>(&lookup, "EBAY_FIXED_FEE").filter(|v| *v >= 0.0) {
            self.ebay_fixed_fee = fee;
        }
        if let Some(flag) = lookup("EBAY_ENABLE_NETWORK").and_then(|v| parse_env_bool(&v)) {
            self.ebay_network_enabled = flag;
        }
        if let Some(key) = lookup("METRICS_KEY").filter(|v| !v.is_empty()) {
            self.metrics_key = Some(key);
        }
        if let Some(secs) = parsed::<u64, _>(&lookup, "HTTP_TIMEOUT_SECS").filter(|v| *v > 0) {
            self.http_timeout_secs = secs;
        }
        if let Some(secs) =
            parsed::<u64, _>(&lookup, "HTTP_CONNECT_TIMEOUT_SECS").filter(|v| *v > 0)
        {
            self.http_connect_timeout_secs = secs;
        }
        if let Some(value) = lookup("EBAY_APP_ID_PRODUCTION") {
            self.ebay.app_id = value;
        }
        if let Some(value) = lookup("EBAY_CERT_ID_PRODUCTION") {
            self.ebay.cert_id = value;
        }
        if let Some(value) = lookup("EBAY_REFRESH_TOKEN") {
            self.ebay.refresh_token = value;
        }
        if let Some(value) = lookup("EBAY_ENV").filter(|v| !v.trim().is_empty()) {
            self.ebay.environment = value.trim().to_string();
        }
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }

    pub fn update_wait(&self) -> Duration {
        Duration::from_secs(self.update_wait_secs)
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(target: "relist.api", key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

pub fn parse_env_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.prompt_timeout(), Duration::from_secs(600));
        assert_eq!(config.log_capacity, 1000);
        assert_eq!(config.update_wait(), Duration::from_secs(25));
        assert_eq!(config.artifact_dir, PathBuf::from("bulk_products"));
        assert!(!config.ebay_network_enabled);
        assert!(!config.ebay.is_production());
    }

    #[test]
    fn yaml_then_env_layering() {
        let mut config = AppConfig::from_yaml(
            "port: 9100\nseller_pays_fee: true\nebay:\n  environment: PROD\n  app_id: from-file\n",
        )
        .unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.log_capacity, 1000);
        assert!(config.ebay.is_production());

        config.apply_overrides(lookup(&[
            ("PORT", "9200"),
            ("SELLER_PAY_FEE", "off"),
            ("EBAY_APP_ID_PRODUCTION", "from-env"),
            ("LOG_CAPACITY", "50"),
        ]));
        assert_eq!(config.port, 9200);
        assert!(!config.seller_pays_fee);
        assert_eq!(config.ebay.app_id, "from-env");
        assert_eq!(config.log_capacity, 50);
    }

    #[test]
    fn invalid_values_keep_previous_setting() {
        let mut config = AppConfig::default();
        config.apply_overrides(lookup(&[
            ("PORT", "eighty"),
            ("PROMPT_TIMEOUT_SECS", "0"),
            ("SELLER_PAY_FEE", "maybe"),
            ("EBAY_FIXED_FEE", "-1"),
        ]));
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(matches!(
            AppConfig::from_yaml("port: [not, a, number]"),
            Err(ConfigError::Parse(_))
        ));
        assert_eq!(AppConfig::from_yaml("  ").unwrap(), AppConfig::default());
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_env_bool(" YES "), Some(true));
        assert_eq!(parse_env_bool("0"), Some(false));
        assert_eq!(parse_env_bool(""), None);
    }
}
