use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

const APP_JSON: &str = "app.json";
const CONFIG_SCHEMA: u64 = 1;

pub const DEFAULT_SERVER_BASE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_SUBJECT: &str = "General Study";
pub const DEFAULT_RING_RADIUS: f64 = 90.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndRetryConfig {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for EndRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusConfig {
    pub schema: u64,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_server_base_url")]
    pub server_base_url: String,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_subject")]
    pub default_subject: String,
    #[serde(default = "default_ring_radius")]
    pub ring_radius: f64,
    #[serde(default)]
    pub end_retry: EndRetryConfig,
}

fn default_app_name() -> String {
    "StudyFlow".to_string()
}

fn default_server_base_url() -> String {
    DEFAULT_SERVER_BASE_URL.to_string()
}

fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_subject() -> String {
    DEFAULT_SUBJECT.to_string()
}

fn default_ring_radius() -> f64 {
    DEFAULT_RING_RADIUS
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            schema: CONFIG_SCHEMA,
            app_name: default_app_name(),
            server_base_url: default_server_base_url(),
            request_timeout_seconds: default_request_timeout_seconds(),
            tick_interval_ms: default_tick_interval_ms(),
            default_subject: default_subject(),
            ring_radius: default_ring_radius(),
            end_retry: EndRetryConfig::default(),
        }
    }
}

impl FocusConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(10))
    }

    pub fn validate(&self) -> Result<(), InfraError> {
        parse_base_url(&self.server_base_url)?;
        if self.default_subject.trim().is_empty() {
            return Err(InfraError::InvalidConfig(
                "defaultSubject must not be empty".to_string(),
            ));
        }
        if !self.ring_radius.is_finite() || self.ring_radius <= 0.0 {
            return Err(InfraError::InvalidConfig(format!(
                "ringRadius must be a positive number, got {}",
                self.ring_radius
            )));
        }
        Ok(())
    }

    /// Applies `STUDYFLOW_*` overrides resolved through `lookup`.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, InfraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server) = optional_lookup_value(&lookup, &["STUDYFLOW_SERVER_URL", "SERVER_URL"]) {
            self.server_base_url = server;
        }
        if let Some(raw) = optional_lookup_value(&lookup, &["STUDYFLOW_REQUEST_TIMEOUT_SECONDS"]) {
            self.request_timeout_seconds = raw.parse::<u64>().map_err(|error| {
                InfraError::InvalidConfig(format!(
                    "STUDYFLOW_REQUEST_TIMEOUT_SECONDS must be an integer: {error}"
                ))
            })?;
        }
        self.validate()?;
        Ok(self)
    }
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

pub fn parse_base_url(raw: &str) -> Result<Url, InfraError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InfraError::InvalidConfig(
            "serverBaseUrl must not be empty".to_string(),
        ));
    }
    let url = Url::parse(trimmed)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid serverBaseUrl '{trimmed}': {error}")))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(InfraError::InvalidConfig(format!(
            "serverBaseUrl must be an http(s) URL, got '{trimmed}'"
        )));
    }
    Ok(url)
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&FocusConfig::default())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != CONFIG_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_focus_config(config_dir: &Path) -> Result<FocusConfig, InfraError> {
    let value = read_config(&config_dir.join(APP_JSON))?;
    let config: FocusConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_ID: AtomicUsize = AtomicUsize::new(0);

    struct TempConfigDir {
        path: PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let sequence = NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "studyflow-config-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp directory");
            Self { path }
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn default_config_is_written_and_loaded() {
        let temp = TempConfigDir::new();
        ensure_default_configs(&temp.path).expect("write defaults");

        let config = load_focus_config(&temp.path).expect("load config");
        assert_eq!(config, FocusConfig::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn existing_config_is_not_overwritten() {
        let temp = TempConfigDir::new();
        fs::write(
            temp.path.join(APP_JSON),
            r#"{"schema": 1, "serverBaseUrl": "http://study.local:8080", "ringRadius": 50}"#,
        )
        .expect("write config");
        ensure_default_configs(&temp.path).expect("ensure defaults");

        let config = load_focus_config(&temp.path).expect("load config");
        assert_eq!(config.server_base_url, "http://study.local:8080");
        assert_eq!(config.ring_radius, 50.0);
        assert_eq!(config.default_subject, DEFAULT_SUBJECT);
    }

    #[test]
    fn unsupported_schema_is_rejected() {
        let temp = TempConfigDir::new();
        fs::write(temp.path.join(APP_JSON), r#"{"schema": 2}"#).expect("write config");

        match load_focus_config(&temp.path) {
            Err(InfraError::InvalidConfig(message)) => assert!(message.contains("unsupported schema")),
            other => panic!("expected invalid config error, got {other:?}"),
        }
    }

    #[test]
    fn overrides_replace_server_url_and_timeout() {
        let config = FocusConfig::default()
            .apply_overrides(|key| match key {
                "STUDYFLOW_SERVER_URL" => Some(" https://focus.example.com ".to_string()),
                "STUDYFLOW_REQUEST_TIMEOUT_SECONDS" => Some("3".to_string()),
                _ => None,
            })
            .expect("apply overrides");

        assert_eq!(config.server_base_url, "https://focus.example.com");
        assert_eq!(config.request_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn overrides_reject_non_http_url() {
        let result = FocusConfig::default().apply_overrides(|key| match key {
            "SERVER_URL" => Some("ftp://files.example.com".to_string()),
            _ => None,
        });
        assert!(matches!(result, Err(InfraError::InvalidConfig(_))));
    }
}
