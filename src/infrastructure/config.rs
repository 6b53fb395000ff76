use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const PREFERENCES_JSON: &str = "preferences.json";
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:5000/api/";
const API_BASE_URL_ENV_KEYS: [&str; 2] = ["FOCUSLEARN_API_BASE_URL", "API_BASE_URL"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub reconcile_interval: Duration,
    pub tick_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(15),
            reconcile_interval: Duration::from_secs(30),
            tick_interval: Duration::from_millis(1_000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub iot_enabled: bool,
    pub auto_sync_enabled: bool,
    pub language: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            iot_enabled: false,
            auto_sync_enabled: true,
            language: "en".to_string(),
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "apiBaseUrl": DEFAULT_API_BASE_URL,
                "requestTimeoutSeconds": 15,
                "reconcileIntervalSeconds": 30,
                "tickIntervalMillis": 1000
            }),
        ),
        (
            PREFERENCES_JSON,
            serde_json::json!({
                "schema": 1,
                "iotEnabled": false,
                "autoSyncEnabled": true,
                "language": "en"
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            write_config(&path, &value)?;
        }
    }
    Ok(())
}

fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

/// Reads `config/app.json`; `lookup` resolves environment overrides.
pub fn load_client_config<F>(config_dir: &Path, lookup: F) -> Result<ClientConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = config_dir.join(APP_JSON);
    let app = read_config(&path)?;
    let defaults = ClientConfig::default();

    let file_base_url = app
        .get("apiBaseUrl")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);
    let env_base_url = API_BASE_URL_ENV_KEYS
        .iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty());

    Ok(ClientConfig {
        api_base_url: env_base_url
            .or(file_base_url)
            .unwrap_or(defaults.api_base_url),
        request_timeout: read_positive(&app, "requestTimeoutSeconds", &path)?
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout),
        reconcile_interval: read_positive(&app, "reconcileIntervalSeconds", &path)?
            .map(Duration::from_secs)
            .unwrap_or(defaults.reconcile_interval),
        tick_interval: read_positive(&app, "tickIntervalMillis", &path)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.tick_interval),
    })
}

fn read_positive(
    config: &serde_json::Value,
    key: &str,
    path: &Path,
) -> Result<Option<u64>, InfraError> {
    let Some(value) = config.get(key) else {
        return Ok(None);
    };
    match value.as_i64() {
        Some(number) if number > 0 => Ok(Some(number as u64)),
        _ => Err(InfraError::InvalidConfig(format!(
            "{key} must be a positive integer in {}",
            path.display()
        ))),
    }
}

pub fn read_preferences(config_dir: &Path) -> Result<Preferences, InfraError> {
    let path = config_dir.join(PREFERENCES_JSON);
    let value = read_config(&path)?;
    let defaults = Preferences::default();
    Ok(Preferences {
        iot_enabled: value
            .get("iotEnabled")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(defaults.iot_enabled),
        auto_sync_enabled: value
            .get("autoSyncEnabled")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(defaults.auto_sync_enabled),
        language: value
            .get("language")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
            .unwrap_or(defaults.language),
    })
}

pub fn save_preferences(config_dir: &Path, preferences: &Preferences) -> Result<(), InfraError> {
    let path = config_dir.join(PREFERENCES_JSON);
    let mut value = serde_json::to_value(preferences)?;
    let object = value.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure for {}", path.display()))
    })?;
    object.insert("schema".to_string(), serde_json::json!(1));
    write_config(&path, &value)
}
