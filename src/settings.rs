//! Layered configuration for the `wsboot` binary.
//!
//! 1. Compiled [`Settings::default()`]
//! 2. `~/.wsboot/settings.json`, deep-merged over the defaults
//! 3. `WSBOOT_*` environment variables
//! 4. Command line flags (applied by `main`)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-module levels, e.g. `{"wsboot_engine": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Workspace service origin, e.g. `http://localhost:8080`.
    pub server_url: String,
    /// Message bus websocket URL. Derived from `server_url` when unset.
    pub bus_url: Option<String>,
    pub reconnect_budget: u32,
    pub retry_delay_ms: u64,
    pub status_poll_ms: u64,
    pub agent_connect_timeout_ms: u64,
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".into(),
            bus_url: None,
            reconnect_budget: 50,
            retry_delay_ms: 1000,
            status_poll_ms: 1000,
            agent_connect_timeout_ms: 10_000,
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    /// Effective bus URL: explicit, or `ws(s)://<server>/api/ws`. `None` when
    /// the server URL is not an http(s) or ws(s) URL.
    pub fn bus_url(&self) -> Option<String> {
        if let Some(url) = self.bus_url.as_ref().filter(|u| !u.is_empty()) {
            return Some(url.clone());
        }
        let mut url = Url::parse(&self.server_url).ok()?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            _ => return None,
        };
        url.set_scheme(scheme).ok()?;
        let path = format!("{}/api/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Some(url.into())
    }
}

pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".wsboot").join("settings.json")
}

pub fn load_settings() -> Result<Settings, SettingsError> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` (missing file means defaults), then apply env overrides.
pub fn load_settings_from_path(path: &Path) -> Result<Settings, SettingsError> {
    let defaults = serde_json::to_value(Settings::default())?;
    let merged = if path.exists() {
        tracing::debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        tracing::debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Objects merge per key; arrays and primitives are replaced; nulls in
/// `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `WSBOOT_*` overrides read through `lookup`. Invalid values are
/// logged and ignored.
pub fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("WSBOOT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = read("WSBOOT_BUS_URL") {
        settings.bus_url = Some(v);
    }
    if let Some(v) = read("WSBOOT_RECONNECT_BUDGET") {
        match parse_u64_range(&v, 1, 10_000) {
            Some(n) => settings.reconnect_budget = n as u32,
            None => warn_invalid("WSBOOT_RECONNECT_BUDGET", &v),
        }
    }
    if let Some(v) = read("WSBOOT_RETRY_DELAY_MS") {
        match parse_u64_range(&v, 10, 600_000) {
            Some(n) => settings.retry_delay_ms = n,
            None => warn_invalid("WSBOOT_RETRY_DELAY_MS", &v),
        }
    }
    if let Some(v) = read("WSBOOT_STATUS_POLL_MS") {
        match parse_u64_range(&v, 50, 600_000) {
            Some(n) => settings.status_poll_ms = n,
            None => warn_invalid("WSBOOT_STATUS_POLL_MS", &v),
        }
    }
    if let Some(v) = read("WSBOOT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("WSBOOT_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => warn_invalid("WSBOOT_LOG_JSON", &v),
        }
    }
}

fn warn_invalid(key: &str, value: &str) {
    tracing::warn!(key, value, "invalid env var, ignoring");
}

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
