//! Server settings
//!
//! Settings arrive as JSON through `initializationOptions`,
//! `workspace/didChangeConfiguration` and the `setToken` /
//! `setSelfHostedUrl` commands. Readers take an immutable [`Settings`]
//! snapshot from the [`SettingsStore`]; writers swap in a new one.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "https://circleci.com";
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_DEBOUNCE_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// CircleCI host, `https://circleci.com` or a self-hosted server
    pub host_url: String,
    /// API token sent to the orb registry
    pub token: Option<String>,
    pub fetch_timeout_ms: u64,
    pub debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host_url: DEFAULT_HOST.to_string(),
            token: None,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl Settings {
    /// Defaults with `CIRCLECI_TOKEN` and `CIRCLECI_HOST` applied
    pub fn from_env() -> Self {
        Self::default().with_env(|name| std::env::var(name).ok())
    }

    pub fn with_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(token) = var("CIRCLECI_TOKEN").filter(|t| !t.is_empty()) {
            self.token = Some(token);
        }
        if let Some(host) = var("CIRCLECI_HOST").filter(|h| !h.is_empty()) {
            self.host_url = host;
        }
        self.normalized()
    }

    /// Overlay the keys present in `value` on top of these settings. The
    /// options may be wrapped in a `circleci` object.
    pub fn merged_with(&self, value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let overrides = value.get("circleci").unwrap_or(value);
        let serde_json::Value::Object(overrides) = overrides else {
            return Ok(self.clone());
        };

        let mut current = serde_json::to_value(self)?;
        if let serde_json::Value::Object(fields) = &mut current {
            for (key, value) in overrides {
                fields.insert(key.clone(), value.clone());
            }
        }

        let merged: Settings = serde_json::from_value(current)?;
        Ok(merged.normalized())
    }

    pub fn with_token(&self, token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
            ..self.clone()
        }
    }

    pub fn with_host(&self, host_url: String) -> Self {
        Self {
            host_url,
            ..self.clone()
        }
        .normalized()
    }

    /// Whether orbs fetched under `self` may differ under `other`
    pub fn registry_changed(&self, other: &Settings) -> bool {
        self.host_url != other.host_url || self.token != other.token
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    fn normalized(mut self) -> Self {
        let trimmed = self.host_url.trim().trim_end_matches('/');
        self.host_url = if trimmed.is_empty() {
            DEFAULT_HOST.to_string()
        } else {
            trimmed.to_string()
        };
        self
    }
}

/// Holder of the current [`Settings`] snapshot
#[derive(Debug, Default)]
pub struct SettingsStore {
    current: RwLock<Arc<Settings>>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    pub fn snapshot(&self) -> Arc<Settings> {
        let guard = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in new settings, returning the previous snapshot
    pub fn replace(&self, settings: Settings) -> Arc<Settings> {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *guard, Arc::new(settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.host_url, "https://circleci.com");
        assert_eq!(settings.token, None);
        assert_eq!(settings.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(settings.debounce(), Duration::from_millis(1000));
    }

    #[test]
    fn test_env_overrides() {
        let settings = Settings::default().with_env(|name| match name {
            "CIRCLECI_TOKEN" => Some("secret".to_string()),
            "CIRCLECI_HOST" => Some("https://circleci.example.com/".to_string()),
            _ => None,
        });

        assert_eq!(settings.token.as_deref(), Some("secret"));
        assert_eq!(settings.host_url, "https://circleci.example.com");
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let base = Settings::default().with_token(Some("abc".to_string()));
        let merged = base
            .merged_with(&json!({ "circleci": { "debounceMs": 250 } }))
            .unwrap();

        assert_eq!(merged.debounce_ms, 250);
        assert_eq!(merged.token.as_deref(), Some("abc"));
        assert!(!base.registry_changed(&merged));
    }

    #[test]
    fn test_merge_rejects_wrong_types() {
        let base = Settings::default();
        assert!(base.merged_with(&json!({ "debounceMs": "soon" })).is_err());
        assert_eq!(base.merged_with(&json!(null)).unwrap(), base);
    }

    #[test]
    fn test_store_replace() {
        let store = SettingsStore::new(Settings::default());
        let previous = store.replace(Settings::default().with_host("https://ci.local".to_string()));

        assert_eq!(previous.host_url, DEFAULT_HOST);
        assert_eq!(store.snapshot().host_url, "https://ci.local");
        assert!(previous.registry_changed(&store.snapshot()));
    }
}
