use std::path::Path;

use serde::Deserialize;

use super::AppCore;

const DEFAULT_API_URL: &str = "https://api.amity.app";
const DEFAULT_NOTIFICATION_URL: &str = "https://notifications.amity.app";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct AppConfig {
    pub(super) disable_network: Option<bool>,
    pub(super) api_url: Option<String>,
    pub(super) notification_url: Option<String>,
    // Override for the web consent validity window.
    pub(super) consent_expiry_days: Option<i64>,
}

pub(super) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join("amity_config.json");
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    serde_json::from_slice::<AppConfig>(&bytes).unwrap_or_default()
}

pub(super) fn api_url(config: &AppConfig) -> String {
    if let Some(url) = &config.api_url {
        if !url.is_empty() {
            return url.clone();
        }
    }
    if let Ok(url) = std::env::var("AMITY_API_URL") {
        if !url.is_empty() {
            return url;
        }
    }
    DEFAULT_API_URL.to_string()
}

pub(super) fn notification_url(config: &AppConfig) -> String {
    if let Some(url) = &config.notification_url {
        if !url.is_empty() {
            return url.clone();
        }
    }
    if let Ok(url) = std::env::var("AMITY_NOTIFICATION_URL") {
        if !url.is_empty() {
            return url;
        }
    }
    DEFAULT_NOTIFICATION_URL.to_string()
}

impl AppCore {
    pub(super) fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.config.disable_network {
            return !disable;
        }
        std::env::var("AMITY_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }

    pub(super) fn notification_url(&self) -> String {
        notification_url(&self.config)
    }
}
