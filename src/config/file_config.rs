use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    // Feature configs
    pub oauth: Option<OAuthConfig>,
    pub controller_app: Option<ControllerAppConfig>,
    pub audit: Option<AuditConfig>,
    pub background_jobs: Option<BackgroundJobsConfig>,
}

#[derive(Deserialize, Default, Clone)]
#[serde(default)]
pub struct OAuthConfig {
    pub issuer_url: Option<String>,
    pub token_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
    /// Seconds before expiry at which a cached token is refreshed
    pub refresh_margin_secs: Option<u64>,
    /// Lifetime assumed when the token response carries no `expires_in`
    pub default_token_lifetime_secs: Option<u64>,
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("issuer_url", &self.issuer_url)
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("scope", &self.scope)
            .field("refresh_margin_secs", &self.refresh_margin_secs)
            .field(
                "default_token_lifetime_secs",
                &self.default_token_lifetime_secs,
            )
            .finish()
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ControllerAppConfig {
    pub base_url: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AuditConfig {
    pub service_name: Option<String>,
    /// Append audit lines to this file in addition to the log stream
    pub file_path: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackgroundJobsConfig {
    pub scheduled_scan_launcher: Option<CronJobConfig>,
    pub daily_scan_cycle_launcher: Option<DailyScanCycleJobConfig>,
    pub active_scan_cycle_monitor: Option<CronJobConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CronJobConfig {
    pub enabled: Option<bool>,
    pub cron: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DailyScanCycleJobConfig {
    pub enabled: Option<bool>,
    pub cron: Option<String>,
    pub within_days: Option<u32>,
    pub scan_limit: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
