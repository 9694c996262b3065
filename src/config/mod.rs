mod file_config;

pub use file_config::{
    AuditConfig, BackgroundJobsConfig, ControllerAppConfig, CronJobConfig,
    DailyScanCycleJobConfig, FileConfig, OAuthConfig,
};

use crate::server::RequestsLoggingLevel;
use anyhow::{anyhow, bail, Context, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Service identity used in audit entries when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "schedulerapp-service";

/// Client-credentials registration for the one service identity this
/// process authenticates as.
#[derive(Clone)]
pub struct OAuthSettings {
    pub issuer_url: String,
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    pub refresh_margin: Duration,
    pub default_token_lifetime: Duration,
}

impl std::fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("issuer_url", &self.issuer_url)
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .field("refresh_margin", &self.refresh_margin)
            .field("default_token_lifetime", &self.default_token_lifetime)
            .finish()
    }
}

/// Settings for the controller app HTTP client
#[derive(Debug, Clone)]
pub struct ControllerAppSettings {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for ControllerAppSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            connect_timeout: Duration::from_millis(10_000),
            read_timeout: Duration::from_millis(30_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditSettings {
    pub service_name: String,
    pub file_path: Option<PathBuf>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            file_path: None,
        }
    }
}

/// Settings for the hourly pending-scan launcher
#[derive(Debug, Clone)]
pub struct ScanLauncherJobSettings {
    pub enabled: bool,
    pub cron: String,
}

impl Default for ScanLauncherJobSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 0 * * * *".to_string(),
        }
    }
}

/// Settings for the nightly recently-completed scan sweep
#[derive(Debug, Clone)]
pub struct DailyScanCycleJobSettings {
    pub enabled: bool,
    pub cron: String,
    pub within_days: u32,
    pub scan_limit: u32,
}

impl Default for DailyScanCycleJobSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 0 2 * * *".to_string(),
            within_days: 7,
            scan_limit: 50,
        }
    }
}

/// Settings for the active scan cycle monitor
#[derive(Debug, Clone)]
pub struct ActiveScanMonitorJobSettings {
    pub enabled: bool,
    pub cron: String,
}

impl Default for ActiveScanMonitorJobSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 */15 * * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackgroundJobsSettings {
    pub scheduled_scan_launcher: ScanLauncherJobSettings,
    pub daily_scan_cycle_launcher: DailyScanCycleJobSettings,
    pub active_scan_cycle_monitor: ActiveScanMonitorJobSettings,
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub controller_app_url: Option<String>,
    pub token_uri: Option<String>,
    pub issuer_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    // Feature configs (with defaults)
    pub oauth: OAuthSettings,
    pub controller_app: ControllerAppSettings,
    pub audit: AuditSettings,
    pub background_jobs: BackgroundJobsSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        if port != 0 && port == metrics_port {
            bail!("port and metrics_port must differ (both set to {})", port);
        }

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let oauth = resolve_oauth(cli, file.oauth.unwrap_or_default())?;

        let ca_file = file.controller_app.unwrap_or_default();
        let ca_defaults = ControllerAppSettings::default();
        let base_url = ca_file
            .base_url
            .or_else(|| cli.controller_app_url.clone())
            .ok_or_else(|| {
                anyhow!(
                    "controller app base url must be specified via --controller-app-url or in config file"
                )
            })?;
        validate_url("controller_app.base_url", &base_url)?;
        let controller_app = ControllerAppSettings {
            base_url: base_url.trim_end_matches('/').to_string(),
            connect_timeout: ca_file
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(ca_defaults.connect_timeout),
            read_timeout: ca_file
                .read_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(ca_defaults.read_timeout),
        };

        let audit_file = file.audit.unwrap_or_default();
        let audit = AuditSettings {
            service_name: audit_file
                .service_name
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            file_path: audit_file.file_path.map(PathBuf::from),
        };

        let background_jobs = resolve_background_jobs(file.background_jobs.unwrap_or_default())?;

        Ok(Self {
            port,
            metrics_port,
            logging_level,
            oauth,
            controller_app,
            audit,
            background_jobs,
        })
    }
}

fn resolve_oauth(cli: &CliConfig, oauth_file: OAuthConfig) -> Result<OAuthSettings> {
    let token_uri = oauth_file
        .token_uri
        .or_else(|| cli.token_uri.clone())
        .ok_or_else(|| anyhow!("oauth token_uri must be specified via --token-uri or in config file"))?;
    validate_url("oauth.token_uri", &token_uri)?;

    // The issuer only identifies the registration, fall back to the token endpoint
    let issuer_url = oauth_file
        .issuer_url
        .or_else(|| cli.issuer_url.clone())
        .unwrap_or_else(|| token_uri.clone());
    validate_url("oauth.issuer_url", &issuer_url)?;

    let client_id = oauth_file
        .client_id
        .or_else(|| cli.client_id.clone())
        .ok_or_else(|| anyhow!("oauth client_id must be specified via --client-id or in config file"))?;
    let client_secret = oauth_file
        .client_secret
        .or_else(|| cli.client_secret.clone())
        .ok_or_else(|| {
            anyhow!("oauth client_secret must be specified via --client-secret, OAUTH_CLIENT_SECRET or in config file")
        })?;
    if client_id.is_empty() || client_secret.is_empty() {
        bail!("oauth client_id and client_secret must not be empty");
    }

    let scope = oauth_file
        .scope
        .or_else(|| cli.scope.clone())
        .unwrap_or_default();

    let default_token_lifetime =
        Duration::from_secs(oauth_file.default_token_lifetime_secs.unwrap_or(300));
    if default_token_lifetime.is_zero() {
        bail!("oauth default_token_lifetime_secs must be greater than 0");
    }

    let refresh_margin = Duration::from_secs(oauth_file.refresh_margin_secs.unwrap_or(60));
    if refresh_margin >= default_token_lifetime {
        bail!(
            "oauth refresh_margin_secs ({}) must be lower than default_token_lifetime_secs ({})",
            refresh_margin.as_secs(),
            default_token_lifetime.as_secs()
        );
    }

    Ok(OAuthSettings {
        issuer_url,
        token_uri,
        client_id,
        client_secret,
        scope,
        refresh_margin,
        default_token_lifetime,
    })
}

fn resolve_background_jobs(bg_jobs_file: BackgroundJobsConfig) -> Result<BackgroundJobsSettings> {
    let defaults = BackgroundJobsSettings::default();

    let launcher_file = bg_jobs_file.scheduled_scan_launcher.unwrap_or_default();
    let scheduled_scan_launcher = ScanLauncherJobSettings {
        enabled: launcher_file
            .enabled
            .unwrap_or(defaults.scheduled_scan_launcher.enabled),
        cron: launcher_file
            .cron
            .unwrap_or(defaults.scheduled_scan_launcher.cron),
    };
    validate_cron("scheduled_scan_launcher", &scheduled_scan_launcher.cron)?;

    let daily_file = bg_jobs_file.daily_scan_cycle_launcher.unwrap_or_default();
    let daily_scan_cycle_launcher = DailyScanCycleJobSettings {
        enabled: daily_file
            .enabled
            .unwrap_or(defaults.daily_scan_cycle_launcher.enabled),
        cron: daily_file
            .cron
            .unwrap_or(defaults.daily_scan_cycle_launcher.cron),
        within_days: daily_file
            .within_days
            .unwrap_or(defaults.daily_scan_cycle_launcher.within_days),
        scan_limit: daily_file
            .scan_limit
            .unwrap_or(defaults.daily_scan_cycle_launcher.scan_limit),
    };
    validate_cron("daily_scan_cycle_launcher", &daily_scan_cycle_launcher.cron)?;
    if daily_scan_cycle_launcher.within_days == 0 {
        bail!("daily_scan_cycle_launcher.within_days must be greater than 0");
    }

    let monitor_file = bg_jobs_file.active_scan_cycle_monitor.unwrap_or_default();
    let active_scan_cycle_monitor = ActiveScanMonitorJobSettings {
        enabled: monitor_file
            .enabled
            .unwrap_or(defaults.active_scan_cycle_monitor.enabled),
        cron: monitor_file
            .cron
            .unwrap_or(defaults.active_scan_cycle_monitor.cron),
    };
    validate_cron("active_scan_cycle_monitor", &active_scan_cycle_monitor.cron)?;

    Ok(BackgroundJobsSettings {
        scheduled_scan_launcher,
        daily_scan_cycle_launcher,
        active_scan_cycle_monitor,
    })
}

fn validate_url(name: &str, value: &str) -> Result<()> {
    reqwest::Url::parse(value)
        .map(|_| ())
        .with_context(|| format!("Invalid {}: {}", name, value))
}

fn validate_cron(job: &str, expr: &str) -> Result<()> {
    cron::Schedule::from_str(expr)
        .map(|_| ())
        .with_context(|| format!("Invalid cron expression for {}: {}", job, expr))
}

fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
