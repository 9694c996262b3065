use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scan_scheduler::audit::{FileAuditSink, ServiceAuditLogger, TracingAuditSink};
use scan_scheduler::background_jobs::jobs::{
    ActiveScanCycleMonitorJob, DailyScanCycleLauncherJob, ManualScanLaunchJob,
    ScheduledScanLauncherJob,
};
use scan_scheduler::background_jobs::{create_scheduler, JobContext};
use scan_scheduler::config::{AppConfig, CliConfig, FileConfig};
use scan_scheduler::controller_app::ControllerAppClient;
use scan_scheduler::outbound::{controller_http_client, AuthenticatedClient};
use scan_scheduler::server::{self, metrics, ServerConfig, ServerState};
use scan_scheduler::token::{token_http_client, ServiceTokenProvider, TokenProvider};
use scan_scheduler::RequestsLoggingLevel;

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3002)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping). 0 disables it.
    #[clap(long, default_value_t = 9092)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Base URL of the controller app.
    #[clap(long)]
    pub controller_app_url: Option<String>,

    /// Token endpoint of the identity provider.
    #[clap(long)]
    pub token_uri: Option<String>,

    /// Issuer URL of the identity provider. Defaults to the token endpoint.
    #[clap(long)]
    pub issuer_url: Option<String>,

    /// Client id of this service's registration.
    #[clap(long)]
    pub client_id: Option<String>,

    /// Client secret of this service's registration.
    #[clap(long, env = "OAUTH_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Scope requested with every token.
    #[clap(long)]
    pub scope: Option<String>,
}

impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            controller_app_url: args.controller_app_url.clone(),
            token_uri: args.token_uri.clone(),
            issuer_url: args.issuer_url.clone(),
            client_id: args.client_id.clone(),
            client_secret: args.client_secret.clone(),
            scope: args.scope.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&CliConfig::from(&cli_args), file_config)?;
    info!("Resolved OAuth settings: {:?}", config.oauth);

    // Initialize metrics system
    info!("Initializing metrics...");
    metrics::init_metrics();

    let token_provider = Arc::new(ServiceTokenProvider::new(
        config.oauth.clone(),
        token_http_client(
            config.controller_app.connect_timeout,
            config.controller_app.read_timeout,
        )?,
    ));

    let mut audit = ServiceAuditLogger::new(config.audit.service_name.clone())
        .with_sink(Arc::new(TracingAuditSink));
    if let Some(path) = &config.audit.file_path {
        info!("Writing audit trail to {:?}", path);
        audit = audit.with_sink(Arc::new(FileAuditSink::open(path)?));
    }

    let transport = controller_http_client(
        config.controller_app.connect_timeout,
        config.controller_app.read_timeout,
    )?;
    let http = AuthenticatedClient::new(token_provider.clone(), Arc::new(transport));
    let controller_app = Arc::new(ControllerAppClient::new(
        &config.controller_app.base_url,
        http,
        audit.clone(),
    )?);
    info!("Controller app at {}", controller_app.base_url());

    let shutdown_token = CancellationToken::new();
    let job_context = JobContext::new(shutdown_token.child_token(), controller_app, audit);
    let (mut scheduler, scheduler_handle) = create_scheduler(shutdown_token.clone(), job_context);

    let jobs_settings = &config.background_jobs;
    if jobs_settings.scheduled_scan_launcher.enabled {
        scheduler
            .register_job(Arc::new(ScheduledScanLauncherJob::from_settings(
                &jobs_settings.scheduled_scan_launcher,
            )))
            .await;
    }
    if jobs_settings.daily_scan_cycle_launcher.enabled {
        scheduler
            .register_job(Arc::new(DailyScanCycleLauncherJob::from_settings(
                &jobs_settings.daily_scan_cycle_launcher,
            )))
            .await;
    }
    if jobs_settings.active_scan_cycle_monitor.enabled {
        scheduler
            .register_job(Arc::new(ActiveScanCycleMonitorJob::from_settings(
                &jobs_settings.active_scan_cycle_monitor,
            )))
            .await;
    }
    scheduler.register_job(Arc::new(ManualScanLaunchJob)).await;

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        metrics_port: config.metrics_port,
    };
    let state = ServerState::new(
        server_config,
        scheduler_handle,
        env!("GIT_HASH").to_string(),
    );

    let scheduler_task = tokio::spawn(async move { scheduler.run().await });
    let server_task = tokio::spawn(server::run_server(state, shutdown_token.clone()));
    let metrics_task = if config.metrics_port != 0 {
        info!("Metrics available at port {}!", config.metrics_port);
        Some(tokio::spawn(server::run_metrics_server(
            config.metrics_port,
            shutdown_token.clone(),
        )))
    } else {
        None
    };
    info!("Ready to serve at port {}!", config.port);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
        _ = shutdown_token.cancelled() => {}
    }

    shutdown_token.cancel();
    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }
    for task in std::iter::once(server_task).chain(metrics_task) {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{:#}", e),
            Err(e) => error!("Server task failed: {}", e),
        }
    }
    token_provider.invalidate();

    info!("Scheduler service stopped");
    Ok(())
}
