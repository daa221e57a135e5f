//! Errata command line client.
//!
//! Resolves reporter configuration from an optional TOML file, `ERRATA_`
//! environment variables and flags, then either prints the resolved
//! configuration or reports a single message and waits for the outcome.

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use errata_core::{options, Configuration, ErrorMessage, ReporterOptions};
use errata_delivery::{DeliveryReport, ReportClient};
use serde_json::{json, Value};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "errata", version, about = "Report errors to Cloud Error Reporting")]
struct Cli {
    /// TOML options file using the library's camelCase keys.
    #[arg(long, global = true, env = "ERRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Project to report to.
    #[arg(long, global = true, env = "ERRATA_PROJECT_ID")]
    project_id: Option<String>,

    /// API key; skips OAuth2 token acquisition.
    #[arg(long, global = true, env = "ERRATA_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Credentials JSON file.
    #[arg(long, global = true, env = "ERRATA_KEY_FILENAME")]
    key_filename: Option<PathBuf>,

    /// Service name attached to events.
    #[arg(long, global = true, env = "ERRATA_SERVICE")]
    service: Option<String>,

    /// Service version attached to events.
    #[arg(long, global = true, env = "ERRATA_SERVICE_VERSION")]
    service_version: Option<String>,

    /// One of `production`, `always` or `never`.
    #[arg(long, global = true, env = "ERRATA_REPORT_MODE")]
    report_mode: Option<String>,

    /// Base URL of the reporting API.
    #[arg(long, global = true, env = "ERRATA_API_ENDPOINT")]
    api_endpoint: Option<String>,

    /// Log verbosity from 0 (off) to 5 (trace).
    #[arg(long, global = true, env = "ERRATA_LOG_LEVEL")]
    log_level: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report a message and wait for the outcome.
    Report {
        /// Error message, typically including a stack trace.
        message: String,

        /// User affected by the error.
        #[arg(long)]
        user: Option<String>,
    },

    /// Print the resolved configuration.
    Config,
}

impl Cli {
    /// Layers flags and `ERRATA_` variables over the options file.
    fn options(&self) -> Result<ReporterOptions> {
        let base = match &self.config {
            Some(path) => ReporterOptions::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => ReporterOptions::new(),
        };

        let mut overrides = ReporterOptions::new();
        if let Some(project_id) = &self.project_id {
            overrides = overrides.project_id(project_id);
        }
        if let Some(key) = &self.key {
            overrides = overrides.key(key);
        }
        if let Some(path) = &self.key_filename {
            overrides = overrides.key_filename(path);
        }
        if let Some(service) = &self.service {
            overrides = overrides.service(service);
        }
        if let Some(version) = &self.service_version {
            overrides = overrides.version(version);
        }
        if let Some(mode) = &self.report_mode {
            overrides = overrides.set(options::REPORT_MODE, mode.as_str());
        }
        if let Some(endpoint) = &self.api_endpoint {
            overrides = overrides.api_endpoint(endpoint);
        }
        if let Some(level) = self.log_level {
            overrides = overrides.set(options::LOG_LEVEL, level);
        }

        Ok(base.merge(overrides))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let resolved = cli.options()?;
    let config = Configuration::from_env(&resolved)?;

    init_tracing(&config);
    for warning in config.warnings() {
        warn!("{warning}");
    }

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&describe_config(&config))?);
            Ok(())
        },
        Command::Report { message, user } => report(Arc::new(config), message, user).await,
    }
}

/// Initializes tracing from `RUST_LOG`, falling back to the configured level.
fn init_tracing(config: &Configuration) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level().directive()));

    let fmt_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

async fn report(config: Arc<Configuration>, message: String, user: Option<String>) -> Result<()> {
    let client = ReportClient::new(config.clone())?;

    let mut event = ErrorMessage::new(config.service_context().clone()).message(message);
    if let Some(user) = user {
        event = event.user(user);
    }
    let event = event.build();

    info!(service = %event.service_context.service, "reporting message");
    let report = client.send(&event).await;
    println!("{}", serde_json::to_string_pretty(&describe_report(&report))?);

    match report.error {
        None => Ok(()),
        Some(error) => bail!("error event was not reported: {error}"),
    }
}

fn describe_config(config: &Configuration) -> Value {
    json!({
        "reportMode": config.report_mode(),
        "reportingEnabled": config.is_reporting_enabled(),
        "shouldReportErrorsToApi": config.should_report_errors_to_api(),
        "serviceContext": config.service_context(),
        "projectId": config.project_id(),
        "apiEndpoint": config.api_endpoint(),
        "logLevel": config.log_level(),
        "auth": if config.key().is_some() { "apiKey" } else { "oauth2" },
        "reportUnhandledRejections": config.report_unhandled_rejections(),
        "warnings": config.warnings(),
    })
}

fn describe_report(report: &DeliveryReport) -> Value {
    json!({
        "submissionId": report.submission_id.to_string(),
        "state": report.state.to_string(),
        "attempts": report.attempts,
        "statusCode": report.response.map(|response| response.status_code),
        "error": report.error.as_ref().map(ToString::to_string),
        "body": report.body,
    })
}
