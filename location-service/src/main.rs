use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use location_provider::GeoClueProvider;
use location_service::logging::{self, LoggingMode};
use location_service::transport::{self, Registration};
use location_service::{spawn_broker, BusIdentity, ServiceConfig};
use tracing::{error, info, warn};

/// Location broker for webOS-style bus clients, backed by GeoClue2
#[derive(Parser, Debug)]
#[command(name = "location-service")]
#[command(version)]
pub struct Args {
    /// Verbose logging with source locations
    #[arg(long)]
    pub debug: bool,

    /// Log level or filter directives (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Default getCurrentPosition timeout in seconds
    #[arg(short = 't', long, default_value = "30")]
    pub timeout: u64,

    /// Desktop id presented to GeoClue2
    #[arg(long, default_value = "location-service")]
    pub desktop_id: String,

    /// Bus identity to register, e.g. palm-public; repeat for several (default: all)
    #[arg(long = "identity", value_name = "IDENTITY")]
    pub identities: Vec<BusIdentity>,

    /// Serve only the session-bus identities
    #[arg(long, conflicts_with = "identities")]
    pub public_only: bool,
}

impl Args {
    /// Apply `LOCATION_*` environment overrides
    fn apply_env(mut self) -> Result<Self> {
        if let Ok(timeout) = std::env::var("LOCATION_TIMEOUT") {
            self.timeout = timeout
                .parse()
                .context("Invalid LOCATION_TIMEOUT environment variable")?;
        }

        if let Ok(desktop_id) = std::env::var("LOCATION_DESKTOP_ID") {
            self.desktop_id = desktop_id;
        }

        if let Ok(identities) = std::env::var("LOCATION_IDENTITIES") {
            self.identities = identities
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::parse)
                .collect::<std::result::Result<_, _>>()
                .context("Invalid LOCATION_IDENTITIES environment variable")?;
        }

        if std::env::var("LOCATION_PUBLIC_ONLY").is_ok() {
            self.public_only = true;
        }

        if std::env::var("LOCATION_DEBUG").is_ok() {
            self.debug = true;
        }

        Ok(self)
    }

    fn config(&self) -> ServiceConfig {
        let base = if self.public_only {
            ServiceConfig::public_only()
        } else {
            ServiceConfig::new()
        };
        let config = base
            .with_desktop_id(self.desktop_id.clone())
            .with_default_timeout(Duration::from_secs(self.timeout));

        if self.identities.is_empty() {
            config
        } else {
            config.with_identities(self.identities.iter().copied())
        }
    }

    fn init_logging(&self) -> Result<()> {
        let result = match (&self.log_level, self.debug) {
            (_, true) => logging::init_logging(LoggingMode::Debug),
            (Some(level), false) => logging::init_with_level(level),
            (None, false) => logging::init_logging(LoggingMode::Standard),
        };
        result.context("Failed to initialize logging")
    }
}

async fn register_identities(
    config: &ServiceConfig,
    handle: &location_service::ServiceHandle,
) -> Vec<Registration> {
    let mut registrations = Vec::new();

    for identity in &config.identities {
        match transport::register(*identity, handle.clone()).await {
            Ok(registration) => registrations.push(registration),
            Err(e) => warn!("{}; continuing without it", e),
        }
    }

    registrations
}

async fn shutdown_signal() -> Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse().apply_env()?;
    args.init_logging()?;

    let config = args.config();
    config.validate().context("Invalid configuration")?;

    let provider = Arc::new(GeoClueProvider::new());
    let (handle, worker) =
        spawn_broker(provider, config.clone()).context("Failed to start location broker")?;

    let registrations = register_identities(&config, &handle).await;
    if registrations.is_empty() {
        error!("No bus identity could be registered");
        let _ = handle.shutdown().await;
        let _ = worker.await;
        anyhow::bail!("No bus identity could be registered");
    }

    info!(
        "location-service {} serving {} of {} identities",
        env!("CARGO_PKG_VERSION"),
        registrations.len(),
        config.identities.len()
    );

    shutdown_signal().await?;
    info!("Shutting down");

    for registration in registrations {
        registration.close().await;
    }
    if let Err(e) = handle.shutdown().await {
        warn!("Broker already stopped: {}", e);
    }
    worker.await.context("Broker worker panicked")?;

    Ok(())
}
