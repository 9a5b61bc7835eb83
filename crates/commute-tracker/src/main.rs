use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commute_tracker::{
    provider::RoutesApiClient,
    runner::CommuteTracker,
    scheduler::{AppState, RefreshScheduler},
    settings::Settings,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{path::PathBuf, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "commute-tracker",
    about = "Measure driving time between home and office during commute hours",
    version,
    after_help = r#"Configuration:
    Configuration can be provided via:
    1. Environment variables with COMMUTE__ prefix (e.g., COMMUTE__ROUTE__SOURCE_ADDRESS)
    2. .env file in the current directory
    3. Config file with -c option (TOML)

Examples:
    # Keep measuring and redraw on every tick
    commute-tracker run -c commute.toml

    # Evaluate a single tick, fetching only if a measurement is due
    commute-tracker check

    # Show today's measurements without fetching
    commute-tracker show"#
)]
pub struct Cli {
    /// Path to the configuration file (TOML format)
    ///
    /// If not provided, will attempt to load from environment variables
    #[clap(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Tick until interrupted, fetching whenever a measurement is due
    Run,
    /// Evaluate one tick and print the dashboard
    Check,
    /// Print today's dashboard without contacting the provider
    Show,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let settings = if let Some(config_path) = &self.config {
            Settings::from_path(config_path)?
        } else {
            Settings::from_env()?
        };
        init_logging(&settings.log_level)?;
        debug!("{settings}");

        if let Some(metrics) = &settings.metrics {
            PrometheusBuilder::new()
                .with_http_listener(metrics.addr)
                .install()
                .context("Failed to install Prometheus exporter")?;
        }

        let zone = settings.timezone()?;
        let client = RoutesApiClient::from_settings(&settings.provider)
            .context("Failed to build routing client")?;
        let scheduler = RefreshScheduler::new(
            settings.window_policy(),
            client,
            settings.schedule.refresh_interval_seconds,
        );
        let state = AppState::load(&settings.storage.log_file, zone);
        let mut tracker = CommuteTracker::new(
            scheduler,
            state,
            zone,
            Duration::from_secs(settings.schedule.tick_seconds),
        );

        match self.command {
            Commands::Run => {
                let shutdown = shutdown_listener()?;
                tracker.run(shutdown).await?;
            }
            Commands::Check => {
                let now = tracker.now();
                println!("{}", tracker.tick(now).await);
            }
            Commands::Show => {
                let now = tracker.now();
                println!("{}", tracker.render(now, None));
            }
        }

        info!("commute tracker exiting");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run().await
}

fn init_logging(log_level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

fn shutdown_listener() -> Result<CancellationToken> {
    let cancellation_token = CancellationToken::new();
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM listener")?;
    tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            tokio::select! {
                _ = sigterm.recv() => cancellation_token.cancel(),
                _ = signal::ctrl_c() => cancellation_token.cancel(),
            }
        }
    });

    Ok(cancellation_token)
}
