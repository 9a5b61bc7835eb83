use crate::{
    dashboard::Dashboard,
    error::Result,
    provider::RouteDurationClient,
    scheduler::{AppState, RefreshScheduler},
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drives the scheduler from a fixed-rate tick and redraws after each one.
pub struct CommuteTracker<C> {
    scheduler: RefreshScheduler<C>,
    state: AppState,
    zone: Tz,
    tick_interval: Duration,
}

impl<C: RouteDurationClient + Send + Sync> CommuteTracker<C> {
    pub fn new(
        scheduler: RefreshScheduler<C>,
        state: AppState,
        zone: Tz,
        tick_interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            state,
            zone,
            tick_interval,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.zone)
    }

    /// One tick: refresh if due, then render. Failures become a notice on
    /// the dashboard and leave the previous data in place.
    pub async fn tick(&mut self, now: DateTime<Tz>) -> String {
        let notice = match self.refresh_until_settled(now).await {
            Ok(()) => None,
            Err(err) => {
                error!(?err, "failed to refresh travel time; will retry on a later tick");
                Some(format!("could not refresh travel time: {err}"))
            }
        };

        self.render(now, notice)
    }

    /// Re-evaluates immediately after every fetch so the new measurement is
    /// shown without waiting for the next tick.
    async fn refresh_until_settled(&mut self, now: DateTime<Tz>) -> Result<()> {
        loop {
            let tick = self.scheduler.maybe_refresh(&mut self.state, now).await?;
            if !tick.needs_rerender() {
                debug!(status = ?tick.status, "tick settled");
                return Ok(());
            }
        }
    }

    /// Renders the dashboard at `now` without fetching.
    pub fn render(&self, now: DateTime<Tz>, notice: Option<String>) -> String {
        let decision = self.scheduler.policy().decide(&now);
        let status = self
            .scheduler
            .evaluate(now, &decision, &self.state.refresh);

        Dashboard::new(&self.state, decision, status, now)
            .with_notice(notice)
            .to_string()
    }

    /// Run until `shutdown` is cancelled. Shutdown is only observed between
    /// ticks; an in-flight fetch always completes.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting commute tracker");
        info!("Configuration:");
        info!("  Tick interval: {:?}", self.tick_interval);
        info!(
            "  Refresh interval: {}s",
            self.scheduler.refresh_interval_secs()
        );
        info!("  Morning window: {}", self.scheduler.policy().morning());
        info!("  Evening window: {}", self.scheduler.policy().evening());
        info!("  Timezone: {}", self.zone);
        info!("  Log file: {:?}", self.state.log.path());

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    let now = self.now();
                    let view = self.tick(now).await;
                    println!("{view}");
                }
            }
        }

        if self.state.log.is_empty() {
            warn!("shutting down without any recorded measurements");
        }
        info!(entries = self.state.log.len(), "commute tracker stopped");

        Ok(())
    }
}
