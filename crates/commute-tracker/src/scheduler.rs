use crate::{
    error::Result,
    provider::RouteDurationClient,
    store::{Measurement, MeasurementStore},
    window::{TimeWindowPolicy, WindowDecision},
};
use chrono::DateTime;
use chrono_tz::Tz;
use std::path::PathBuf;
use tracing::{debug, info};

const FETCH_SUCCESS_COUNTER: &str = "commute_tracker_fetch_success_total";
const FETCH_FAILURE_COUNTER: &str = "commute_tracker_fetch_failure_total";

/// Outcome of evaluating one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    /// Not inside a tracking window; nothing is fetched.
    OutsideWindow,
    /// Tracking, but nothing was ever fetched.
    NoData,
    /// The refresh interval has fully elapsed since the last fetch.
    Stale,
    /// Within the refresh interval; `remaining` whole seconds to go.
    Fresh { remaining: u64 },
}

impl RefreshStatus {
    pub fn should_fetch(&self) -> bool {
        matches!(self, Self::NoData | Self::Stale)
    }
}

/// Time of the last successful fetch. Recoverable from the log, so it is
/// never persisted on its own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshState {
    pub last_updated: Option<DateTime<Tz>>,
}

impl RefreshState {
    pub fn from_log(log: &MeasurementStore) -> Self {
        Self {
            last_updated: log.last().map(|m| m.timestamp),
        }
    }
}

/// Everything that lives across ticks. Built once at startup, mutated only
/// by [`RefreshScheduler::maybe_refresh`].
#[derive(Debug)]
pub struct AppState {
    pub log: MeasurementStore,
    pub refresh: RefreshState,
}

impl AppState {
    pub fn new(log: MeasurementStore) -> Self {
        let refresh = RefreshState::from_log(&log);
        Self { log, refresh }
    }

    pub fn load(path: impl Into<PathBuf>, zone: Tz) -> Self {
        Self::new(MeasurementStore::load(path, zone))
    }
}

#[derive(Debug, Clone)]
pub struct Tick {
    pub status: RefreshStatus,
    pub decision: WindowDecision,
    /// Set when this tick fetched and recorded a new measurement.
    pub measurement: Option<Measurement>,
}

impl Tick {
    /// The caller should evaluate again and redraw immediately instead of
    /// waiting for the next scheduled tick.
    pub fn needs_rerender(&self) -> bool {
        self.measurement.is_some()
    }
}

/// Decides per tick whether a new measurement is due and records it.
pub struct RefreshScheduler<C> {
    policy: TimeWindowPolicy,
    client: C,
    refresh_interval_secs: u64,
}

impl<C: RouteDurationClient> RefreshScheduler<C> {
    pub fn new(policy: TimeWindowPolicy, client: C, refresh_interval_secs: u64) -> Self {
        Self {
            policy,
            client,
            refresh_interval_secs,
        }
    }

    pub fn policy(&self) -> &TimeWindowPolicy {
        &self.policy
    }

    pub fn refresh_interval_secs(&self) -> u64 {
        self.refresh_interval_secs
    }

    /// Pure state evaluation, no fetch.
    pub fn evaluate(
        &self,
        now: DateTime<Tz>,
        decision: &WindowDecision,
        refresh: &RefreshState,
    ) -> RefreshStatus {
        if !decision.is_tracking {
            return RefreshStatus::OutsideWindow;
        }

        let Some(last_updated) = refresh.last_updated else {
            return RefreshStatus::NoData;
        };

        let interval_ms = i64::try_from(self.refresh_interval_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        let elapsed_ms = now.signed_duration_since(last_updated).num_milliseconds();

        // Strictly greater: a tick landing exactly on the boundary stays fresh
        if elapsed_ms > interval_ms {
            RefreshStatus::Stale
        } else {
            let remaining = (interval_ms - elapsed_ms.max(0)) / 1000;
            RefreshStatus::Fresh {
                remaining: remaining as u64,
            }
        }
    }

    /// Evaluates the tick at `now` and fetches when the state calls for it.
    ///
    /// Provider and storage failures propagate. In both cases nothing is
    /// appended and `last_updated` is left alone, so a later tick retries.
    pub async fn maybe_refresh(&self, state: &mut AppState, now: DateTime<Tz>) -> Result<Tick> {
        let decision = self.policy.decide(&now);
        let status = self.evaluate(now, &decision, &state.refresh);

        if !status.should_fetch() {
            debug!(?status, "no fetch needed");
            return Ok(Tick {
                status,
                decision,
                measurement: None,
            });
        }

        info!(?status, route = %decision.route_label(), "fetching travel time");

        let duration = match self
            .client
            .fetch_duration(&decision.source, &decision.destination)
            .await
        {
            Ok(duration) => duration,
            Err(err) => {
                metrics::counter!(FETCH_FAILURE_COUNTER).increment(1);
                return Err(err.into());
            }
        };

        let measurement = Measurement::new(now, duration, decision.route_label());
        state.log.append(measurement.clone())?;
        state.refresh.last_updated = Some(now);

        metrics::counter!(FETCH_SUCCESS_COUNTER).increment(1);
        info!(
            duration = %measurement.duration,
            seconds = duration.seconds,
            entries = state.log.len(),
            "recorded travel time"
        );

        Ok(Tick {
            status,
            decision,
            measurement: Some(measurement),
        })
    }
}
