use crate::{
    scheduler::{AppState, RefreshStatus},
    store::Measurement,
    window::WindowDecision,
};
use chrono::DateTime;
use chrono_tz::Tz;
use std::fmt;
use tabled::{Table, Tabled, settings::Style};

const TIME_FORMAT: &str = "%B %d, %Y %I:%M %p";
const CLOCK_FORMAT: &str = "%I:%M %p";

#[derive(Debug, Clone, Tabled)]
pub struct MeasurementRow {
    #[tabled(rename = "Route")]
    pub route: String,
    #[tabled(rename = "Time")]
    pub time: String,
    #[tabled(rename = "Duration")]
    pub duration: String,
}

/// Read-only view of the state for one redraw.
pub struct Dashboard<'a> {
    now: DateTime<Tz>,
    decision: WindowDecision,
    status: RefreshStatus,
    latest: Option<&'a Measurement>,
    today: Vec<&'a Measurement>,
    last_updated: Option<DateTime<Tz>>,
    notice: Option<String>,
}

impl<'a> Dashboard<'a> {
    pub fn new(
        state: &'a AppState,
        decision: WindowDecision,
        status: RefreshStatus,
        now: DateTime<Tz>,
    ) -> Self {
        let today = now.date_naive();
        Self {
            now,
            decision,
            status,
            latest: state.log.latest_on(today),
            today: state.log.entries_on_desc(today),
            last_updated: state.refresh.last_updated,
            notice: None,
        }
    }

    /// Non-fatal message shown above the table, e.g. a failed fetch.
    pub fn with_notice(mut self, notice: Option<String>) -> Self {
        self.notice = notice;
        self
    }

    /// Legacy entries without a route are labelled with the current
    /// direction.
    pub fn rows(&self) -> Vec<MeasurementRow> {
        let fallback = self.decision.route_label();
        self.today
            .iter()
            .map(|m| MeasurementRow {
                route: m.route_or(&fallback).to_string(),
                time: m.timestamp.format(TIME_FORMAT).to_string(),
                duration: m.duration.clone(),
            })
            .collect()
    }
}

impl fmt::Display for Dashboard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "What's My Commute ({})", self.now.format(TIME_FORMAT))?;

        if let Some(latest) = self.latest {
            writeln!(
                f,
                "Most recent travel time: {} at {}",
                latest.duration,
                latest.timestamp.format(CLOCK_FORMAT)
            )?;
        }

        writeln!(f, "Current route: {}", self.decision.route_label())?;

        match self.status {
            RefreshStatus::OutsideWindow => {
                writeln!(f, "Outside tracking hours, not refreshing")?;
            }
            RefreshStatus::NoData | RefreshStatus::Stale => writeln!(f, "Refresh due")?,
            RefreshStatus::Fresh { remaining } => {
                writeln!(f, "Using cached data. Next refresh in {remaining} seconds")?;
            }
        }

        if let Some(notice) = &self.notice {
            writeln!(f, "Warning: {notice}")?;
        }

        let rows = self.rows();
        if rows.is_empty() {
            return writeln!(f, "No travel time data available for today.");
        }

        if let Some(last_updated) = self.last_updated {
            writeln!(f, "Last updated at: {}", last_updated.format(TIME_FORMAT))?;
        }

        writeln!(f, "{}", Table::new(rows).with(Style::psql()))
    }
}
