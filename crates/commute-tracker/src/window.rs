use crate::error::ConfigError;
use chrono::{DateTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const HOME_LABEL: &str = "Home";
pub const OFFICE_LABEL: &str = "Office";

/// Half-open range of local wall-clock hours, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn new(name: &'static str, start: u32, end: u32) -> Result<Self, ConfigError> {
        let window = Self { start, end };
        window.validate(name)?;
        Ok(window)
    }

    pub fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if self.start >= self.end || self.end > 24 {
            return Err(ConfigError::InvalidWindow {
                name,
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    pub fn contains(&self, hour: u32) -> bool {
        self.start <= hour && hour < self.end
    }

    pub fn overlaps(&self, other: &HourWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for HourWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:02}:00, {:02}:00)", self.start, self.end)
    }
}

/// Direction and tracking flag for one point in time. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowDecision {
    pub is_tracking: bool,
    pub source: String,
    pub destination: String,
    pub source_label: &'static str,
    pub destination_label: &'static str,
}

impl WindowDecision {
    pub fn route_label(&self) -> String {
        format!("{} → {}", self.source_label, self.destination_label)
    }
}

/// Maps local time to a [`WindowDecision`]. Morning is home → office, evening
/// is office → home, anything else is displayed as home → office without
/// tracking.
#[derive(Debug, Clone)]
pub struct TimeWindowPolicy {
    morning: HourWindow,
    evening: HourWindow,
    home: String,
    office: String,
}

impl TimeWindowPolicy {
    pub fn new(
        morning: HourWindow,
        evening: HourWindow,
        home: impl Into<String>,
        office: impl Into<String>,
    ) -> Self {
        Self {
            morning,
            evening,
            home: home.into(),
            office: office.into(),
        }
    }

    pub fn morning(&self) -> HourWindow {
        self.morning
    }

    pub fn evening(&self) -> HourWindow {
        self.evening
    }

    /// Only the local hour of `now` is considered.
    pub fn decide<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> WindowDecision {
        let hour = now.hour();

        if self.morning.contains(hour) {
            self.home_to_office(true)
        } else if self.evening.contains(hour) {
            self.office_to_home()
        } else {
            self.home_to_office(false)
        }
    }

    fn home_to_office(&self, is_tracking: bool) -> WindowDecision {
        WindowDecision {
            is_tracking,
            source: self.home.clone(),
            destination: self.office.clone(),
            source_label: HOME_LABEL,
            destination_label: OFFICE_LABEL,
        }
    }

    fn office_to_home(&self) -> WindowDecision {
        WindowDecision {
            is_tracking: true,
            source: self.office.clone(),
            destination: self.home.clone(),
            source_label: OFFICE_LABEL,
            destination_label: HOME_LABEL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::US::Pacific;

    fn policy() -> TimeWindowPolicy {
        TimeWindowPolicy::new(
            HourWindow::new("morning", 8, 11).unwrap(),
            HourWindow::new("evening", 16, 19).unwrap(),
            "1 Home St",
            "2 Office Ave",
        )
    }

    #[test]
    fn test_morning_window_tracks_home_to_office() {
        let now = Pacific.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        let decision = policy().decide(&now);

        assert!(decision.is_tracking);
        assert_eq!(decision.source, "1 Home St");
        assert_eq!(decision.destination, "2 Office Ave");
        assert_eq!(decision.route_label(), "Home → Office");
    }

    #[test]
    fn test_evening_window_flips_direction() {
        let now = Pacific.with_ymd_and_hms(2024, 3, 4, 16, 0, 0).unwrap();
        let decision = policy().decide(&now);

        assert!(decision.is_tracking);
        assert_eq!(decision.source, "2 Office Ave");
        assert_eq!(decision.destination, "1 Home St");
        assert_eq!(decision.route_label(), "Office → Home");
    }

    #[test]
    fn test_window_end_is_exclusive() {
        let p = policy();
        let at_eleven = Pacific.with_ymd_and_hms(2024, 3, 4, 11, 0, 0).unwrap();
        let before_eleven = Pacific.with_ymd_and_hms(2024, 3, 4, 10, 59, 59).unwrap();
        let at_nineteen = Pacific.with_ymd_and_hms(2024, 3, 4, 19, 0, 0).unwrap();

        assert!(!p.decide(&at_eleven).is_tracking);
        assert!(p.decide(&before_eleven).is_tracking);
        assert!(!p.decide(&at_nineteen).is_tracking);
    }

    #[test]
    fn test_outside_windows_defaults_to_home_to_office() {
        let now = Pacific.with_ymd_and_hms(2024, 3, 4, 13, 0, 0).unwrap();
        let decision = policy().decide(&now);

        assert!(!decision.is_tracking);
        assert_eq!(decision.source_label, HOME_LABEL);
        assert_eq!(decision.destination_label, OFFICE_LABEL);
    }

    #[test]
    fn test_decision_depends_only_on_hour() {
        let p = policy();
        for hour in 0..24 {
            let a = Pacific.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap();
            let b = Pacific.with_ymd_and_hms(2025, 7, 2, hour, 59, 59).unwrap();
            assert_eq!(p.decide(&a), p.decide(&b), "hour {hour}");
        }
    }

    #[test]
    fn test_hour_window_validation() {
        assert!(HourWindow::new("morning", 11, 8).is_err());
        assert!(HourWindow::new("morning", 8, 8).is_err());
        assert!(HourWindow::new("evening", 20, 25).is_err());
        assert!(HourWindow::new("evening", 20, 24).is_ok());
    }

    #[test]
    fn test_overlap_detection() {
        let morning = HourWindow::new("morning", 8, 11).unwrap();
        assert!(morning.overlaps(&HourWindow::new("evening", 10, 12).unwrap()));
        assert!(!morning.overlaps(&HourWindow::new("evening", 11, 12).unwrap()));
        assert!(!morning.overlaps(&HourWindow::new("evening", 16, 19).unwrap()));
    }
}
