use crate::{
    error::{Error, Result},
    provider::TravelDuration,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Version written by [`MeasurementStore::append`]. Version 0 is the legacy
/// bare-array layout with optional offsets and route labels.
pub const LOG_FORMAT_VERSION: u32 = 1;

const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// One recorded observation. Immutable once appended.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub timestamp: DateTime<Tz>,
    pub duration: String,
    pub duration_seconds: Option<u64>,
    /// Absent only for entries migrated from the legacy layout.
    pub route: Option<String>,
}

impl Measurement {
    pub fn new(timestamp: DateTime<Tz>, duration: TravelDuration, route: String) -> Self {
        Self {
            timestamp,
            duration: duration.display_text(),
            duration_seconds: Some(duration.seconds),
            route: Some(route),
        }
    }

    /// Route label, falling back to `fallback` for legacy entries.
    pub fn route_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.route.as_deref().unwrap_or(fallback)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LogFile {
    version: u32,
    entries: Vec<StoredMeasurement>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredMeasurement {
    timestamp: String,
    duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    route: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OnDisk {
    Versioned(LogFile),
    Legacy(Vec<StoredMeasurement>),
}

impl From<&Measurement> for StoredMeasurement {
    fn from(m: &Measurement) -> Self {
        Self {
            timestamp: m.timestamp.to_rfc3339(),
            duration: m.duration.clone(),
            duration_seconds: m.duration_seconds,
            route: m.route.clone(),
        }
    }
}

/// Append-only measurement log backed by a single JSON file.
///
/// Single writer only: the whole file is rewritten on every append, so two
/// processes sharing one path silently drop each other's entries.
#[derive(Debug)]
pub struct MeasurementStore {
    path: PathBuf,
    entries: Vec<Measurement>,
    /// Set when the file on disk holds data this process could not load.
    write_blocked: Option<String>,
}

impl MeasurementStore {
    /// Loads the log at `path`. Never fails: a missing, empty or corrupt file
    /// yields an empty log. Corrupt files are copied aside first.
    ///
    /// If the existing file could not be read, or could not be backed up, the
    /// store refuses to save so the original is never overwritten.
    pub fn load(path: impl Into<PathBuf>, zone: Tz) -> Self {
        let path = path.into();
        let mut write_blocked = None;
        let entries = match read_log(&path) {
            Ok(Some(on_disk)) => migrate(on_disk, zone),
            Ok(None) => Vec::new(),
            Err(ReadError::Io(err)) => {
                warn!(
                    path = %path.display(),
                    %err,
                    "measurement log unreadable, starting empty and leaving the file in place"
                );
                write_blocked = Some(format!("existing log could not be read: {err}"));
                Vec::new()
            }
            Err(ReadError::Corrupt(reason)) => {
                let backup = backup_path(&path);
                warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    %reason,
                    "measurement log corrupt, starting with an empty log"
                );
                if let Err(err) = fs::copy(&path, &backup) {
                    warn!(%err, "failed to back up corrupt measurement log");
                    write_blocked = Some(format!("corrupt log could not be backed up: {err}"));
                }
                Vec::new()
            }
        };

        info!(path = %path.display(), entries = entries.len(), "loaded measurement log");

        Self {
            path,
            entries,
            write_blocked,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[Measurement] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&Measurement> {
        self.entries.last()
    }

    /// Appends and persists the whole log. On a write failure the entry is
    /// dropped from memory as well, so memory and disk stay in agreement.
    pub fn append(&mut self, measurement: Measurement) -> Result<()> {
        if let Some(last) = self.entries.last() {
            if measurement.timestamp < last.timestamp {
                return Err(Error::OutOfOrder {
                    last: last.timestamp.to_rfc3339(),
                    new: measurement.timestamp.to_rfc3339(),
                });
            }
        }

        self.entries.push(measurement);
        if let Err(err) = self.save() {
            self.entries.pop();
            return Err(err);
        }
        Ok(())
    }

    /// Entries whose local calendar date is `date`, in append order.
    pub fn entries_on(&self, date: NaiveDate) -> Vec<&Measurement> {
        self.entries
            .iter()
            .filter(|m| m.timestamp.date_naive() == date)
            .collect()
    }

    /// Same as [`Self::entries_on`], newest first.
    pub fn entries_on_desc(&self, date: NaiveDate) -> Vec<&Measurement> {
        let mut entries = self.entries_on(date);
        entries.reverse();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries
    }

    /// Newest entry on `date`; ties go to the one appended last.
    pub fn latest_on(&self, date: NaiveDate) -> Option<&Measurement> {
        self.entries
            .iter()
            .filter(|m| m.timestamp.date_naive() == date)
            .max_by_key(|m| m.timestamp)
    }

    fn save(&self) -> Result<()> {
        let write_err = |source: std::io::Error| Error::StorageWrite {
            path: self.path.clone(),
            source,
        };

        if let Some(reason) = &self.write_blocked {
            return Err(write_err(std::io::Error::other(reason.clone())));
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let log = LogFile {
            version: LOG_FORMAT_VERSION,
            entries: self.entries.iter().map(StoredMeasurement::from).collect(),
        };
        let contents = serde_json::to_string_pretty(&log)?;

        let mut temp_path = self.path.as_os_str().to_owned();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        {
            let mut temp_file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(write_err)?;
            temp_file
                .write_all(contents.as_bytes())
                .map_err(write_err)?;
            temp_file.sync_all().map_err(write_err)?;
        }

        fs::rename(&temp_path, &self.path).map_err(write_err)?;

        debug!(path = %self.path.display(), entries = self.entries.len(), "saved measurement log");
        Ok(())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".backup");
    PathBuf::from(backup)
}

enum ReadError {
    /// The file exists but its bytes could not be read.
    Io(std::io::Error),
    /// The bytes were read but are not a measurement log.
    Corrupt(String),
}

/// `Ok(None)` for an absent or blank file.
fn read_log(path: &Path) -> std::result::Result<Option<OnDisk>, ReadError> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no measurement log yet");
            return Ok(None);
        }
        Err(err) => return Err(ReadError::Io(err)),
    };

    if contents.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    serde_json::from_slice(&contents)
        .map(Some)
        .map_err(|err| ReadError::Corrupt(err.to_string()))
}

/// Upgrades whatever layout was on disk to in-memory measurements in `zone`.
fn migrate(on_disk: OnDisk, zone: Tz) -> Vec<Measurement> {
    let (version, stored) = match on_disk {
        OnDisk::Versioned(log) => (log.version, log.entries),
        OnDisk::Legacy(entries) => (0, entries),
    };

    if version > LOG_FORMAT_VERSION {
        warn!(
            version,
            supported = LOG_FORMAT_VERSION,
            "measurement log written by a newer version"
        );
    } else if version < LOG_FORMAT_VERSION {
        info!(from = version, to = LOG_FORMAT_VERSION, "migrating measurement log");
    }

    stored
        .into_iter()
        .filter_map(|entry| match parse_timestamp(&entry.timestamp, zone) {
            Some(timestamp) => Some(Measurement {
                timestamp,
                duration: entry.duration,
                duration_seconds: entry.duration_seconds,
                route: entry.route,
            }),
            None => {
                warn!(timestamp = %entry.timestamp, "dropping measurement with unusable timestamp");
                None
            }
        })
        .collect()
}

/// Offset-aware timestamps are converted into `zone`; naive ones are taken as
/// wall-clock time in `zone`.
fn parse_timestamp(raw: &str, zone: Tz) -> Option<DateTime<Tz>> {
    if let Ok(aware) = DateTime::parse_from_rfc3339(raw) {
        return Some(aware.with_timezone(&zone));
    }

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .and_then(|naive| zone.from_local_datetime(&naive).earliest())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use chrono_tz::US::Pacific;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Tz> {
        Pacific.with_ymd_and_hms(2024, 3, 4, h, m, s).unwrap()
    }

    fn measurement(timestamp: DateTime<Tz>, seconds: u64) -> Measurement {
        Measurement::new(
            timestamp,
            TravelDuration::from_secs(seconds),
            "Home → Office".to_string(),
        )
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = MeasurementStore::load(dir.path().join("log.json"), Pacific);
        assert!(store.is_empty());
    }

    #[test]
    fn test_blank_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        fs::write(&path, "  \n").unwrap();

        assert!(MeasurementStore::load(&path, Pacific).is_empty());
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn test_garbage_loads_empty_and_backs_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        fs::write(&path, [0xde, 0xad, 0xbe, 0xef, 0x00, 0x7b]).unwrap();

        let store = MeasurementStore::load(&path, Pacific);

        assert!(store.is_empty());
        assert!(backup_path(&path).exists());
    }

    #[test]
    fn test_append_persists_whole_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("log.json");

        let mut store = MeasurementStore::load(&path, Pacific);
        store.append(measurement(at(9, 0, 0), 1500)).unwrap();
        store.append(measurement(at(9, 5, 1), 1620)).unwrap();

        let reloaded = MeasurementStore::load(&path, Pacific);
        assert_eq!(reloaded.entries(), store.entries());
        assert_eq!(reloaded.entries()[1].duration, "27 min");
        assert_eq!(reloaded.entries()[1].duration_seconds, Some(1620));
    }

    #[test]
    fn test_out_of_order_append_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = MeasurementStore::load(dir.path().join("log.json"), Pacific);
        store.append(measurement(at(9, 5, 0), 1500)).unwrap();

        let err = store.append(measurement(at(9, 0, 0), 1500)).unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { .. }));
        assert_eq!(store.len(), 1);

        // Equal timestamps keep the log non-decreasing
        store.append(measurement(at(9, 5, 0), 1600)).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_write_failure_rolls_back() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let mut store = MeasurementStore::load(blocker.join("log.json"), Pacific);
        let err = store.append(measurement(at(9, 0, 0), 1500)).unwrap_err();

        assert!(matches!(err, Error::StorageWrite { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_unreadable_log_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        // Reading a directory fails with an I/O error rather than bad JSON
        let path = dir.path().join("log.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "history").unwrap();

        let mut store = MeasurementStore::load(&path, Pacific);
        assert!(store.is_empty());

        let err = store.append(measurement(at(9, 0, 0), 1500)).unwrap_err();
        assert!(matches!(err, Error::StorageWrite { .. }));
        assert!(store.is_empty());
        assert!(path.is_dir());
        assert_eq!(fs::read_to_string(path.join("keep")).unwrap(), "history");
    }

    #[test]
    fn test_corrupt_log_with_backup_still_accepts_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        fs::write(&path, "{not json").unwrap();

        let mut store = MeasurementStore::load(&path, Pacific);
        store.append(measurement(at(9, 0, 0), 1500)).unwrap();

        assert_eq!(fs::read_to_string(backup_path(&path)).unwrap(), "{not json");
        assert_eq!(MeasurementStore::load(&path, Pacific).len(), 1);
    }

    #[test]
    fn test_entries_on_uses_local_date() {
        let dir = TempDir::new().unwrap();
        let mut store = MeasurementStore::load(dir.path().join("log.json"), Pacific);

        let late_evening = Pacific.with_ymd_and_hms(2024, 3, 3, 23, 30, 0).unwrap();
        store.append(measurement(late_evening, 900)).unwrap();
        store.append(measurement(at(9, 0, 0), 1500)).unwrap();
        store.append(measurement(at(16, 0, 0), 1800)).unwrap();

        let today = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2024, 3, 3).unwrap();

        // 23:30 PST is already March 4th in UTC
        assert_eq!(store.entries_on(yesterday).len(), 1);
        assert_eq!(store.entries_on(today).len(), 2);
        assert_eq!(store.entries_on(today)[0].timestamp, at(9, 0, 0));

        let desc = store.entries_on_desc(today);
        assert_eq!(desc[0].timestamp, at(16, 0, 0));
        assert_eq!(desc[1].timestamp, at(9, 0, 0));
    }

    #[test]
    fn test_latest_on_prefers_last_appended_tie() {
        let dir = TempDir::new().unwrap();
        let mut store = MeasurementStore::load(dir.path().join("log.json"), Pacific);
        let today = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        assert!(store.latest_on(today).is_none());

        store.append(measurement(at(9, 0, 0), 1500)).unwrap();
        store.append(measurement(at(9, 0, 0), 1740)).unwrap();

        assert_eq!(store.latest_on(today).unwrap().duration_seconds, Some(1740));
        assert!(store.latest_on(today + Duration::days(1)).is_none());
    }

    #[test]
    fn test_legacy_array_is_migrated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        let legacy = r#"[
            {"timestamp": "2024-03-04T09:00:00", "duration": "25 mins"},
            {"timestamp": "2024-03-04 09:05:01.250", "duration": "26 mins"},
            {"timestamp": "2024-03-04T17:10:00Z", "duration": "31 mins", "route": "Office → Home"},
            {"timestamp": "yesterday-ish", "duration": "1 min"}
        ]"#;
        fs::write(&path, legacy).unwrap();

        let store = MeasurementStore::load(&path, Pacific);
        let entries = store.entries();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].timestamp, at(9, 0, 0));
        assert_eq!(entries[0].route, None);
        assert_eq!(entries[0].duration_seconds, None);
        assert_eq!(entries[0].route_or("Home → Office"), "Home → Office");
        assert_eq!(entries[1].timestamp.naive_local().time().to_string(), "09:05:01.250");
        // 17:10 UTC is 09:10 PST
        assert_eq!(entries[2].timestamp, at(9, 10, 0));
        assert_eq!(entries[2].route_or("Home → Office"), "Office → Home");
    }

    #[test]
    fn test_migrated_log_rewritten_in_current_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        fs::write(
            &path,
            r#"[{"timestamp": "2024-03-04T08:30:00", "duration": "22 mins"}]"#,
        )
        .unwrap();

        let mut store = MeasurementStore::load(&path, Pacific);
        store.append(measurement(at(9, 0, 0), 1500)).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], LOG_FORMAT_VERSION);
        assert_eq!(raw["entries"].as_array().unwrap().len(), 2);
        assert_eq!(raw["entries"][0]["timestamp"], "2024-03-04T08:30:00-08:00");
        assert!(raw["entries"][0].get("route").is_none());
    }
}
