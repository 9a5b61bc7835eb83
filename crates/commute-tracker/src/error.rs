use reqwest::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T = ()> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("routing provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("failed to write measurement log {path:?}: {source}")]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize measurement log: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("measurement at {new} is older than the last logged entry at {last}")]
    OutOfOrder { last: String, new: String },
}

/// Failures of a single routing call. All variants are handled the same way
/// by the scheduler: nothing is recorded and the next tick retries.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("no route found from {origin:?} to {destination:?}")]
    NoRoute { origin: String, destination: String },
    #[error("unparsable route duration {0:?}")]
    InvalidDuration(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid hour window {name} [{start}, {end})")]
    InvalidWindow {
        name: &'static str,
        start: u32,
        end: u32,
    },
    #[error("morning window [{0}, {1}) overlaps evening window [{2}, {3})")]
    OverlappingWindows(u32, u32, u32, u32),
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
    #[error("refresh interval must be greater than 0")]
    ZeroInterval,
    #[error("invalid log level {0:?}")]
    LogLevel(String),
    #[error("invalid provider endpoint {0:?}")]
    Endpoint(String),
    #[error("invalid metrics listen address {0}")]
    MetricsAddr(std::net::SocketAddr),
}
