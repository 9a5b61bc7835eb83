//! Tracks driving time between two fixed addresses during configured daily
//! windows.
//!
//! Each tick asks the [`scheduler::RefreshScheduler`] whether a measurement is
//! due. The [`window::TimeWindowPolicy`] picks the direction of travel, the
//! [`provider::RouteDurationClient`] fetches the duration and the
//! [`store::MeasurementStore`] keeps the append-only log across restarts.

pub mod dashboard;
mod error;
pub mod provider;
pub mod runner;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod window;

pub use error::{ConfigError, Error, ProviderError, Result};
