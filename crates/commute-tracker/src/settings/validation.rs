use crate::{error::ConfigError, settings::Settings};
use std::net::{IpAddr, SocketAddr};

/// Validate the configuration values
///
/// Any error here means the tracker must not attempt a fetch.
pub fn validate_config(settings: &Settings) -> Result<(), ConfigError> {
    // Validate log level
    let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&settings.log_level.to_lowercase().as_str()) {
        return Err(ConfigError::LogLevel(settings.log_level.clone()));
    }

    // Validate route
    if settings.route.source_address.trim().is_empty() {
        return Err(ConfigError::Missing("route.source_address"));
    }
    if settings.route.destination_address.trim().is_empty() {
        return Err(ConfigError::Missing("route.destination_address"));
    }

    // Validate provider
    if settings.provider.api_key.trim().is_empty() {
        return Err(ConfigError::Missing("provider.api_key"));
    }
    let scheme = settings.provider.endpoint.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(ConfigError::Endpoint(
            settings.provider.endpoint.to_string(),
        ));
    }

    // Validate schedule
    let schedule = &settings.schedule;
    if schedule.refresh_interval_seconds == 0 || schedule.tick_seconds == 0 {
        return Err(ConfigError::ZeroInterval);
    }

    schedule.morning_window.validate("morning_window")?;
    schedule.evening_window.validate("evening_window")?;

    if schedule.morning_window.overlaps(&schedule.evening_window) {
        return Err(ConfigError::OverlappingWindows(
            schedule.morning_window.start,
            schedule.morning_window.end,
            schedule.evening_window.start,
            schedule.evening_window.end,
        ));
    }

    settings.timezone()?;

    // Validate storage
    if settings.storage.log_file.trim().is_empty() {
        return Err(ConfigError::Missing("storage.log_file"));
    }

    if let Some(metrics) = &settings.metrics {
        if !validate_socket_addr(&metrics.addr) {
            return Err(ConfigError::MetricsAddr(metrics.addr));
        }
    }

    Ok(())
}

fn validate_socket_addr(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(ipv4) => !ipv4.is_broadcast() && !ipv4.is_multicast(),
        IpAddr::V6(ipv6) => !ipv6.is_unspecified() && !ipv6.is_multicast(),
    }
}
