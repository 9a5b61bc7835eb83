use crate::{error::ProviderError, settings::ProviderSettings};
use async_trait::async_trait;
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const API_KEY_HEADER: &str = "X-Goog-Api-Key";
const FIELD_MASK_HEADER: &str = "X-Goog-FieldMask";
const FIELD_MASK: &str = "routes.duration,routes.distanceMeters";

/// Driving time returned by the routing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TravelDuration {
    pub seconds: u64,
}

impl TravelDuration {
    pub fn from_secs(seconds: u64) -> Self {
        Self { seconds }
    }

    /// Whole minutes, truncated.
    pub fn display_text(&self) -> String {
        format!("{} min", self.seconds / 60)
    }
}

/// One call per fetch. Implementations must not retry or cache.
#[automock]
#[async_trait]
pub trait RouteDurationClient {
    async fn fetch_duration(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<TravelDuration, ProviderError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComputeRoutesRequest<'a> {
    origin: Waypoint<'a>,
    destination: Waypoint<'a>,
    travel_mode: &'static str,
    routing_preference: &'static str,
}

#[derive(Debug, Serialize)]
struct Waypoint<'a> {
    address: &'a str,
}

#[derive(Debug, Deserialize)]
struct ComputeRoutesResponse {
    #[serde(default)]
    routes: Vec<RouteSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteSummary {
    duration: Option<String>,
    #[allow(dead_code)]
    distance_meters: Option<u64>,
}

/// Traffic-aware driving directions over HTTP.
pub struct RoutesApiClient {
    http: Client,
    endpoint: Url,
    api_key: String,
}

impl RoutesApiClient {
    pub fn new(
        endpoint: Url,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint,
            api_key: api_key.into(),
        })
    }

    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Self::new(
            settings.endpoint.clone(),
            settings.api_key.clone(),
            Duration::from_secs(settings.timeout_seconds),
        )
    }
}

#[async_trait]
impl RouteDurationClient for RoutesApiClient {
    async fn fetch_duration(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<TravelDuration, ProviderError> {
        info!(origin, destination, "requesting driving duration");

        let request = ComputeRoutesRequest {
            origin: Waypoint { address: origin },
            destination: Waypoint {
                address: destination,
            },
            travel_mode: "DRIVE",
            routing_preference: "TRAFFIC_AWARE",
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(API_KEY_HEADER, self.api_key.as_str())
            .header(FIELD_MASK_HEADER, FIELD_MASK)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let body: ComputeRoutesResponse = response.json().await?;
        debug!(routes = body.routes.len(), "routing response received");

        let raw = body
            .routes
            .into_iter()
            .next()
            .and_then(|route| route.duration)
            .ok_or_else(|| ProviderError::NoRoute {
                origin: origin.to_string(),
                destination: destination.to_string(),
            })?;

        Ok(TravelDuration::from_secs(parse_duration(&raw)?))
    }
}

/// Parses a protobuf duration string such as `"1234s"` or `"1234.5s"`.
fn parse_duration(raw: &str) -> Result<u64, ProviderError> {
    let invalid = || ProviderError::InvalidDuration(raw.to_string());
    let number = raw.trim().strip_suffix('s').ok_or_else(invalid)?;

    if let Ok(seconds) = number.parse::<u64>() {
        return Ok(seconds);
    }

    match number.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(seconds.trunc() as u64),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_text_truncates_minutes() {
        assert_eq!(TravelDuration::from_secs(0).display_text(), "0 min");
        assert_eq!(TravelDuration::from_secs(59).display_text(), "0 min");
        assert_eq!(TravelDuration::from_secs(119).display_text(), "1 min");
        assert_eq!(TravelDuration::from_secs(1534).display_text(), "25 min");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1234s").unwrap(), 1234);
        assert_eq!(parse_duration("90.9s").unwrap(), 90);
        assert!(parse_duration("1234").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("abcs").is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let request = ComputeRoutesRequest {
            origin: Waypoint { address: "A" },
            destination: Waypoint { address: "B" },
            travel_mode: "DRIVE",
            routing_preference: "TRAFFIC_AWARE",
        };
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["origin"]["address"], "A");
        assert_eq!(json["destination"]["address"], "B");
        assert_eq!(json["travelMode"], "DRIVE");
        assert_eq!(json["routingPreference"], "TRAFFIC_AWARE");
        // Departure defaults to the time the provider receives the request
        assert!(json.get("departureTime").is_none());
    }
}
