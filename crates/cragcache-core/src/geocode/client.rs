use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum GeocodeError {
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("No address found for location")]
    NoResult,

    #[error("Geocoding upstream failed: {0}")]
    Upstream(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Reverse geocoding result returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub display_name: String,
    pub country: Option<String>,
    pub country_code: String,
    pub region: Option<String>,
    pub locality: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    address: Option<NominatimAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    country: Option<String>,
    country_code: Option<String>,
    state: Option<String>,
    county: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    hamlet: Option<String>,
}

impl NominatimResponse {
    fn into_result(self) -> Result<GeocodeResult, GeocodeError> {
        if let Some(error) = self.error {
            debug!(error = %error, "Upstream returned no result");
            return Err(GeocodeError::NoResult);
        }
        let address = self.address.unwrap_or_default();
        let country_code = address
            .country_code
            .filter(|c| !c.is_empty())
            .map(|c| c.to_lowercase())
            .ok_or(GeocodeError::NoResult)?;

        Ok(GeocodeResult {
            display_name: self.display_name.unwrap_or_default(),
            country: address.country,
            country_code,
            region: address.state.or(address.county),
            locality: address.city.or(address.town).or(address.village).or(address.hamlet),
        })
    }
}

/// Latitude must lie in [-90, 90] and longitude in [-180, 180].
pub fn validate_coordinates(lat: f64, lng: f64) -> Result<(), GeocodeError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(GeocodeError::InvalidCoordinates(format!("latitude {} out of range", lat)));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(GeocodeError::InvalidCoordinates(format!("longitude {} out of range", lng)));
    }
    Ok(())
}

/// Client for a Nominatim-compatible reverse geocoding service.
#[derive(Clone)]
pub struct Geocoder {
    client: Client,
    base_url: String,
}

impl Geocoder {
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve a coordinate pair to an address. No retries: an upstream
    /// failure is reported as-is.
    pub async fn reverse(&self, lat: f64, lng: f64) -> Result<GeocodeResult, GeocodeError> {
        validate_coordinates(lat, lng)?;

        let url = format!("{}/reverse", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", lat.to_string()),
                ("lon", lng.to_string()),
                ("zoom", "10".to_string()),
                ("addressdetails", "1".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Geocoding upstream returned an error");
            return Err(GeocodeError::Upstream(format!("status {}", status)));
        }

        let body: NominatimResponse = response
            .json()
            .await
            .map_err(|e| GeocodeError::Upstream(format!("unreadable response: {}", e)))?;
        body.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_validate_coordinates() {
        assert!(validate_coordinates(49.45, -2.58).is_ok());
        assert!(validate_coordinates(90.0, 180.0).is_ok());
        assert!(validate_coordinates(90.1, 0.0).is_err());
        assert!(validate_coordinates(0.0, -180.5).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
    }

    #[tokio::test]
    async fn test_reverse_guernsey() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reverse"))
            .and(query_param("lat", "49.45"))
            .and(query_param("lon", "-2.58"))
            .and(header("user-agent", "cragcache-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "display_name": "St Peter Port, Guernsey",
                "address": {
                    "town": "St Peter Port",
                    "country": "Guernsey",
                    "country_code": "GG"
                }
            })))
            .mount(&server)
            .await;

        let geocoder = Geocoder::new(&server.uri(), "cragcache-test").unwrap();
        let result = geocoder.reverse(49.45, -2.58).await.unwrap();
        assert!(!result.country_code.is_empty());
        assert_eq!(result.country_code, "gg");
        assert_eq!(result.locality.as_deref(), Some("St Peter Port"));
    }

    #[tokio::test]
    async fn test_reverse_no_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reverse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "Unable to geocode"})))
            .mount(&server)
            .await;

        let geocoder = Geocoder::new(&server.uri(), "cragcache-test").unwrap();
        assert!(matches!(geocoder.reverse(0.0, -30.0).await, Err(GeocodeError::NoResult)));
    }

    #[tokio::test]
    async fn test_reverse_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let geocoder = Geocoder::new(&server.uri(), "cragcache-test").unwrap();
        assert!(matches!(geocoder.reverse(49.45, -2.58).await, Err(GeocodeError::Upstream(_))));
    }

    #[tokio::test]
    async fn test_invalid_coordinates_skip_upstream() {
        let geocoder = Geocoder::new("http://127.0.0.1:9", "cragcache-test").unwrap();
        assert!(matches!(
            geocoder.reverse(123.0, 0.0).await,
            Err(GeocodeError::InvalidCoordinates(_))
        ));
    }
}
