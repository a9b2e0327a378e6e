use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::GeocodeError;

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";
const USER_AGENT: &str = "trial-match/0.1 (clinical research matching)";

/// Resolves a city/state to coordinates via the Nominatim geocoder.
/// Failures never propagate past the caller's `Option`: an unresolvable
/// address just downgrades geographic scoring to neutral.
pub struct Geocoder {
    http: reqwest::Client,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct NominatimHit {
    lat: String,
    lon: String,
}

impl Geocoder {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    pub async fn geocode(&self, city: &str, state: &str) -> Result<(f64, f64), GeocodeError> {
        let query = format!("{city}, {state}, United States");
        let url = format!(
            "{NOMINATIM_URL}?q={}&format=json&limit=1&countrycodes=us",
            urlencoding::encode(&query)
        );

        let response = self
            .http
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;

        let hits: Vec<NominatimHit> = response.json().await?;
        let hit = hits
            .into_iter()
            .next()
            .ok_or_else(|| GeocodeError::NotFound(query.clone()))?;

        let lat = hit
            .lat
            .parse::<f64>()
            .map_err(|_| GeocodeError::NotFound(query.clone()))?;
        let lon = hit
            .lon
            .parse::<f64>()
            .map_err(|_| GeocodeError::NotFound(query))?;

        info!(city, state, lat, lon, "geocoded patient location");
        Ok((lat, lon))
    }

    /// Convenience wrapper that logs and swallows failures.
    pub async fn try_geocode(&self, city: &str, state: &str) -> Option<(f64, f64)> {
        match self.geocode(city, state).await {
            Ok(coords) => Some(coords),
            Err(err) => {
                warn!(city, state, error = %err, "geocoding failed, geographic scoring will be neutral");
                None
            }
        }
    }
}
