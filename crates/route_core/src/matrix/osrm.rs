//! OSRM HTTP backend: `/table` and `/route` queries with retry + backoff.
//!
//! Transient failures (connect errors, timeouts, 5xx) are retried with
//! exponential backoff and ±20% jitter; client errors and malformed bodies
//! fail permanently. Missing table entries become the unreachable sentinel.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::MatrixConfig;
use crate::error::CoreError;
use crate::geo::Coordinate;
use crate::model::UNREACHABLE;

use super::{MatrixBackend, Overview, RouteGeometry, TableSlice};

/// Thin client over one OSRM endpoint and profile.
pub struct OsrmMatrixBackend {
    client: Client,
    endpoint: String,
    profile: String,
    config: MatrixConfig,
}

enum AttemptError {
    /// Worth retrying: connect failure, timeout, 5xx.
    Transient(String),
    /// Not worth retrying: 4xx, malformed body, bad response code.
    Permanent(CoreError),
}

impl OsrmMatrixBackend {
    pub fn new(endpoint: &str, profile: &str, config: MatrixConfig) -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.backend_timeout_s))
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            profile: profile.to_string(),
            config,
        })
    }

    fn coord_segment(coords: &[Coordinate]) -> String {
        coords
            .iter()
            .map(Coordinate::to_lon_lat)
            .collect::<Vec<_>>()
            .join(";")
    }

    fn index_list(indices: &[usize]) -> String {
        indices
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Exponential backoff with ±20% jitter: base × factor^attempt.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_base_s * 2f64.powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_secs_f64((base * jitter).max(0.05))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, AttemptError> {
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                AttemptError::Transient(format!("request failed: {e}"))
            } else {
                AttemptError::Permanent(CoreError::BackendUnavailable(format!(
                    "osrm request error: {e}"
                )))
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AttemptError::Transient(format!("server error {status}")));
        }
        if status != StatusCode::OK {
            return Err(AttemptError::Permanent(CoreError::BackendUnavailable(
                format!("osrm returned {status} for {url}"),
            )));
        }

        response.json::<T>().await.map_err(|e| {
            AttemptError::Permanent(CoreError::BackendUnavailable(format!(
                "malformed osrm body: {e}"
            )))
        })
    }

    /// Run `url` with the retry policy and parse the body as `T`.
    async fn get_with_retry<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
    ) -> Result<T, CoreError> {
        let mut last_transient = String::new();
        for attempt in 0..self.config.retry_attempts {
            match self.get_json::<T>(url.clone()).await {
                Ok(parsed) => return Ok(parsed),
                Err(AttemptError::Permanent(err)) => return Err(err),
                Err(AttemptError::Transient(reason)) => {
                    last_transient = reason;
                    if attempt + 1 < self.config.retry_attempts {
                        let delay = self.backoff_delay(attempt);
                        warn!(
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            reason = %last_transient,
                            "osrm call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(CoreError::BackendUnavailable(format!(
            "osrm unreachable after {} attempts: {last_transient}",
            self.config.retry_attempts
        )))
    }
}

// ---------------------------------------------------------------------------
// OSRM wire format
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct OsrmTableResponse {
    code: String,
    durations: Option<Vec<Vec<Option<f64>>>>,
    distances: Option<Vec<Vec<Option<f64>>>>,
}

#[derive(Deserialize)]
struct OsrmRouteResponse {
    code: String,
    routes: Option<Vec<OsrmRoute>>,
}

#[derive(Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    geometry: OsrmGeometry,
}

#[derive(Deserialize)]
struct OsrmGeometry {
    /// GeoJSON positions: `[lon, lat]`.
    coordinates: Vec<Vec<f64>>,
}

fn grid_from_wire(wire: Vec<Vec<Option<f64>>>) -> Vec<Vec<f64>> {
    wire.into_iter()
        .map(|row| row.into_iter().map(|v| v.unwrap_or(UNREACHABLE)).collect())
        .collect()
}

#[async_trait]
impl MatrixBackend for OsrmMatrixBackend {
    async fn table(
        &self,
        coords: &[Coordinate],
        sources: Option<&[usize]>,
        destinations: Option<&[usize]>,
    ) -> Result<TableSlice, CoreError> {
        if coords.is_empty() {
            return Err(CoreError::InvalidInput("empty coordinate list".into()));
        }

        let base = format!(
            "{}/table/v1/{}/{}",
            self.endpoint,
            self.profile,
            Self::coord_segment(coords)
        );
        let mut url = Url::parse(&base)
            .map_err(|e| CoreError::InvalidInput(format!("failed to build OSRM URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("annotations", "duration,distance");
            if let Some(sources) = sources {
                query.append_pair("sources", &Self::index_list(sources));
            }
            if let Some(destinations) = destinations {
                query.append_pair("destinations", &Self::index_list(destinations));
            }
        }

        let parsed: OsrmTableResponse = self.get_with_retry(url).await?;
        if parsed.code != "Ok" {
            return Err(CoreError::BackendUnavailable(format!(
                "osrm table error code: {}",
                parsed.code
            )));
        }
        let durations = parsed
            .durations
            .ok_or_else(|| CoreError::BackendUnavailable("osrm table without durations".into()))?;
        let distances = parsed
            .distances
            .ok_or_else(|| CoreError::BackendUnavailable("osrm table without distances".into()))?;

        let n_sources = sources.map_or(coords.len(), <[usize]>::len);
        let n_dests = destinations.map_or(coords.len(), <[usize]>::len);
        if durations.len() != n_sources || durations.iter().any(|r| r.len() != n_dests) {
            return Err(CoreError::BackendUnavailable(format!(
                "osrm table shape mismatch: got {}x{}, expected {n_sources}x{n_dests}",
                durations.len(),
                durations.first().map_or(0, Vec::len)
            )));
        }

        debug!(
            sources = n_sources,
            destinations = n_dests,
            "osrm table fetched"
        );
        Ok(TableSlice {
            durations: grid_from_wire(durations),
            distances: grid_from_wire(distances),
        })
    }

    async fn route(
        &self,
        coords: &[Coordinate],
        overview: Overview,
    ) -> Result<RouteGeometry, CoreError> {
        if coords.len() < 2 {
            return Err(CoreError::InvalidInput("route needs at least 2 coordinates".into()));
        }

        let base = format!(
            "{}/route/v1/{}/{}",
            self.endpoint,
            self.profile,
            Self::coord_segment(coords)
        );
        let mut url = Url::parse(&base)
            .map_err(|e| CoreError::InvalidInput(format!("failed to build OSRM URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("overview", overview.as_str())
            .append_pair("geometries", "geojson");

        let parsed: OsrmRouteResponse = self.get_with_retry(url).await?;
        if parsed.code != "Ok" {
            return Err(CoreError::BackendUnavailable(format!(
                "osrm route error code: {}",
                parsed.code
            )));
        }
        let route = parsed
            .routes
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| CoreError::BackendUnavailable("osrm returned no routes".into()))?;

        let points = route
            .geometry
            .coordinates
            .iter()
            .filter(|c| c.len() >= 2)
            .filter_map(|c| Coordinate::new(c[1], c[0]).ok())
            .collect();
        Ok(RouteGeometry {
            points,
            distance_m: route.distance,
            duration_s: route.duration,
        })
    }

    fn profile(&self) -> &str {
        &self.profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> OsrmMatrixBackend {
        OsrmMatrixBackend::new("http://localhost:5000/", "driving", MatrixConfig::default())
            .unwrap()
    }

    #[test]
    fn coord_segment_is_lon_lat_semicolon_separated() {
        let coords = vec![
            Coordinate::new(41.30, 69.24).unwrap(),
            Coordinate::new(41.32, 69.28).unwrap(),
        ];
        assert_eq!(
            OsrmMatrixBackend::coord_segment(&coords),
            "69.240000,41.300000;69.280000,41.320000"
        );
    }

    #[test]
    fn endpoint_trailing_slash_trimmed() {
        assert_eq!(backend().endpoint, "http://localhost:5000");
    }

    #[test]
    fn null_entries_become_sentinel() {
        let grid = grid_from_wire(vec![vec![Some(10.0), None], vec![None, Some(0.0)]]);
        assert_eq!(grid[0][0], 10.0);
        assert_eq!(grid[0][1], UNREACHABLE);
        assert_eq!(grid[1][0], UNREACHABLE);
    }

    #[test]
    fn backoff_grows_with_attempts_and_jitters() {
        let b = backend();
        let d0 = b.backoff_delay(0);
        let d2 = b.backoff_delay(2);
        // base 2s: attempt 0 in [1.6, 2.4], attempt 2 in [6.4, 9.6]
        assert!(d0 >= Duration::from_secs_f64(1.6) && d0 <= Duration::from_secs_f64(2.4));
        assert!(d2 >= Duration::from_secs_f64(6.4) && d2 <= Duration::from_secs_f64(9.6));
    }

    #[tokio::test]
    async fn empty_coords_rejected_without_network() {
        let err = backend().table(&[], None, None).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn short_route_rejected_without_network() {
        let coords = vec![Coordinate::new(41.3, 69.2).unwrap()];
        let err = backend().route(&coords, Overview::Full).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}
