//! Geographic primitives: WGS84 coordinates and Haversine distances.
//!
//! All latitudes/longitudes are decimal degrees. Coordinate equality is
//! compared at 6 decimal places (~0.11 m), which is the precision GPS fixes
//! arrive with.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Coordinate comparison precision: 6 decimal places.
const COORD_EPSILON: f64 = 1e-6;

/// A WGS84 point. Construct through [`Coordinate::new`] so the bounds are
/// checked once at the edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Validated constructor: latitude in [-90, 90], longitude in [-180, 180].
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoreError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(CoreError::InvalidInput(format!("latitude out of range: {lat}")));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(CoreError::InvalidInput(format!("longitude out of range: {lon}")));
        }
        Ok(Self { lat, lon })
    }

    /// Great-circle distance to `other` in meters.
    pub fn haversine_m(&self, other: &Coordinate) -> f64 {
        haversine_m(self.lat, self.lon, other.lat, other.lon)
    }

    /// OSRM wire format: `lon,lat` with 6-decimal precision.
    pub fn to_lon_lat(&self) -> String {
        format!("{:.6},{:.6}", self.lon, self.lat)
    }
}

impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        (self.lat - other.lat).abs() < COORD_EPSILON
            && (self.lon - other.lon).abs() < COORD_EPSILON
    }
}

/// Haversine distance between two (lat, lon) pairs in meters.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1) = (lat1.to_radians(), lon1.to_radians());
    let (lat2, lon2) = (lat2.to_radians(), lon2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}
