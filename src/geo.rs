//! Great-circle distance between a search origin and trial sites.

use serde::{Deserialize, Serialize};

use crate::entities::trial::TrialSite;

pub const EARTH_RADIUS_MILES: f64 = 3958.761;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Returns `None` for non-finite or out-of-range coordinates.
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        valid.then_some(Self { lat, lon })
    }

    /// Reads a coordinate pair from a loosely-typed JSON object. Accepts
    /// `lat`/`lon` and `latitude`/`longitude`, as numbers or numeric strings.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        let lat = ["lat", "latitude"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(json_f64))?;
        let lon = ["lon", "lng", "longitude"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(json_f64))?;
        Self::new(lat, lon)
    }
}

fn json_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Haversine distance in statute miles.
pub fn distance_miles(origin: GeoPoint, point: GeoPoint) -> f64 {
    let lat1 = origin.lat.to_radians();
    let lat2 = point.lat.to_radians();
    let d_lat = (point.lat - origin.lat).to_radians();
    let d_lon = (point.lon - origin.lon).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair past 1.0 for antipodal points.
    let c = 2.0 * a.clamp(0.0, 1.0).sqrt().asin();
    (EARTH_RADIUS_MILES * c).max(0.0)
}

/// Distance to the closest site that has coordinates, or `None` when no site does.
pub fn nearest_site_miles(origin: GeoPoint, sites: &[TrialSite]) -> Option<f64> {
    sites
        .iter()
        .filter_map(|site| site.geo_point)
        .map(|point| distance_miles(origin, point))
        .min_by(f64::total_cmp)
}
