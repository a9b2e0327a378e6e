//! Deterministic geographic scoring: great-circle distance plus a monotonic
//! step decay into [0,1]. Missing coordinates on either side score neutral.

const EARTH_RADIUS_MILES: f64 = 3956.0;

/// Neutral score used whenever coordinates are unknown.
pub const NEUTRAL_GEO_SCORE: f64 = 0.5;

/// Great-circle distance in miles (haversine).
pub fn haversine_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );

    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * a.sqrt().asin() * EARTH_RADIUS_MILES
}

/// Map a distance to a proximity score. Monotonically non-increasing with
/// distance; closer sites score higher.
pub fn proximity_score(distance_miles: f64) -> f64 {
    if distance_miles <= 50.0 {
        1.0
    } else if distance_miles <= 100.0 {
        0.8
    } else if distance_miles <= 200.0 {
        0.6
    } else if distance_miles <= 500.0 {
        0.4
    } else {
        0.2
    }
}
