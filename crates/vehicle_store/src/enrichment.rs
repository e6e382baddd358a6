use std::collections::{HashMap, HashSet};

/// Minimum time between enrichment attempts for an unmoved vehicle.
pub const ENRICH_TTL_MS: i64 = 3 * 60 * 1000;

/// Displacement that justifies a fresh enrichment attempt regardless of TTL.
pub const ENRICH_MIN_DISTANCE_M: f64 = 500.0;

/// Mean Earth radius used by the great-circle displacement check.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates, in meters (haversine).
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

#[derive(Debug, Clone, Copy)]
struct EnrichmentAttempt {
    lat: f64,
    lon: f64,
    attempted_at_ms: i64,
}

/// Per-vehicle gate for external enrichment calls: one attempt in flight at
/// a time, and a new attempt only when forced, the TTL has elapsed, or the
/// vehicle has moved far enough since the last attempt.
#[derive(Debug, Default)]
pub(crate) struct EnrichmentGate {
    attempts: HashMap<String, EnrichmentAttempt>,
    in_flight: HashSet<String>,
}

impl EnrichmentGate {
    /// Try to claim an enrichment slot for this vehicle. Returns false when
    /// a call is already in flight or the thresholds say skip.
    pub fn try_begin(&mut self, vin: &str, lat: f64, lon: f64, force: bool, now_ms: i64) -> bool {
        if self.in_flight.contains(vin) {
            return false;
        }
        if !force && !self.thresholds_passed(vin, lat, lon, now_ms) {
            return false;
        }
        self.in_flight.insert(vin.to_string());
        true
    }

    /// Record the attempt and release the slot. Called on success and
    /// failure alike so a failing endpoint is not hammered.
    pub fn finish(&mut self, vin: &str, lat: f64, lon: f64, now_ms: i64) {
        self.attempts.insert(
            vin.to_string(),
            EnrichmentAttempt {
                lat,
                lon,
                attempted_at_ms: now_ms,
            },
        );
        self.in_flight.remove(vin);
    }

    fn thresholds_passed(&self, vin: &str, lat: f64, lon: f64, now_ms: i64) -> bool {
        let Some(last) = self.attempts.get(vin) else {
            return true;
        };
        if now_ms - last.attempted_at_ms > ENRICH_TTL_MS {
            return true;
        }
        haversine_meters(last.lat, last.lon, lat, lon) >= ENRICH_MIN_DISTANCE_M
    }
}
