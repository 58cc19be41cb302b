use std::fmt;
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;
const KM_TO_NM: f64 = 0.539957;

const SHORT_HAUL_LIMIT_KM: f64 = 500.0;
const SHORT_HAUL_SPEED_KMH: f64 = 460.0;
const LONG_HAUL_SPEED_KMH: f64 = 850.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Coordinate { lat, lon }
    }

    /// waypoints the telemetry service reports at 0/0 carry no position
    pub fn is_null_island(&self) -> bool {
        self.lat == 0.0 && self.lon == 0.0
    }
}

/// Great-circle (haversine) distance in kilometers.
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Great-circle distance in nautical miles.
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    distance_km(a, b) * KM_TO_NM
}

/// Initial course from `a` towards `b` in degrees [0,360), clockwise from north.
pub fn initial_bearing(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let x = d_lon.sin() * lat2.cos();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    (x.atan2(y).to_degrees() + 360.0) % 360.0
}

/// Block time estimate as whole hours plus rounded minutes.
/// Both fields are NaN if the distance was not finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlightDuration {
    pub hours: f64,
    pub minutes: f64,
}

impl fmt::Display for FlightDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h {}m", self.hours, self.minutes)
    }
}

pub fn estimated_duration(distance_km: f64) -> FlightDuration {
    let speed =
        if distance_km < SHORT_HAUL_LIMIT_KM { SHORT_HAUL_SPEED_KMH } else { LONG_HAUL_SPEED_KMH };
    let flight_hours = distance_km / speed;

    let mut hours = flight_hours.floor();
    let mut minutes = ((flight_hours - hours) * 60.0).round();
    if minutes >= 60.0 {
        hours += 1.0;
        minutes -= 60.0;
    }

    FlightDuration { hours, minutes }
}
