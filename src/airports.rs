use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::errors::{MapError, Result};
use crate::geodesy::{self, Coordinate, FlightDuration};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Airport {
    pub icao: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub country: String,
    pub lat: f64,
    pub lon: f64,
}

impl Airport {
    pub fn position(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

/// ICAO keyed airport reference data, fetched on first use and kept for the process lifetime.
pub struct AirportDirectory {
    url: String,
    client: reqwest::Client,
    airports: OnceCell<HashMap<String, Airport>>,
}

impl AirportDirectory {
    pub fn new(url: impl Into<String>) -> Self {
        AirportDirectory {
            url: url.into(),
            client: reqwest::Client::new(),
            airports: OnceCell::new(),
        }
    }

    #[cfg(test)]
    pub fn from_airports(airports: impl IntoIterator<Item = Airport>) -> Self {
        let map = airports.into_iter().map(|a| (a.icao.to_ascii_uppercase(), a)).collect();
        AirportDirectory {
            url: String::new(),
            client: reqwest::Client::new(),
            airports: OnceCell::new_with(Some(map)),
        }
    }

    async fn load(&self) -> Result<&HashMap<String, Airport>> {
        self.airports
            .get_or_try_init(|| async {
                info!("fetching airport reference data from {}", self.url);
                let resp = self
                    .client
                    .get(&self.url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| MapError::AirportDataUnavailable(e.to_string()))?;
                let raw: HashMap<String, Airport> =
                    resp.json().await.map_err(|e| MapError::AirportDataUnavailable(e.to_string()))?;
                let airports: HashMap<String, Airport> =
                    raw.into_values().map(|a| (a.icao.to_ascii_uppercase(), a)).collect();
                info!("loaded {} airports", airports.len());
                Ok(airports)
            })
            .await
    }

    pub async fn lookup(&self, icao: &str) -> Result<Option<Airport>> {
        let airports = self.load().await?;
        Ok(airports.get(&icao.to_ascii_uppercase()).cloned())
    }

    /// Distance display between two airports. Unknown codes or missing reference data
    /// degrade to the raw codes without numbers.
    pub async fn leg_info(&self, from: &str, to: &str) -> LegInfo {
        let mut leg = LegInfo::unresolved(from, to);

        let (origin, destination) = match (self.lookup(from).await, self.lookup(to).await) {
            (Ok(Some(o)), Ok(Some(d))) => (o, d),
            (Err(e), _) | (_, Err(e)) => {
                warn!("no distance for {}-{}: {}", from, to, e);
                return leg;
            }
            _ => return leg,
        };

        let km = geodesy::distance_km(origin.position(), destination.position());
        leg.distance_km = Some(km);
        leg.distance_nm = Some(geodesy::distance(origin.position(), destination.position()));
        leg.initial_course =
            Some(geodesy::initial_bearing(origin.position(), destination.position()));
        leg.duration = Some(geodesy::estimated_duration(km));
        leg.origin = Some(origin);
        leg.destination = Some(destination);
        leg
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LegInfo {
    pub from: String,
    pub to: String,
    pub origin: Option<Airport>,
    pub destination: Option<Airport>,
    pub distance_km: Option<f64>,
    pub distance_nm: Option<f64>,
    pub initial_course: Option<f64>,
    pub duration: Option<FlightDuration>,
}

impl LegInfo {
    fn unresolved(from: &str, to: &str) -> Self {
        LegInfo {
            from: from.to_string(),
            to: to.to_string(),
            origin: None,
            destination: None,
            distance_km: None,
            distance_nm: None,
            initial_course: None,
            duration: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> AirportDirectory {
        let json = r#"{
            "SBGR": {"icao": "SBGR", "iata": "GRU", "name": "Guarulhos International", "city": "Sao Paulo", "country": "BR", "elevation": 2459, "lat": -23.4356, "lon": -46.4731, "tz": "America/Sao_Paulo"},
            "SBRJ": {"icao": "SBRJ", "iata": "SDU", "name": "Santos Dumont", "city": "Rio De Janeiro", "country": "BR", "elevation": 11, "lat": -22.9105, "lon": -43.1631, "tz": "America/Sao_Paulo"}
        }"#;
        let raw: HashMap<String, Airport> = serde_json::from_str(json).unwrap();
        AirportDirectory::from_airports(raw.into_values())
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let dir = directory();
        let gru = dir.lookup("sbgr").await.unwrap().unwrap();
        assert_eq!(gru.name, "Guarulhos International");
        assert_eq!(dir.lookup("KJFK").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_leg_info() {
        let leg = directory().leg_info("SBGR", "SBRJ").await;
        let km = leg.distance_km.unwrap();
        assert!((km - 342.0).abs() < 5.0, "got {km}");
        assert!((leg.distance_nm.unwrap() - km * 0.539957).abs() < 1e-9);
        // short haul branch: ~342 km at 460 km/h
        assert_eq!(leg.duration.unwrap().hours, 0.0);
        assert!(leg.initial_course.unwrap() > 45.0 && leg.initial_course.unwrap() < 90.0);
    }

    #[tokio::test]
    async fn test_leg_info_unknown_code_degrades() {
        let leg = directory().leg_info("SBGR", "ZZZZ").await;
        assert_eq!(leg.from, "SBGR");
        assert_eq!(leg.to, "ZZZZ");
        assert!(leg.distance_nm.is_none() && leg.duration.is_none() && leg.origin.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_reference_data_degrades() {
        let dir = AirportDirectory::new("http://127.0.0.1:9/airports.json");
        assert!(matches!(dir.lookup("SBGR").await, Err(MapError::AirportDataUnavailable(_))));

        let leg = dir.leg_info("SBGR", "SBRJ").await;
        assert!(leg.distance_km.is_none());
    }
}
