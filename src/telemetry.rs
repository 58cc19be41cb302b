use std::{future::Future, time::Duration};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{MapError, Result};
use crate::geodesy::Coordinate;

/// One currently visible aircraft. Only records with a position and a heading make it this far.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AircraftState {
    pub flight_id: String,
    pub username: String,
    pub callsign: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub heading: f64,
}

impl AircraftState {
    pub fn position(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// the filed route, null-island waypoints removed. Empty if nothing was filed
pub type RoutePlan = Vec<Coordinate>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightPlanEndpoints {
    pub origin: Coordinate,
    pub destination: Coordinate,
}

/// Read-only access to the live telemetry of a network session.
pub trait TelemetryClient: Send + Sync + 'static {
    fn fetch_snapshot(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Vec<AircraftState>>> + Send;

    fn fetch_route(
        &self,
        session_id: &str,
        flight_id: &str,
    ) -> impl Future<Output = Result<RoutePlan>> + Send;

    /// `Ok(None)` if the flight plan has no valid waypoint
    fn fetch_flight_plan_endpoints(
        &self,
        session_id: &str,
        flight_id: &str,
    ) -> impl Future<Output = Result<Option<FlightPlanEndpoints>>> + Send;
}

//--- wire format

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse<T> {
    error_code: i32,
    result: Option<T>,
}

impl<T> ApiResponse<T> {
    fn into_result(self, what: &str) -> Result<T> {
        if self.error_code != 0 {
            let msg = format!("{} failed with error code {}", what, self.error_code);
            return Err(MapError::TelemetryUnavailable(msg));
        }
        self.result
            .ok_or_else(|| MapError::TelemetryUnavailable(format!("{} returned no result", what)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlightRecord {
    flight_id: String,
    username: Option<String>,
    callsign: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: Option<f64>,
    heading: Option<f64>,
}

impl FlightRecord {
    fn into_state(self) -> Option<AircraftState> {
        let finite = |v: Option<f64>| v.filter(|v| v.is_finite());

        Some(AircraftState {
            latitude: finite(self.latitude)?,
            longitude: finite(self.longitude)?,
            heading: finite(self.heading)?,
            altitude: self.altitude.unwrap_or_default(),
            username: self.username.unwrap_or_default(),
            callsign: self.callsign.unwrap_or_default(),
            flight_id: self.flight_id,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RoutePoint {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlightPlanInfo {
    #[serde(default)]
    flight_plan_items: Vec<FlightPlanItem>,
}

#[derive(Debug, Deserialize)]
struct FlightPlanItem {
    location: Option<RoutePoint>,
    children: Option<Vec<FlightPlanItem>>,
}

fn states_from_records(records: Vec<FlightRecord>) -> Vec<AircraftState> {
    records.into_iter().filter_map(FlightRecord::into_state).collect()
}

fn route_from_points(points: Vec<RoutePoint>) -> RoutePlan {
    points
        .into_iter()
        .map(|p| Coordinate::new(p.latitude, p.longitude))
        .filter(|c| !c.is_null_island())
        .collect()
}

fn collect_waypoints(items: &[FlightPlanItem], waypoints: &mut Vec<Coordinate>) {
    for item in items {
        if let Some(loc) = &item.location {
            let c = Coordinate::new(loc.latitude, loc.longitude);
            if !c.is_null_island() {
                waypoints.push(c);
            }
        }
        if let Some(children) = &item.children {
            collect_waypoints(children, waypoints);
        }
    }
}

fn endpoints_from_plan(plan: &FlightPlanInfo) -> Option<FlightPlanEndpoints> {
    let mut waypoints = Vec::new();
    collect_waypoints(&plan.flight_plan_items, &mut waypoints);

    Some(FlightPlanEndpoints { origin: *waypoints.first()?, destination: *waypoints.last()? })
}

//--- http client

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpTelemetryClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTelemetryClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("TrafficMap/0.1.0")
            .build()?;
        Ok(HttpTelemetryClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<ApiResponse<T>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("fetching telemetry {}", url);
        let resp = self
            .client
            .get(url)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

impl TelemetryClient for HttpTelemetryClient {
    async fn fetch_snapshot(&self, session_id: &str) -> Result<Vec<AircraftState>> {
        let resp: ApiResponse<Vec<FlightRecord>> =
            self.get(&format!("/sessions/{}/flights", session_id)).await?;
        Ok(states_from_records(resp.into_result("snapshot")?))
    }

    async fn fetch_route(&self, session_id: &str, flight_id: &str) -> Result<RoutePlan> {
        let resp: ApiResponse<Vec<RoutePoint>> =
            self.get(&format!("/sessions/{}/flights/{}/route", session_id, flight_id)).await?;
        Ok(route_from_points(resp.into_result("route")?))
    }

    async fn fetch_flight_plan_endpoints(
        &self,
        session_id: &str,
        flight_id: &str,
    ) -> Result<Option<FlightPlanEndpoints>> {
        let resp: ApiResponse<FlightPlanInfo> =
            self.get(&format!("/sessions/{}/flights/{}/flightplan", session_id, flight_id)).await?;
        Ok(endpoints_from_plan(&resp.into_result("flight plan")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_snapshot_drops_incomplete_records() {
        let json = r#"{
            "errorCode": 0,
            "result": [
                {"flightId": "a", "username": "Ana", "callsign": "TAP101", "latitude": 38.77, "longitude": -9.13, "altitude": 35000.0, "heading": 45.0, "speed": 450.0},
                {"flightId": "b", "username": null, "callsign": "GLO1202", "latitude": -23.43, "longitude": -46.47, "altitude": 1200.5, "heading": 270.0},
                {"flightId": "c", "username": "Caio", "callsign": "AZU4050", "latitude": -15.87, "longitude": -47.92, "altitude": 9000.0},
                {"flightId": "d", "callsign": "LAT3300", "longitude": -43.25, "heading": 90.0}
            ]
        }"#;
        let resp: ApiResponse<Vec<FlightRecord>> = serde_json::from_str(json).unwrap();
        let states = states_from_records(resp.into_result("snapshot").unwrap());

        assert_eq!(states.len(), 2);
        assert_eq!(states[0].flight_id, "a");
        assert_eq!(states[0].callsign, "TAP101");
        assert_eq!(states[1].username, "");
        assert_eq!(states[1].position(), Coordinate::new(-23.43, -46.47));
    }

    #[test]
    fn test_error_code_is_unavailable() {
        let resp: ApiResponse<Vec<FlightRecord>> = serde_json::from_str(r#"{"errorCode": 6, "result": null}"#).unwrap();
        assert!(matches!(resp.into_result("snapshot"), Err(MapError::TelemetryUnavailable(_))));
    }

    #[test]
    fn test_route_filters_null_island() {
        let json = r#"{"errorCode": 0, "result": [
            {"latitude": 0.0, "longitude": 0.0, "altitude": 0.0, "track": 0.0, "groundSpeed": 0.0, "date": "2024-01-01T00:00:00Z"},
            {"latitude": -23.43, "longitude": -46.47, "altitude": 2400.0, "track": 90.0, "groundSpeed": 180.0, "date": "2024-01-01T00:01:00Z"},
            {"latitude": 0.0, "longitude": 12.5, "altitude": 35000.0, "track": 90.0, "groundSpeed": 480.0, "date": "2024-01-01T02:00:00Z"}
        ]}"#;
        let resp: ApiResponse<Vec<RoutePoint>> = serde_json::from_str(json).unwrap();
        let route = route_from_points(resp.into_result("route").unwrap());
        assert_eq!(route, vec![Coordinate::new(-23.43, -46.47), Coordinate::new(0.0, 12.5)]);

        let empty: ApiResponse<Vec<RoutePoint>> = serde_json::from_str(r#"{"errorCode": 0, "result": []}"#).unwrap();
        assert!(route_from_points(empty.into_result("route").unwrap()).is_empty());
    }

    #[test]
    fn test_flight_plan_endpoints_flatten_procedures() {
        let json = r#"{"errorCode": 0, "result": {"flightPlanItems": [
            {"name": "SBGR", "location": {"latitude": -23.43, "longitude": -46.47, "altitude": 0}, "children": null},
            {"name": "SID", "location": {"latitude": 0, "longitude": 0, "altitude": 0}, "children": [
                {"name": "PCO", "location": {"latitude": -23.0, "longitude": -46.0, "altitude": 0}, "children": null}
            ]},
            {"name": "SBRJ", "location": {"latitude": -22.91, "longitude": -43.16, "altitude": 0}, "children": null},
            {"name": "USER", "location": {"latitude": 0, "longitude": 0, "altitude": 0}}
        ]}}"#;
        let resp: ApiResponse<FlightPlanInfo> = serde_json::from_str(json).unwrap();
        let endpoints = endpoints_from_plan(&resp.into_result("flight plan").unwrap()).unwrap();

        assert_eq!(endpoints.origin, Coordinate::new(-23.43, -46.47));
        assert_eq!(endpoints.destination, Coordinate::new(-22.91, -43.16));
    }

    #[test]
    fn test_flight_plan_without_valid_waypoints() {
        let json = r#"{"errorCode": 0, "result": {"flightPlanItems": [
            {"location": {"latitude": 0, "longitude": 0}}
        ]}}"#;
        let resp: ApiResponse<FlightPlanInfo> = serde_json::from_str(json).unwrap();
        assert_eq!(endpoints_from_plan(&resp.into_result("flight plan").unwrap()), None);

        let single = r#"{"errorCode": 0, "result": {"flightPlanItems": [
            {"location": {"latitude": 51.47, "longitude": -0.45}}
        ]}}"#;
        let resp: ApiResponse<FlightPlanInfo> = serde_json::from_str(single).unwrap();
        let endpoints = endpoints_from_plan(&resp.into_result("flight plan").unwrap()).unwrap();
        assert_eq!(endpoints.origin, endpoints.destination);
    }

    //--- http client against a local stub

    /// Answers every request with `respond(path)` and records the request targets.
    async fn serve(respond: fn(&str) -> (u16, String)) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let targets = Arc::new(Mutex::new(Vec::new()));

        let log = targets.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let target = String::from_utf8_lossy(&request).split_whitespace().nth(1).unwrap_or("").to_string();
                let (status, body) = respond(target.split('?').next().unwrap_or(""));
                log.lock().unwrap().push(target);

                let response = format!(
                    "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (base_url, targets)
    }

    fn infinite_flight(path: &str) -> (u16, String) {
        let body = if path.ends_with("/route") {
            r#"{"errorCode": 0, "result": [{"latitude": -23.43, "longitude": -46.47}, {"latitude": -23.0, "longitude": -45.0}]}"#
        } else if path.ends_with("/flightplan") {
            r#"{"errorCode": 0, "result": {"flightPlanItems": [
                {"location": {"latitude": -23.43, "longitude": -46.47}},
                {"location": {"latitude": -22.91, "longitude": -43.16}}
            ]}}"#
        } else {
            r#"{"errorCode": 0, "result": [
                {"flightId": "f1", "username": "Ana", "callsign": "TAP101", "latitude": 38.77, "longitude": -9.13, "altitude": 35000.0, "heading": 45.0}
            ]}"#
        };
        (200, body.to_string())
    }

    #[tokio::test]
    async fn test_http_client_paths_and_api_key() {
        let (base_url, targets) = serve(infinite_flight).await;
        let client = HttpTelemetryClient::new(format!("{}/", base_url), "secret").unwrap();

        let snapshot = client.fetch_snapshot("s1").await.unwrap();
        assert_eq!(snapshot[0].callsign, "TAP101");
        assert_eq!(client.fetch_route("s1", "f1").await.unwrap().len(), 2);
        let endpoints = client.fetch_flight_plan_endpoints("s1", "f1").await.unwrap().unwrap();
        assert_eq!(endpoints.destination, Coordinate::new(-22.91, -43.16));

        assert_eq!(
            *targets.lock().unwrap(),
            vec![
                "/sessions/s1/flights?apikey=secret",
                "/sessions/s1/flights/f1/route?apikey=secret",
                "/sessions/s1/flights/f1/flightplan?apikey=secret",
            ]
        );
    }

    #[tokio::test]
    async fn test_http_error_status_is_unavailable_without_key() {
        let (base_url, _) = serve(|_| (503, String::new())).await;
        let client = HttpTelemetryClient::new(base_url, "secret").unwrap();

        match client.fetch_snapshot("s1").await {
            Err(MapError::TelemetryUnavailable(msg)) => {
                assert!(msg.contains("503"), "got {msg}");
                assert!(!msg.contains("apikey") && !msg.contains("secret"), "key leaked: {msg}");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_api_error_code_is_unavailable() {
        let (base_url, _) = serve(|_| (200, r#"{"errorCode": 6, "result": null}"#.to_string())).await;
        let client = HttpTelemetryClient::new(base_url, "secret").unwrap();
        assert!(matches!(client.fetch_route("s1", "f1").await, Err(MapError::TelemetryUnavailable(_))));
    }

    #[tokio::test]
    async fn test_closed_port_is_unavailable_without_key() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpTelemetryClient::new(format!("http://{}", addr), "secret").unwrap();
        match client.fetch_flight_plan_endpoints("s1", "f1").await {
            Err(MapError::TelemetryUnavailable(msg)) => assert!(!msg.contains("secret"), "key leaked: {msg}"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
