use std::{str::FromStr, time::Duration};
use tracing::warn;

use crate::reconciler::POLL_INTERVAL;

pub const DEFAULT_TELEMETRY_URL: &str = "https://api.infiniteflight.com/public/v2";
pub const DEFAULT_AIRPORTS_URL: &str =
    "https://raw.githubusercontent.com/mwgg/Airports/master/airports.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub telemetry_base_url: String,
    pub telemetry_api_key: String,
    pub airports_url: String,
    pub state_file: String,
    pub poll_interval: Duration,
    pub map_width: u32,
    pub map_height: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Config {
            port: parse_or("PORT", lookup("PORT"), 3000),
            telemetry_base_url: lookup("TELEMETRY_BASE_URL")
                .unwrap_or_else(|| DEFAULT_TELEMETRY_URL.to_string()),
            telemetry_api_key: lookup("TELEMETRY_API_KEY").unwrap_or_default(),
            airports_url: lookup("AIRPORTS_URL")
                .unwrap_or_else(|| DEFAULT_AIRPORTS_URL.to_string()),
            state_file: lookup("STATE_FILE").unwrap_or_else(|| "map_state.json".to_string()),
            poll_interval: Duration::from_secs(
                parse_or("POLL_INTERVAL_SECS", lookup("POLL_INTERVAL_SECS"), POLL_INTERVAL.as_secs())
                    .max(1),
            ),
            map_width: parse_or("MAP_WIDTH", lookup("MAP_WIDTH"), 1600),
            map_height: parse_or("MAP_HEIGHT", lookup("MAP_HEIGHT"), 800),
        }
    }
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
{
    match value {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            warn!("invalid {}={:?}, using {}", key, v, default);
            default
        }),
        None => default,
    }
}
