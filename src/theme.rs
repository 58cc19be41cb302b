use std::str::FromStr;
use serde::Serialize;
use tracing::warn;

use crate::errors::MapError;
use crate::store::{DARK_MODE_KEY, KeyValueStore};

const ATTRIBUTION: &str = "© MapTiler © OpenStreetMap contributors";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn tile_template(&self) -> &'static str {
        match self {
            Theme::Light => "https://api.maptiler.com/maps/basic/{z}/{x}/{y}.png",
            Theme::Dark => "https://api.maptiler.com/maps/dark-v2/{z}/{x}/{y}.png",
        }
    }

    pub fn attribution(&self) -> &'static str {
        ATTRIBUTION
    }

    pub fn background(&self) -> &'static str {
        match self {
            Theme::Light => "#e8eef1",
            Theme::Dark => "#1e2226",
        }
    }

    pub fn graticule(&self) -> &'static str {
        match self {
            Theme::Light => "#c5d0d6",
            Theme::Dark => "#343b42",
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Theme::Light => "#333333",
            Theme::Dark => "#dddddd",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    /// theme preference stored as `darkMode` = "true" | "false"
    pub fn load(store: &dyn KeyValueStore) -> Theme {
        match store.get(DARK_MODE_KEY).as_deref() {
            Some("true") => Theme::Dark,
            _ => Theme::Light,
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore) {
        let dark = if *self == Theme::Dark { "true" } else { "false" };
        if let Err(e) = store.set(DARK_MODE_KEY, dark) {
            warn!("failed to persist theme {}: {}", self.as_str(), e);
        }
    }
}

impl FromStr for Theme {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            _ => Err(MapError::UnknownTheme(s.to_string())),
        }
    }
}
