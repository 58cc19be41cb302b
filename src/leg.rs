use std::fmt::Write as _;
use tracing::warn;

use crate::airports::{Airport, AirportDirectory};
use crate::geodesy::{self, Coordinate};
use crate::surface::{LayerId, MapSurface, PolylineStyle, SvgMapSurface};
use crate::theme::Theme;

const DEPARTURE_PIN: &str = "#FF0000";
const ARRIVAL_PIN: &str = "#00FF00";
const ALTERNATE_PIN: &str = "#0000FF";
const PADDING_PX: f64 = 50.0;

/// A planned leg: the requested codes plus whatever the airport data resolved them to.
#[derive(Debug, Clone)]
pub struct LegPlan {
    pub from: String,
    pub to: String,
    pub alternate: Option<String>,
    pub departure: Option<Airport>,
    pub arrival: Option<Airport>,
    pub alternate_airport: Option<Airport>,
}

impl LegPlan {
    /// Unknown codes and unavailable reference data leave the airport unresolved.
    pub async fn resolve(
        directory: &AirportDirectory,
        from: &str,
        to: &str,
        alternate: Option<&str>,
    ) -> Self {
        let alternate_airport = match alternate {
            Some(icao) => resolve_airport(directory, icao).await,
            None => None,
        };
        LegPlan {
            from: from.to_ascii_uppercase(),
            to: to.to_ascii_uppercase(),
            alternate: alternate.map(str::to_ascii_uppercase),
            departure: resolve_airport(directory, from).await,
            arrival: resolve_airport(directory, to).await,
            alternate_airport,
        }
    }

    pub fn distance_nm(&self) -> Option<f64> {
        let (dep, arr) = (self.departure.as_ref()?, self.arrival.as_ref()?);
        Some(geodesy::distance(dep.position(), arr.position()))
    }

    /// e.g. `SBGR - SBRJ (alt SBKP) 185 NM`
    pub fn caption(&self) -> String {
        let mut caption = format!("{} - {}", self.from, self.to);
        if let Some(alt) = &self.alternate {
            let _ = write!(caption, " (alt {})", alt);
        }
        if let Some(nm) = self.distance_nm() {
            let _ = write!(caption, " {:.0} NM", nm);
        }
        caption
    }

    fn pins(&self) -> impl Iterator<Item = (&Airport, &'static str)> {
        [
            (self.departure.as_ref(), DEPARTURE_PIN),
            (self.arrival.as_ref(), ARRIVAL_PIN),
            (self.alternate_airport.as_ref(), ALTERNATE_PIN),
        ]
        .into_iter()
        .filter_map(|(airport, fill)| Some((airport?, fill)))
    }

    pub fn draw(&self, surface: &mut SvgMapSurface) {
        let mut positions: Vec<Coordinate> = Vec::new();
        for (airport, fill) in self.pins() {
            surface.add_airport(LayerId::Markers, &airport.icao, airport.position(), fill);
            positions.push(airport.position());
        }
        if let (Some(dep), Some(arr)) = (&self.departure, &self.arrival) {
            let line = [dep.position(), arr.position()];
            surface.add_polyline(LayerId::Route, &line, PolylineStyle::LEG);
        }
        surface.fit_bounds(&positions, PADDING_PX);
        surface.set_caption(self.caption());
    }
}

async fn resolve_airport(directory: &AirportDirectory, icao: &str) -> Option<Airport> {
    match directory.lookup(icao).await {
        Ok(Some(airport)) => Some(airport),
        Ok(None) => {
            warn!("unknown airport {}", icao);
            None
        }
        Err(e) => {
            warn!("airport {} not resolved: {}", icao, e);
            None
        }
    }
}

/// Renders the leg onto a fresh surface of its own. The live traffic map is not touched.
pub fn render_leg_map(plan: &LegPlan, width: u32, height: u32, theme: Theme) -> String {
    let mut surface = SvgMapSurface::new(width, height);
    surface.set_base_style(theme);
    plan.draw(&mut surface);
    surface.render_svg()
}
