use std::fmt::Write as _;
use tracing::{debug, info, warn};

use crate::geodesy::Coordinate;
use crate::theme::Theme;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerId {
    Markers,
    Trajectory,
    Route,
}

impl LayerId {
    pub const ALL: [LayerId; 3] = [LayerId::Markers, LayerId::Trajectory, LayerId::Route];
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolylineStyle {
    pub color: &'static str,
    pub weight: f64,
    pub dash_array: Option<&'static str>,
}

impl PolylineStyle {
    pub const ROUTE: PolylineStyle =
        PolylineStyle { color: "#000000", weight: 2.0, dash_array: Some("5, 10") };
    pub const TRAJECTORY: PolylineStyle =
        PolylineStyle { color: "#0000FF", weight: 2.0, dash_array: None };
    /// departure to arrival on a leg map
    pub const LEG: PolylineStyle =
        PolylineStyle { color: "#000000", weight: 2.0, dash_array: None };
}

/// The map the reconciler draws on: a base tile style plus three independent overlay layers.
///
/// After `destroy()` every call is a no-op; `destroy()` itself can be called any number of times.
pub trait MapSurface: Send + 'static {
    fn set_base_style(&mut self, theme: Theme);

    fn clear_layer(&mut self, layer: LayerId);

    /// `key` identifies what a click on the marker selects
    fn add_marker(
        &mut self,
        layer: LayerId,
        key: &str,
        position: Coordinate,
        rotation_deg: f64,
        popup: &str,
    );

    fn add_polyline(&mut self, layer: LayerId, coordinates: &[Coordinate], style: PolylineStyle);

    fn render_svg(&self) -> String;

    fn destroy(&mut self);
}

//--- marker primitives

/// Something that can draw itself centred on a viewport point.
pub trait MarkerGlyph: Send + Sync {
    fn to_svg(&self, x: f64, y: f64) -> String;
}

pub struct AircraftIcon {
    pub size: f64,
    pub fill: &'static str,
}

impl Default for AircraftIcon {
    fn default() -> Self {
        AircraftIcon { size: 32.0, fill: "#f5a623" }
    }
}

// nose up, unit box [-16,16]
const AIRCRAFT_PATH: &str = "M0,-15 L3,-6 L14,2 L14,5 L3,1 L2,10 L6,13 L6,15 L0,13 \
                             L-6,15 L-6,13 L-2,10 L-3,1 L-14,5 L-14,2 L-3,-6 Z";

impl MarkerGlyph for AircraftIcon {
    fn to_svg(&self, x: f64, y: f64) -> String {
        let scale = self.size / 32.0;
        format!(
            "<path d='{}' transform='translate({:.2} {:.2}) scale({})' fill='{}' \
             stroke='#222222' stroke-width='1'/>",
            AIRCRAFT_PATH, x, y, scale, self.fill
        )
    }
}

/// Rotates any glyph clockwise about its own centre.
pub struct RotatableMarkerDecorator<M: MarkerGlyph> {
    inner: M,
    angle: f64,
}

impl<M: MarkerGlyph> RotatableMarkerDecorator<M> {
    pub fn new(inner: M, angle: f64) -> Self {
        RotatableMarkerDecorator { inner, angle: angle.rem_euclid(360.0) }
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }
}

impl<M: MarkerGlyph> MarkerGlyph for RotatableMarkerDecorator<M> {
    fn to_svg(&self, x: f64, y: f64) -> String {
        let inner = self.inner.to_svg(x, y);
        format!("<g transform='rotate({:.1} {:.2} {:.2})'>{}</g>", self.angle, x, y, inner)
    }
}

/// Coloured dot with the ICAO code next to it.
pub struct AirportPin {
    pub icao: String,
    pub fill: &'static str,
}

impl MarkerGlyph for AirportPin {
    fn to_svg(&self, x: f64, y: f64) -> String {
        format!(
            "<circle cx='{x:.2}' cy='{y:.2}' r='6' fill='{}' stroke='#222222' stroke-width='1'/>\
             <text x='{:.2}' y='{:.2}' font-family='sans-serif' font-size='12' fill='#222222' \
             stroke='#ffffff' stroke-width='3' paint-order='stroke'>{}</text>",
            self.fill,
            x + 9.0,
            y - 9.0,
            xml_escape(&self.icao)
        )
    }
}

//--- svg surface

struct TileLayer {
    theme: Theme,
    template: &'static str,
}

enum Overlay {
    Marker {
        href: Option<String>,
        position: Coordinate,
        glyph: Box<dyn MarkerGlyph>,
        popup: String,
    },
    Polyline { coordinates: Vec<Coordinate>, style: PolylineStyle },
}

// never zoom in closer than this, a single airport still shows its surroundings
const MIN_DEG_PER_PX: f64 = 0.01;

/// Visible part of the world: top-left corner plus scale in degrees per pixel.
#[derive(Debug, Clone, Copy)]
struct Viewport {
    west: f64,
    north: f64,
    deg_per_px_x: f64,
    deg_per_px_y: f64,
}

/// Server side map that renders its layers into an SVG document (equirectangular).
/// Shows the whole world until `fit_bounds` zooms in.
///
/// Starts without a base style and renders an empty document until one is set.
pub struct SvgMapSurface {
    width: f64,
    height: f64,
    view: Viewport,
    tile_layer: Option<TileLayer>,
    markers: Vec<Overlay>,
    trajectory: Vec<Overlay>,
    route: Vec<Overlay>,
    caption: Option<String>,
    destroyed: bool,
}

impl SvgMapSurface {
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = (width as f64, height as f64);
        SvgMapSurface {
            width,
            height,
            view: Viewport {
                west: -180.0,
                north: 90.0,
                deg_per_px_x: 360.0 / width,
                deg_per_px_y: 180.0 / height,
            },
            tile_layer: None,
            markers: Vec::new(),
            trajectory: Vec::new(),
            route: Vec::new(),
            caption: None,
            destroyed: false,
        }
    }

    /// Zooms onto `coordinates`, keeping `padding` pixels free on every side.
    /// Both axes get the same scale.
    pub fn fit_bounds(&mut self, coordinates: &[Coordinate], padding: f64) {
        let Some(first) = coordinates.first() else {
            return;
        };
        let (mut south, mut north) = (first.lat, first.lat);
        let (mut west, mut east) = (first.lon, first.lon);
        for c in &coordinates[1..] {
            south = south.min(c.lat);
            north = north.max(c.lat);
            west = west.min(c.lon);
            east = east.max(c.lon);
        }

        let usable_w = (self.width - 2.0 * padding).max(1.0);
        let usable_h = (self.height - 2.0 * padding).max(1.0);
        let deg_per_px =
            ((east - west) / usable_w).max((north - south) / usable_h).max(MIN_DEG_PER_PX);
        let (center_lon, center_lat) = ((west + east) / 2.0, (south + north) / 2.0);

        self.view = Viewport {
            west: center_lon - deg_per_px * self.width / 2.0,
            north: center_lat + deg_per_px * self.height / 2.0,
            deg_per_px_x: deg_per_px,
            deg_per_px_y: deg_per_px,
        };
    }

    /// Text shown in the top left corner.
    pub fn set_caption(&mut self, caption: impl Into<String>) {
        if self.destroyed {
            return;
        }
        self.caption = Some(caption.into());
    }

    /// Airport pin. Unlike aircraft markers it is not a selection link.
    pub fn add_airport(
        &mut self,
        layer: LayerId,
        icao: &str,
        position: Coordinate,
        fill: &'static str,
    ) {
        if self.destroyed {
            return;
        }
        let glyph = AirportPin { icao: icao.to_string(), fill };
        self.layer_mut(layer).push(Overlay::Marker {
            href: None,
            position,
            glyph: Box::new(glyph),
            popup: icao.to_string(),
        });
    }

    #[cfg(test)]
    pub fn layer_len(&self, layer: LayerId) -> usize {
        match layer {
            LayerId::Markers => self.markers.len(),
            LayerId::Trajectory => self.trajectory.len(),
            LayerId::Route => self.route.len(),
        }
    }

    #[cfg(test)]
    pub fn theme(&self) -> Option<Theme> {
        self.tile_layer.as_ref().map(|t| t.theme)
    }

    #[cfg(test)]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn layer_mut(&mut self, layer: LayerId) -> &mut Vec<Overlay> {
        match layer {
            LayerId::Markers => &mut self.markers,
            LayerId::Trajectory => &mut self.trajectory,
            LayerId::Route => &mut self.route,
        }
    }

    fn project(&self, c: Coordinate) -> (f64, f64) {
        let x = (c.lon - self.view.west) / self.view.deg_per_px_x;
        let y = (self.view.north - c.lat) / self.view.deg_per_px_y;
        (x, y)
    }

    fn write_graticule(&self, svg: &mut String, color: &str) {
        let (w, h) = (self.width, self.height);
        for lon in (-150..=150).step_by(30) {
            let (x, _) = self.project(Coordinate::new(0.0, lon as f64));
            if (0.0..=w).contains(&x) {
                let _ = write!(
                    svg,
                    "<line x1='{x:.2}' y1='0' x2='{x:.2}' y2='{h}' stroke='{color}' stroke-width='1'/>"
                );
            }
        }
        for lat in (-60..=60).step_by(30) {
            let (_, y) = self.project(Coordinate::new(lat as f64, 0.0));
            if (0.0..=h).contains(&y) {
                let _ = write!(
                    svg,
                    "<line x1='0' y1='{y:.2}' x2='{w}' y2='{y:.2}' stroke='{color}' stroke-width='1'/>"
                );
            }
        }
    }

    fn write_overlays(&self, svg: &mut String, overlays: &[Overlay]) {
        for overlay in overlays {
            match overlay {
                Overlay::Marker { href, position, glyph, popup } => {
                    let (x, y) = self.project(*position);
                    let (title, glyph) = (xml_escape(popup), glyph.to_svg(x, y));
                    let _ = match href {
                        Some(href) => {
                            let href = xml_escape(href);
                            write!(svg, "<a href='{}'><title>{}</title>{}</a>", href, title, glyph)
                        }
                        None => write!(svg, "<g><title>{}</title>{}</g>", title, glyph),
                    };
                }
                Overlay::Polyline { coordinates, style } => {
                    let points: Vec<String> = coordinates
                        .iter()
                        .map(|c| {
                            let (x, y) = self.project(*c);
                            format!("{x:.2},{y:.2}")
                        })
                        .collect();
                    let dash = style
                        .dash_array
                        .map(|d| format!(" stroke-dasharray='{}'", d))
                        .unwrap_or_default();
                    let _ = write!(
                        svg,
                        "<polyline points='{}' fill='none' stroke='{}' stroke-width='{}'{}/>",
                        points.join(" "),
                        style.color,
                        style.weight,
                        dash
                    );
                }
            }
        }
    }
}

impl MapSurface for SvgMapSurface {
    fn set_base_style(&mut self, theme: Theme) {
        if self.destroyed {
            return;
        }
        if let Some(old) = self.tile_layer.take() {
            debug!("removed tile layer {}", old.template);
        }
        self.tile_layer = Some(TileLayer { theme, template: theme.tile_template() });
        debug!("added tile layer {}", theme.tile_template());
    }

    fn clear_layer(&mut self, layer: LayerId) {
        if self.destroyed {
            return;
        }
        self.layer_mut(layer).clear();
    }

    fn add_marker(
        &mut self,
        layer: LayerId,
        key: &str,
        position: Coordinate,
        rotation_deg: f64,
        popup: &str,
    ) {
        if self.destroyed {
            return;
        }
        let glyph = RotatableMarkerDecorator::new(AircraftIcon::default(), rotation_deg);
        self.layer_mut(layer).push(Overlay::Marker {
            href: Some(format!("/select/{}", key)),
            position,
            glyph: Box::new(glyph),
            popup: popup.to_string(),
        });
    }

    fn add_polyline(&mut self, layer: LayerId, coordinates: &[Coordinate], style: PolylineStyle) {
        if self.destroyed {
            return;
        }
        self.layer_mut(layer).push(Overlay::Polyline { coordinates: coordinates.to_vec(), style });
    }

    fn render_svg(&self) -> String {
        let (w, h) = (self.width, self.height);
        let mut svg = format!(
            "<svg width='{w}' height='{h}' viewBox='0 0 {w} {h}' xmlns='http://www.w3.org/2000/svg'>"
        );

        match &self.tile_layer {
            Some(tiles) if !self.destroyed => {
                let theme = tiles.theme;
                let background = theme.background();
                let _ = write!(svg, "<rect width='{w}' height='{h}' fill='{background}'/>");
                self.write_graticule(&mut svg, theme.graticule());

                self.write_overlays(&mut svg, &self.route);
                self.write_overlays(&mut svg, &self.trajectory);
                self.write_overlays(&mut svg, &self.markers);

                if let Some(caption) = &self.caption {
                    let _ = write!(
                        svg,
                        "<text x='8' y='20' font-family='sans-serif' font-size='14' fill='{}'>{}</text>",
                        theme.text(),
                        xml_escape(caption)
                    );
                }

                let _ = write!(
                    svg,
                    "<text x='{}' y='{}' font-family='sans-serif' font-size='12' text-anchor='end' \
                     fill='{}'>{}</text>",
                    w - 8.0,
                    h - 8.0,
                    theme.text(),
                    xml_escape(theme.attribution())
                );
            }
            _ => {}
        }

        svg.push_str("</svg>");
        svg
    }

    fn destroy(&mut self) {
        if self.destroyed {
            warn!("map surface already destroyed");
            return;
        }
        self.tile_layer = None;
        self.markers.clear();
        self.trajectory.clear();
        self.route.clear();
        self.caption = None;
        self.destroyed = true;
        info!("map surface destroyed");
    }
}

pub fn xml_escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\'' => escaped.push_str("&apos;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface() -> SvgMapSurface {
        let mut s = SvgMapSurface::new(1600, 800);
        s.set_base_style(Theme::Light);
        s
    }

    #[test]
    fn test_nothing_drawn_without_base_style() {
        let mut s = SvgMapSurface::new(1600, 800);
        s.add_marker(LayerId::Markers, "a", Coordinate::new(10.0, 20.0), 90.0, "Ana");
        assert_eq!(s.theme(), None);
        assert!(!s.render_svg().contains("<a "));
    }

    #[test]
    fn test_base_style_swap_does_not_stack() {
        let mut s = surface();
        s.set_base_style(Theme::Dark);
        s.set_base_style(Theme::Light);
        s.set_base_style(Theme::Dark);

        let svg = s.render_svg();
        assert_eq!(s.theme(), Some(Theme::Dark));
        assert_eq!(svg.matches(Theme::Dark.background()).count(), 1);
        assert!(!svg.contains(Theme::Light.background()));
    }

    #[test]
    fn test_layers_are_independent() {
        let mut s = surface();
        s.add_marker(LayerId::Markers, "a", Coordinate::new(10.0, 20.0), 90.0, "Ana");
        let (a, b, c) = (Coordinate::new(0.0, 0.0), Coordinate::new(10.0, 10.0), Coordinate::new(5.0, 5.0));
        s.add_polyline(LayerId::Route, &[a, b], PolylineStyle::ROUTE);
        s.add_polyline(LayerId::Trajectory, &[a, c], PolylineStyle::TRAJECTORY);

        s.clear_layer(LayerId::Route);
        assert_eq!(s.layer_len(LayerId::Markers), 1);
        assert_eq!(s.layer_len(LayerId::Trajectory), 1);
        assert_eq!(s.layer_len(LayerId::Route), 0);
    }

    #[test]
    fn test_rotation_about_marker_centre() {
        let glyph = RotatableMarkerDecorator::new(AircraftIcon::default(), 450.0);
        assert_eq!(glyph.angle(), 90.0);

        let svg = glyph.to_svg(100.0, 50.0);
        assert!(svg.starts_with("<g transform='rotate(90.0 100.00 50.00)'>"));
        assert!(svg.contains("translate(100.00 50.00)"));

        assert_eq!(RotatableMarkerDecorator::new(AircraftIcon::default(), -90.0).angle(), 270.0);
    }

    #[test]
    fn test_render_markers_and_lines() {
        let mut s = surface();
        s.add_marker(LayerId::Markers, "f1", Coordinate::new(0.0, 0.0), 45.0, "Ana <admin>\nCallsign: TAP101");
        s.add_polyline(LayerId::Route, &[Coordinate::new(0.0, 0.0), Coordinate::new(45.0, 90.0)], PolylineStyle::ROUTE);
        s.add_polyline(LayerId::Trajectory, &[Coordinate::new(0.0, 0.0), Coordinate::new(-45.0, -90.0)], PolylineStyle::TRAJECTORY);

        let svg = s.render_svg();
        assert!(svg.contains("<a href='/select/f1'>"));
        assert!(svg.contains("Ana &lt;admin&gt;"));
        assert!(svg.contains("rotate(45.0 800.00 400.00)"));
        assert!(svg.contains("points='800.00,400.00 1200.00,200.00'"));
        assert!(svg.contains("stroke-dasharray='5, 10'"));
        assert!(svg.contains("points='800.00,400.00 400.00,600.00' fill='none' stroke='#0000FF' stroke-width='2'/>"));
    }

    #[test]
    fn test_airport_pins_fit_bounds_and_caption() {
        let mut s = SvgMapSurface::new(1000, 500);
        s.set_base_style(Theme::Dark);
        let (dep, arr) = (Coordinate::new(0.0, 0.0), Coordinate::new(10.0, 20.0));
        s.add_airport(LayerId::Markers, "SBGR", dep, "#FF0000");
        s.add_airport(LayerId::Markers, "SBRJ", arr, "#00FF00");
        s.add_polyline(LayerId::Route, &[dep, arr], PolylineStyle::LEG);
        s.fit_bounds(&[dep, arr], 50.0);
        s.set_caption("SBGR - SBRJ <1 NM>");

        let svg = s.render_svg();
        // 0.025 deg per px, the latitude span is the tight one
        assert!(svg.contains("points='100.00,450.00 900.00,50.00' fill='none' stroke='#000000' stroke-width='2'/>"));
        assert!(svg.contains("<g><title>SBGR</title><circle cx='100.00' cy='450.00' r='6' fill='#FF0000'"));
        assert!(svg.contains("fill='#00FF00'"));
        assert!(!svg.contains("/select/"));
        assert!(svg.contains(&format!("fill='{}'>SBGR - SBRJ &lt;1 NM&gt;</text>", Theme::Dark.text())));
    }

    #[test]
    fn test_fit_bounds_on_single_point_keeps_minimum_scale() {
        let mut s = SvgMapSurface::new(1000, 500);
        s.set_base_style(Theme::Light);
        s.add_airport(LayerId::Markers, "SBGR", Coordinate::new(-23.0, -46.0), "#FF0000");
        s.fit_bounds(&[Coordinate::new(-23.0, -46.0)], 50.0);
        assert!(s.render_svg().contains("<circle cx='500.00' cy='250.00'"));
    }

    #[test]
    fn test_destroy_is_idempotent_and_final() {
        let mut s = surface();
        s.add_marker(LayerId::Markers, "a", Coordinate::new(1.0, 1.0), 0.0, "");
        s.destroy();
        s.destroy();
        assert!(s.is_destroyed());

        s.add_marker(LayerId::Markers, "b", Coordinate::new(2.0, 2.0), 0.0, "");
        s.set_base_style(Theme::Dark);
        assert_eq!(s.layer_len(LayerId::Markers), 0);
        assert_eq!(s.theme(), None);
        assert_eq!(s.render_svg(), "<svg width='1600' height='800' viewBox='0 0 1600 800' xmlns='http://www.w3.org/2000/svg'></svg>");
    }
}
