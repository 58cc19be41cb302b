use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::header,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use traffic_map::{
    airports::{AirportDirectory, LegInfo},
    config::Config,
    errors::MapError,
    leg::{self, LegPlan},
    reconciler::{ReconcilerHandle, TrafficReconciler, spawn_reconciler},
    render,
    session::{SESSIONS, Session},
    store::{JsonFileStore, KeyValueStore},
    surface::SvgMapSurface,
    telemetry::{AircraftState, HttpTelemetryClient},
};

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

#[derive(Clone)]
struct AppState {
    reconciler: ReconcilerHandle,
    airports: Arc<AirportDirectory>,
    usvg_options: Arc<usvg::Options<'static>>,
    map_size: (u32, u32),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "traffic_map=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "telemetry {} polled every {:?}, state in {}",
        config.telemetry_base_url, config.poll_interval, config.state_file
    );

    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&config.state_file)?);
    let surface = SvgMapSurface::new(config.map_width, config.map_height);
    let client =
        Arc::new(HttpTelemetryClient::new(&config.telemetry_base_url, &config.telemetry_api_key)?);
    let (reconciler, reconciler_task) =
        spawn_reconciler(client, TrafficReconciler::new(surface, store), config.poll_interval);

    let state = AppState {
        reconciler: reconciler.clone(),
        airports: Arc::new(AirportDirectory::new(&config.airports_url)),
        usvg_options: Arc::new(render::usvg_options()),
        map_size: (config.map_width, config.map_height),
    };

    let app = Router::new()
        .route("/", get(index))
        .route("/map.svg", get(get_map_svg))
        .route("/map.png", get(get_map_png))
        .route("/aircraft", get(get_aircraft))
        .route("/select/:flight_id", get(select_flight))
        .route("/sessions", get(get_sessions))
        .route("/session/:session_id", get(set_session))
        .route("/theme/:theme", get(set_theme))
        .route("/distance/:from/:to", get(get_distance))
        .route("/leg/:from/:to", get(get_leg))
        .route("/leg/:from/:to/:alternate", get(get_leg_with_alternate))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    reconciler.dispose();
    reconciler_task.await?;
    Ok(())
}

async fn index(State(state): State<AppState>) -> Result<Html<String>, MapError> {
    let view = state.reconciler.view_info().await?;

    let mut html = String::from("<h1>Live Traffic</h1><h2>Sessions</h2><ul>");
    for s in SESSIONS {
        if s == view.session {
            let _ = write!(html, "<li><b>{}</b> (active)</li>", s.name);
        } else {
            let _ = write!(html, "<li><a href='/session/{}'>{}</a></li>", s.id, s.name);
        }
    }
    let _ = write!(
        html,
        "</ul><p>Theme: {} (<a href='/theme/light'>light</a> | <a href='/theme/dark'>dark</a>)</p>\
         <p>{} aircraft, selected: {}</p>\
         <ul><li><a href='/map.svg'>/map.svg</a></li><li><a href='/map.png'>/map.png</a></li>\
         <li><a href='/aircraft'>/aircraft</a></li></ul>",
        view.theme.as_str(),
        view.aircraft,
        view.selected_flight.as_deref().unwrap_or("none")
    );
    Ok(Html(html))
}

fn image_response(content_type: &'static str, body: impl IntoResponse) -> Response {
    ([(header::CONTENT_TYPE, content_type), (header::CACHE_CONTROL, NO_CACHE)], body).into_response()
}

fn svg_response(svg: String) -> Response {
    image_response("image/svg+xml", svg)
}

fn png_response(png: Vec<u8>) -> Response {
    image_response("image/png", png)
}

async fn get_map_svg(State(state): State<AppState>) -> Result<Response, MapError> {
    Ok(svg_response(state.reconciler.render_svg().await?))
}

async fn get_map_png(State(state): State<AppState>) -> Result<Response, MapError> {
    let start = std::time::Instant::now();
    let svg = state.reconciler.render_svg().await?;
    let png = render::svg_to_png(&svg, &state.usvg_options)?;
    info!("rendered map png in {:?}", start.elapsed());

    Ok(png_response(png))
}

async fn get_aircraft(State(state): State<AppState>) -> Result<Json<Vec<AircraftState>>, MapError> {
    Ok(Json(state.reconciler.aircraft().await?))
}

async fn select_flight(
    State(state): State<AppState>,
    Path(flight_id): Path<String>,
) -> Result<Redirect, MapError> {
    state.reconciler.select(&flight_id)?;
    Ok(Redirect::to("/map.svg"))
}

#[derive(Serialize)]
struct SessionList {
    active: Session,
    sessions: &'static [Session],
}

async fn get_sessions(State(state): State<AppState>) -> Result<Json<SessionList>, MapError> {
    let view = state.reconciler.view_info().await?;
    Ok(Json(SessionList { active: view.session, sessions: &SESSIONS }))
}

async fn set_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Redirect, MapError> {
    state.reconciler.set_session(&session_id).await?;
    Ok(Redirect::to("/"))
}

async fn set_theme(
    State(state): State<AppState>,
    Path(theme): Path<String>,
) -> Result<Redirect, MapError> {
    state.reconciler.set_theme(theme.parse()?)?;
    Ok(Redirect::to("/"))
}

async fn get_distance(
    State(state): State<AppState>,
    Path((from, to)): Path<(String, String)>,
) -> Json<LegInfo> {
    Json(state.airports.leg_info(&from, &to).await)
}

#[derive(Deserialize)]
struct LegQuery {
    format: Option<String>,
}

async fn get_leg(
    State(state): State<AppState>,
    Path((from, to)): Path<(String, String)>,
    Query(query): Query<LegQuery>,
) -> Result<Response, MapError> {
    leg_map(&state, &from, &to, None, query).await
}

async fn get_leg_with_alternate(
    State(state): State<AppState>,
    Path((from, to, alternate)): Path<(String, String, String)>,
    Query(query): Query<LegQuery>,
) -> Result<Response, MapError> {
    leg_map(&state, &from, &to, Some(&alternate), query).await
}

async fn leg_map(
    state: &AppState,
    from: &str,
    to: &str,
    alternate: Option<&str>,
    query: LegQuery,
) -> Result<Response, MapError> {
    let theme = state.reconciler.view_info().await?.theme;
    let plan = LegPlan::resolve(&state.airports, from, to, alternate).await;
    let (width, height) = state.map_size;
    let svg = leg::render_leg_map(&plan, width, height, theme);

    match query.format.as_deref() {
        Some("png") => Ok(png_response(render::svg_to_png(&svg, &state.usvg_options)?)),
        _ => Ok(svg_response(svg)),
    }
}
