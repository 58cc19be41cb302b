use std::{sync::Arc, time::Duration};
use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot},
    task::{AbortHandle, JoinHandle},
    time::{self, Interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::errors::{MapError, Result};
use crate::geodesy::Coordinate;
use crate::session::{Session, SessionSelector};
use crate::store::KeyValueStore;
use crate::surface::{LayerId, MapSurface, PolylineStyle};
use crate::telemetry::{AircraftState, FlightPlanEndpoints, RoutePlan, TelemetryClient};
use crate::theme::Theme;

pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReconcilerState {
    Idle,
    Polling,
    Selecting,
    Disposed,
}

#[derive(Debug, Clone)]
struct Selection {
    flight_id: String,
    seq: u64,
    position: Coordinate,
    route_pending: bool,
    plan_pending: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewInfo {
    pub state: ReconcilerState,
    pub session: Session,
    pub theme: Theme,
    pub selected_flight: Option<String>,
    pub aircraft: usize,
}

impl AircraftState {
    fn is_renderable(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite() && self.heading.is_finite()
    }

    fn popup(&self) -> String {
        format!("{}\nCallsign: {}\nAltitude: {:.2} ft", self.username, self.callsign, self.altitude)
    }
}

/// The state machine that keeps a [`MapSurface`] in sync with the live traffic of the active
/// session.
///
/// Responses are tagged with the sequence number of the request that produced them. A snapshot is
/// only applied if it answers the latest poll, route and flight plan results only if they belong
/// to the current selection. Nothing touches the surface once the reconciler is disposed.
pub struct TrafficReconciler<S: MapSurface> {
    surface: S,
    sessions: SessionSelector,
    store: Arc<dyn KeyValueStore>,
    theme: Theme,
    state: ReconcilerState,
    poll_seq: u64,
    selection_seq: u64,
    aircraft: Vec<AircraftState>,
    selection: Option<Selection>,
}

impl<S: MapSurface> TrafficReconciler<S> {
    pub fn new(mut surface: S, store: Arc<dyn KeyValueStore>) -> Self {
        let theme = Theme::load(store.as_ref());
        surface.set_base_style(theme);
        let sessions = SessionSelector::new(store.clone());

        TrafficReconciler {
            surface,
            sessions,
            store,
            theme,
            state: ReconcilerState::Idle,
            poll_seq: 0,
            selection_seq: 0,
            aircraft: Vec::new(),
            selection: None,
        }
    }

    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    pub fn aircraft(&self) -> &[AircraftState] {
        &self.aircraft
    }

    pub fn selected_flight(&self) -> Option<&str> {
        self.selection.as_ref().map(|s| s.flight_id.as_str())
    }

    pub fn active_session(&self) -> Session {
        self.sessions.get_active()
    }

    pub fn view_info(&self) -> ViewInfo {
        ViewInfo {
            state: self.state,
            session: self.sessions.get_active(),
            theme: self.theme,
            selected_flight: self.selected_flight().map(str::to_string),
            aircraft: self.aircraft.len(),
        }
    }

    pub fn render_svg(&self) -> String {
        self.surface.render_svg()
    }

    fn is_disposed(&self) -> bool {
        self.state == ReconcilerState::Disposed
    }

    /// Issues the next poll. Returns the sequence number the response has to carry.
    pub fn begin_poll(&mut self) -> Option<(u64, Session)> {
        if self.is_disposed() {
            return None;
        }
        if self.state == ReconcilerState::Idle {
            self.state = ReconcilerState::Polling;
        }
        self.poll_seq += 1;
        Some((self.poll_seq, self.sessions.get_active()))
    }

    pub fn apply_snapshot(&mut self, seq: u64, result: Result<Vec<AircraftState>>) -> bool {
        if self.is_disposed() {
            debug!("discarding snapshot {} after disposal", seq);
            return false;
        }
        if seq != self.poll_seq {
            debug!("discarding stale snapshot {} (latest {})", seq, self.poll_seq);
            return false;
        }
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("skipping poll cycle {}: {}", seq, e);
                return false;
            }
        };

        let n_received = snapshot.len();
        let aircraft: Vec<AircraftState> =
            snapshot.into_iter().filter(AircraftState::is_renderable).collect();

        self.surface.clear_layer(LayerId::Markers);
        for ac in &aircraft {
            let popup = ac.popup();
            self.surface.add_marker(LayerId::Markers, &ac.flight_id, ac.position(), ac.heading, &popup);
        }
        debug!("poll cycle {}: rendered {} of {} aircraft", seq, aircraft.len(), n_received);

        self.aircraft = aircraft;
        true
    }

    /// Marker click. Drops whatever was drawn for the previous selection right away.
    pub fn begin_selection(&mut self, flight_id: &str) -> Option<(u64, Session)> {
        if self.is_disposed() {
            return None;
        }
        let Some(ac) = self.aircraft.iter().find(|ac| ac.flight_id == flight_id) else {
            warn!("ignoring selection of {}, not in the current snapshot", flight_id);
            return None;
        };
        let position = ac.position();

        self.selection_seq += 1;
        self.surface.clear_layer(LayerId::Route);
        self.surface.clear_layer(LayerId::Trajectory);
        self.selection = Some(Selection {
            flight_id: flight_id.to_string(),
            seq: self.selection_seq,
            position,
            route_pending: true,
            plan_pending: true,
        });
        self.state = ReconcilerState::Selecting;
        info!("selected flight {}", flight_id);

        Some((self.selection_seq, self.sessions.get_active()))
    }

    fn current_selection(&mut self, seq: u64, what: &str) -> Option<&mut Selection> {
        if self.is_disposed() {
            debug!("discarding {} after disposal", what);
            return None;
        }
        match self.selection.as_mut() {
            Some(sel) if sel.seq == seq => Some(sel),
            _ => {
                debug!("discarding {} of superseded selection {}", what, seq);
                None
            }
        }
    }

    fn selection_settled(&mut self) {
        if let Some(sel) = &self.selection {
            if !sel.route_pending && !sel.plan_pending && self.state == ReconcilerState::Selecting {
                self.state = ReconcilerState::Polling;
            }
        }
    }

    pub fn apply_route(&mut self, seq: u64, result: Result<RoutePlan>) -> bool {
        let Some(sel) = self.current_selection(seq, "route") else {
            return false;
        };
        sel.route_pending = false;
        let flight_id = sel.flight_id.clone();

        let applied = match result {
            Ok(route) if route.is_empty() => {
                debug!("no filed route for {}", flight_id);
                self.surface.clear_layer(LayerId::Route);
                true
            }
            Ok(route) => {
                self.surface.clear_layer(LayerId::Route);
                self.surface.add_polyline(LayerId::Route, &route, PolylineStyle::ROUTE);
                true
            }
            Err(e) => {
                warn!("route of {} unavailable: {}", flight_id, e);
                false
            }
        };
        self.selection_settled();
        applied
    }

    pub fn apply_flight_plan(
        &mut self,
        seq: u64,
        result: Result<Option<FlightPlanEndpoints>>,
    ) -> bool {
        let Some(sel) = self.current_selection(seq, "flight plan") else {
            return false;
        };
        sel.plan_pending = false;
        let flight_id = sel.flight_id.clone();
        let position = sel.position;

        let applied = match result {
            Ok(Some(endpoints)) => {
                let trajectory = [endpoints.origin, position, endpoints.destination];
                self.surface.clear_layer(LayerId::Trajectory);
                let style = PolylineStyle::TRAJECTORY;
                self.surface.add_polyline(LayerId::Trajectory, &trajectory, style);
                true
            }
            Ok(None) => {
                debug!("{}", MapError::FlightPlanIncomplete(flight_id));
                false
            }
            Err(e) => {
                warn!("flight plan of {} unavailable: {}", flight_id, e);
                false
            }
        };
        self.selection_settled();
        applied
    }

    /// Switches to another session: everything drawn for the old one goes, including the selection.
    /// Responses still in flight for the old session are invalidated. Choosing the active session
    /// again changes nothing.
    pub fn change_session(&mut self, id: &str) -> Result<Session> {
        if self.is_disposed() {
            return Err(MapError::ReconcilerGone);
        }
        if self.sessions.get_active().id == id {
            debug!("session {} already active", id);
            return Ok(self.sessions.get_active());
        }
        let session = self.sessions.set_active(id)?;

        for layer in LayerId::ALL {
            self.surface.clear_layer(layer);
        }
        self.selection = None;
        self.aircraft.clear();
        self.poll_seq += 1;
        self.selection_seq += 1;
        self.state = ReconcilerState::Idle;

        info!("switched to session {} ({})", session.name, session.id);
        Ok(session)
    }

    pub fn set_theme(&mut self, theme: Theme) {
        if self.is_disposed() {
            return;
        }
        self.surface.set_base_style(theme);
        self.theme = theme;
        theme.save(self.store.as_ref());
    }

    pub fn dispose(&mut self) {
        if self.is_disposed() {
            return;
        }
        self.state = ReconcilerState::Disposed;
        self.selection = None;
        self.surface.destroy();
        info!("traffic reconciler disposed");
    }
}

//--- async driver

enum Command {
    Select(String),
    SetSession(String, oneshot::Sender<Result<Session>>),
    SetTheme(Theme),
    RenderSvg(oneshot::Sender<String>),
    Aircraft(oneshot::Sender<Vec<AircraftState>>),
    View(oneshot::Sender<ViewInfo>),
    Dispose,
}

enum FetchResult {
    Snapshot { seq: u64, result: Result<Vec<AircraftState>> },
    Route { seq: u64, result: Result<RoutePlan> },
    FlightPlan { seq: u64, result: Result<Option<FlightPlanEndpoints>> },
}

/// Cheap to clone. Dropping the last handle disposes the reconciler.
#[derive(Clone)]
pub struct ReconcilerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ReconcilerHandle {
    fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).map_err(|_| MapError::ReconcilerGone)
    }

    async fn request<T>(&self, cmd: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(cmd(reply_tx))?;
        reply_rx.await.map_err(|_| MapError::ReconcilerGone)
    }

    pub fn select(&self, flight_id: &str) -> Result<()> {
        self.send(Command::Select(flight_id.to_string()))
    }

    pub async fn set_session(&self, id: &str) -> Result<Session> {
        let id = id.to_string();
        self.request(|reply| Command::SetSession(id, reply)).await?
    }

    pub fn set_theme(&self, theme: Theme) -> Result<()> {
        self.send(Command::SetTheme(theme))
    }

    pub async fn render_svg(&self) -> Result<String> {
        self.request(Command::RenderSvg).await
    }

    pub async fn aircraft(&self) -> Result<Vec<AircraftState>> {
        self.request(Command::Aircraft).await
    }

    pub async fn view_info(&self) -> Result<ViewInfo> {
        self.request(Command::View).await
    }

    pub fn dispose(&self) {
        let _ = self.send(Command::Dispose);
    }
}

struct Driver<C: TelemetryClient, S: MapSurface> {
    client: Arc<C>,
    core: TrafficReconciler<S>,
    period: Duration,
    results_tx: mpsc::UnboundedSender<FetchResult>,
    poll_in_flight: Option<(u64, JoinHandle<()>)>,
    selection_fetches: Vec<AbortHandle>,
}

/// Runs `reconciler` on its own task, polling `client` every `period` (first poll right away).
pub fn spawn_reconciler<C, S>(
    client: Arc<C>,
    reconciler: TrafficReconciler<S>,
    period: Duration,
) -> (ReconcilerHandle, JoinHandle<()>)
where
    C: TelemetryClient,
    S: MapSurface,
{
    let (tx, commands) = mpsc::unbounded_channel();
    let (results_tx, results) = mpsc::unbounded_channel();

    let driver = Driver {
        client,
        core: reconciler,
        period,
        results_tx,
        poll_in_flight: None,
        selection_fetches: Vec::new(),
    };
    let join = tokio::spawn(driver.run(commands, results));

    (ReconcilerHandle { tx }, join)
}

impl<C: TelemetryClient, S: MapSurface> Driver<C, S> {
    fn ticker(&self) -> Interval {
        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut results: mpsc::UnboundedReceiver<FetchResult>,
    ) {
        info!("polling session {} every {:?}", self.core.active_session().name, self.period);
        let mut ticker = self.ticker();

        loop {
            tokio::select! {
                biased;

                cmd = commands.recv() => match cmd {
                    Some(Command::Select(flight_id)) => self.select(&flight_id),
                    Some(Command::SetSession(id, reply)) => {
                        let unchanged = self.core.active_session().id == id;
                        let result = self.core.change_session(&id);
                        if result.is_ok() && !unchanged {
                            self.abort_poll();
                            self.abort_selection_fetches();
                            ticker = self.ticker();
                        }
                        let _ = reply.send(result);
                    }
                    Some(Command::SetTheme(theme)) => self.core.set_theme(theme),
                    Some(Command::RenderSvg(reply)) => {
                        let _ = reply.send(self.core.render_svg());
                    }
                    Some(Command::Aircraft(reply)) => {
                        let _ = reply.send(self.core.aircraft().to_vec());
                    }
                    Some(Command::View(reply)) => {
                        let _ = reply.send(self.core.view_info());
                    }
                    Some(Command::Dispose) | None => {
                        self.dispose();
                        break;
                    }
                },

                Some(result) = results.recv() => self.apply(result),

                _ = ticker.tick() => self.poll(),
            }
        }
    }

    fn poll(&mut self) {
        if let Some((seq, task)) = &self.poll_in_flight {
            if !task.is_finished() {
                debug!("poll {} still in flight, skipping cycle", seq);
                return;
            }
            // the task ended without reporting, e.g. the client panicked
            warn!("poll {} ended without a snapshot", seq);
            self.poll_in_flight = None;
        }
        let Some((seq, session)) = self.core.begin_poll() else {
            return;
        };

        let client = self.client.clone();
        let tx = self.results_tx.clone();
        let task = tokio::spawn(async move {
            let result = client.fetch_snapshot(session.id).await;
            let _ = tx.send(FetchResult::Snapshot { seq, result });
        });
        self.poll_in_flight = Some((seq, task));
    }

    fn select(&mut self, flight_id: &str) {
        let Some((seq, session)) = self.core.begin_selection(flight_id) else {
            return;
        };
        self.abort_selection_fetches();

        let (client, tx) = (self.client.clone(), self.results_tx.clone());
        let id = flight_id.to_string();
        let route = tokio::spawn(async move {
            let result = client.fetch_route(session.id, &id).await;
            let _ = tx.send(FetchResult::Route { seq, result });
        });

        let (client, tx) = (self.client.clone(), self.results_tx.clone());
        let id = flight_id.to_string();
        let plan = tokio::spawn(async move {
            let result = client.fetch_flight_plan_endpoints(session.id, &id).await;
            let _ = tx.send(FetchResult::FlightPlan { seq, result });
        });

        self.selection_fetches = vec![route.abort_handle(), plan.abort_handle()];
    }

    fn apply(&mut self, result: FetchResult) {
        match result {
            FetchResult::Snapshot { seq, result } => {
                if matches!(self.poll_in_flight, Some((s, _)) if s == seq) {
                    self.poll_in_flight = None;
                }
                self.core.apply_snapshot(seq, result);
            }
            FetchResult::Route { seq, result } => {
                self.core.apply_route(seq, result);
            }
            FetchResult::FlightPlan { seq, result } => {
                self.core.apply_flight_plan(seq, result);
            }
        }
    }

    fn abort_poll(&mut self) {
        if let Some((_, task)) = self.poll_in_flight.take() {
            task.abort();
        }
    }

    fn abort_selection_fetches(&mut self) {
        for task in self.selection_fetches.drain(..) {
            task.abort();
        }
    }

    fn dispose(&mut self) {
        self.abort_poll();
        self.abort_selection_fetches();
        self.core.dispose();
    }
}
