//! # Tracking View
//!
//! Wires the tracking components together for one dashboard view. All state
//! changes are applied by a single task, one event at a time, in the order
//! they are observed: push events from the shared connection, results posted
//! by background fetches, user input and the poll timer. The last write
//! observed wins.
//!
//! Startup loads the roster, joins every vehicle room and seeds the store with
//! the last position of each vehicle that has an active trip. After that the
//! push channel drives updates and the fallback poller refreshes what is
//! already visible.

use std::future;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, info, trace, warn};

use crate::api;
use crate::config::Config;
use crate::connection::{ChannelEvent, Connection, Frame, LOCATION_UPDATE, Listener, TRAJECTORY_ENDED};
use crate::focus::FocusController;
use crate::model::{Roster, VehicleId, VehiclePosition};
use crate::poller::FallbackPoller;
use crate::provider::Provider;
use crate::reconciler::{self, Reconciler};
use crate::renderer::{Bounds, MapRenderer, MapSurface};
use crate::store::PositionStore;

/// Input to a view's event queue.
pub enum ViewEvent<S> {
    /// Roster loaded at startup.
    Roster(Roster),
    /// Last position of a vehicle found active at startup.
    Seeded { vehicle_id: VehicleId, raw: Value },
    /// Last position fetched by the fallback poller.
    Polled { vehicle_id: VehicleId, raw: Value },
    /// A resync found no active trip for a visible vehicle.
    Ended(VehicleId),
    MarkerClicked(VehicleId),
    Select(VehicleId),
    /// The map surface is ready for drawing.
    MapReady(S),
    /// Fit the camera around every visible vehicle.
    FitAll,
    Teardown,
}

/// Sender half of a view's event queue, for the UI and background tasks.
pub struct ViewHandle<S> {
    queue: mpsc::UnboundedSender<ViewEvent<S>>,
}

impl<S> Clone for ViewHandle<S> {
    fn clone(&self) -> Self {
        Self { queue: self.queue.clone() }
    }
}

impl<S> ViewHandle<S> {
    /// Queue an event. Returns `false` once the view is gone.
    pub fn send(&self, event: ViewEvent<S>) -> bool {
        self.queue.send(event).is_ok()
    }

    pub fn select(&self, vehicle_id: impl Into<VehicleId>) -> bool {
        self.send(ViewEvent::Select(vehicle_id.into()))
    }

    pub fn marker_clicked(&self, vehicle_id: impl Into<VehicleId>) -> bool {
        self.send(ViewEvent::MarkerClicked(vehicle_id.into()))
    }

    pub fn map_ready(&self, surface: S) -> bool {
        self.send(ViewEvent::MapReady(surface))
    }

    pub fn fit_all(&self) -> bool {
        self.send(ViewEvent::FitAll)
    }

    pub fn teardown(&self) -> bool {
        self.send(ViewEvent::Teardown)
    }
}

pub struct TrackingView<P: Provider, S: MapSurface> {
    provider: P,
    connection: Connection,
    listener: Option<Listener>,
    connected: watch::Receiver<bool>,
    reconciler: Reconciler,
    roster: Roster,
    roster_loaded: bool,
    subscribed: Vec<VehicleId>,
    store: PositionStore,
    renderer: MapRenderer<S>,
    focus: FocusController,
    poller: FallbackPoller,
    startup: Option<JoinHandle<()>>,
    resync: Option<JoinHandle<()>>,
    ticker: Interval,
    queue: mpsc::UnboundedReceiver<ViewEvent<S>>,
    sender: mpsc::UnboundedSender<ViewEvent<S>>,
    torn_down: bool,
}

impl<P: Provider, S: MapSurface> TrackingView<P, S> {
    /// Attach to the shared connection and start loading the roster.
    ///
    /// Must be called from within a tokio runtime.
    pub fn mount(provider: P, connection: &Connection, config: &Config) -> (Self, ViewHandle<S>) {
        let (sender, queue) = mpsc::unbounded_channel();
        let listener = connection.listen();

        let startup = {
            let provider = provider.clone();
            let sender = sender.clone();
            tokio::spawn(async move {
                let roster = match api::fetch_roster(&provider).await {
                    Ok(roster) => roster,
                    Err(err) => {
                        warn!(error = %err, "loading vehicle roster failed");
                        Roster::default()
                    }
                };
                let _ = sender.send(ViewEvent::Roster(roster));
            })
        };

        let period = config.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let view = Self {
            provider,
            connection: connection.clone(),
            listener: Some(listener),
            connected: connection.connected(),
            reconciler: Reconciler::new(config.unknown_plate.clone()),
            roster: Roster::default(),
            roster_loaded: false,
            subscribed: vec![],
            store: PositionStore::new(),
            renderer: MapRenderer::new(config.timezone, config.marker_color.clone()),
            focus: FocusController::new(config.focus_zoom, config.follow_selected),
            poller: FallbackPoller::new(),
            startup: Some(startup),
            resync: None,
            ticker,
            queue,
            sender: sender.clone(),
            torn_down: false,
        };
        info!("tracking view mounted");

        (view, ViewHandle { queue: sender })
    }

    /// Process events until the view is torn down.
    pub async fn run(&mut self) {
        while self.step().await {}
    }

    /// Wait for and process the next event from any source. Returns `false`
    /// once the view is torn down.
    pub async fn step(&mut self) -> bool {
        if self.torn_down {
            return false;
        }

        tokio::select! {
            Some(event) = self.queue.recv() => self.handle(event),
            event = next_channel_event(self.listener.as_mut()) => match event {
                Some(event) => self.on_channel(event),
                None => {
                    debug!("push channel gone, detaching listener");
                    self.listener = None;
                }
            },
            _ = self.ticker.tick() => self.poll(),
        }

        !self.torn_down
    }

    /// Apply one queued event.
    pub fn handle(&mut self, event: ViewEvent<S>) {
        if self.torn_down {
            return;
        }

        match event {
            ViewEvent::Roster(roster) => self.on_roster(roster),
            ViewEvent::Seeded { vehicle_id, raw } | ViewEvent::Polled { vehicle_id, raw } => {
                if let Some(position) =
                    self.reconciler.normalize_snapshot(&vehicle_id, &raw, &self.roster, Utc::now())
                {
                    self.upsert(position);
                }
            }
            ViewEvent::Ended(vehicle_id) => self.end(&vehicle_id),
            ViewEvent::MarkerClicked(vehicle_id) | ViewEvent::Select(vehicle_id) => {
                self.select(&vehicle_id);
            }
            ViewEvent::MapReady(surface) => {
                self.renderer.attach(surface, &self.store.snapshot());
            }
            ViewEvent::FitAll => {
                let positions = self.store.snapshot();
                if let Some(bounds) = Bounds::around(&positions) {
                    self.renderer.fit_bounds(bounds);
                }
            }
            ViewEvent::Teardown => self.teardown(),
        }
    }

    /// Apply one event from the push channel.
    pub fn on_channel(&mut self, event: ChannelEvent) {
        if self.torn_down {
            return;
        }

        match event {
            ChannelEvent::Connected => debug!("push channel connected"),
            ChannelEvent::Disconnected => debug!("push channel disconnected"),
            ChannelEvent::Lagged(missed) => {
                warn!(missed, "push events missed, resyncing visible vehicles");
                self.resync();
            }
            ChannelEvent::Message(Frame { event, payload }) => match event.as_str() {
                LOCATION_UPDATE => {
                    if let Some(position) =
                        self.reconciler.normalize(&payload, &self.roster, Utc::now())
                    {
                        self.upsert(position);
                    }
                }
                TRAJECTORY_ENDED => {
                    let Some(vehicle_id) = reconciler::vehicle_id(&payload) else {
                        trace!(monotonic_counter.telemetry_dropped = 1, "trajectory end without id");
                        return;
                    };
                    info!(vehicle_id = %vehicle_id, "trajectory ended");
                    self.end(&vehicle_id);
                }
                other => trace!(event = other, "ignoring push event"),
            },
        }
    }

    /// Start a fallback poll round over the vehicles currently visible.
    pub fn poll(&mut self) {
        if self.torn_down {
            return;
        }
        self.poller.tick(&self.provider, self.store.ids(), &self.sender);
    }

    /// Release everything this view holds. The shared connection stays open.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.connection.leave(&self.subscribed);
        self.subscribed.clear();
        self.listener = None;

        self.poller.stop();
        for task in [self.startup.take(), self.resync.take()].into_iter().flatten() {
            task.abort();
        }

        self.renderer.release();
        self.store.clear();
        self.focus.clear();
        info!("tracking view torn down");
    }

    /// Visible vehicles, ordered by id.
    #[must_use]
    pub fn positions(&self) -> Vec<VehiclePosition> {
        self.store.snapshot()
    }

    #[must_use]
    pub const fn store(&self) -> &PositionStore {
        &self.store
    }

    #[must_use]
    pub const fn selected(&self) -> Option<&VehicleId> {
        self.focus.selected()
    }

    #[must_use]
    pub const fn focus(&self) -> &FocusController {
        &self.focus
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Observable connection state, for the UI indicator.
    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    #[must_use]
    pub const fn renderer(&self) -> &MapRenderer<S> {
        &self.renderer
    }

    #[must_use]
    pub const fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Vehicle rooms this view joined.
    #[must_use]
    pub fn subscribed(&self) -> &[VehicleId] {
        &self.subscribed
    }

    #[must_use]
    pub const fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Whether a fallback poll round is in flight.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    fn on_roster(&mut self, roster: Roster) {
        if self.roster_loaded {
            debug!("roster already loaded");
            return;
        }

        self.subscribed = roster.ids();
        self.connection.join(&self.subscribed);
        info!(vehicles = roster.len(), "vehicle roster loaded");

        let provider = self.provider.clone();
        let sender = self.sender.clone();
        let ids = self.subscribed.clone();
        self.startup = Some(tokio::spawn(async move {
            for vehicle_id in ids {
                match api::has_active_trip(&provider, &vehicle_id).await {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) => {
                        warn!(vehicle_id = %vehicle_id, error = %err, "active trip check failed");
                        continue;
                    }
                }
                match api::last_position(&provider, &vehicle_id).await {
                    Ok(Some(raw)) => {
                        if sender.send(ViewEvent::Seeded { vehicle_id, raw }).is_err() {
                            return;
                        }
                    }
                    Ok(None) => debug!(vehicle_id = %vehicle_id, "active vehicle without position"),
                    Err(err) => {
                        warn!(vehicle_id = %vehicle_id, error = %err, "loading last position failed");
                    }
                }
            }
        }));

        self.roster = roster;
        self.roster_loaded = true;
    }

    // Re-check every visible vehicle after missed push events: drop those whose
    // trip is over and refresh the rest.
    fn resync(&mut self) {
        if self.resync.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("resync already running");
            return;
        }

        let provider = self.provider.clone();
        let sender = self.sender.clone();
        let ids = self.store.ids();
        self.resync = Some(tokio::spawn(async move {
            for vehicle_id in ids {
                let event = match api::has_active_trip(&provider, &vehicle_id).await {
                    Ok(false) => ViewEvent::Ended(vehicle_id),
                    Ok(true) => match api::last_position(&provider, &vehicle_id).await {
                        Ok(Some(raw)) => ViewEvent::Polled { vehicle_id, raw },
                        Ok(None) => continue,
                        Err(err) => {
                            warn!(vehicle_id = %vehicle_id, error = %err, "resync position failed");
                            continue;
                        }
                    },
                    Err(err) => {
                        warn!(vehicle_id = %vehicle_id, error = %err, "resync trip check failed");
                        continue;
                    }
                };
                if sender.send(event).is_err() {
                    return;
                }
            }
        }));
    }

    fn end(&mut self, vehicle_id: &VehicleId) {
        if let Some(change) = self.store.remove(vehicle_id) {
            self.renderer.apply(&change);
        }
    }

    fn upsert(&mut self, position: VehiclePosition) {
        let camera = self.focus.on_position(&position);
        if let Some(change) = self.store.set(position) {
            self.renderer.apply(&change);
            if let Some(camera) = camera {
                self.renderer.set_view(camera);
            }
        }
    }

    fn select(&mut self, vehicle_id: &VehicleId) {
        match self.focus.select(vehicle_id, &self.store) {
            Some(camera) => self.renderer.set_view(camera),
            None => debug!(vehicle_id = %vehicle_id, "selected vehicle is not visible"),
        }
    }
}

impl<P: Provider, S: MapSurface> Drop for TrackingView<P, S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn next_channel_event(listener: Option<&mut Listener>) -> Option<ChannelEvent> {
    match listener {
        Some(listener) => listener.recv().await,
        None => future::pending().await,
    }
}
