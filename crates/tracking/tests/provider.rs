#![allow(missing_docs)]
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracking::{
    Bounds, CameraCommand, Frame, HttpRequest, Identity, MapSurface, MarkerSpec, Provider,
    PushSession, PushTransport, TrackingView, VehicleId,
};

pub const API_URL: &str = "http://localhost:3000/api";

#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<Backend>>,
}

#[derive(Default)]
struct Backend {
    roster: Option<Value>,
    active: HashSet<String>,
    last: HashMap<String, Value>,
    canned: HashMap<String, (StatusCode, Bytes)>,
    latency: Option<Duration>,
    requests: Vec<String>,
}

impl MockProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a roster vehicle.
    #[must_use]
    pub fn vehicle(self, id: &str, plate: &str) -> Self {
        {
            let mut state = self.state.lock().expect("lock");
            let roster = state.roster.get_or_insert_with(|| json!([]));
            if let Some(vehicles) = roster.as_array_mut() {
                vehicles.push(json!({"id": id, "placa": plate, "marca": "Toyota", "activo": true}));
            }
        }
        self
    }

    /// Mark a vehicle as having an active trajectory with the given last position.
    #[must_use]
    pub fn active(self, id: &str, last: Value) -> Self {
        {
            let mut state = self.state.lock().expect("lock");
            state.active.insert(id.to_string());
            state.last.insert(id.to_string(), last);
        }
        self
    }

    pub fn set_last(&self, id: &str, last: Value) {
        self.state.lock().expect("lock").last.insert(id.to_string(), last);
    }

    /// End a vehicle's trajectory on the backend side only.
    pub fn end(&self, id: &str) {
        self.state.lock().expect("lock").active.remove(id);
    }

    /// Answer `path` with a fixed status and body.
    pub fn canned(&self, path: &str, status: StatusCode, body: &str) {
        self.state
            .lock()
            .expect("lock")
            .canned
            .insert(path.to_string(), (status, Bytes::from(body.to_string())));
    }

    /// Delay every response by `latency`.
    pub fn slow(&self, latency: Duration) {
        self.state.lock().expect("lock").latency = Some(latency);
    }

    /// Times `path` was requested.
    #[must_use]
    pub fn hits(&self, path: &str) -> usize {
        self.requests().iter().filter(|p| *p == path).count()
    }

    /// Paths requested so far, relative to the API base.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().expect("lock").requests.clone()
    }

    #[must_use]
    pub fn requested(&self, path: &str) -> bool {
        self.requests().iter().any(|p| p == path)
    }

    fn respond(&self, path: &str) -> (StatusCode, Bytes) {
        let mut state = self.state.lock().expect("lock");
        state.requests.push(path.to_string());
        if let Some(canned) = state.canned.get(path) {
            return canned.clone();
        }
        let (status, body) = Self::route(&state, path);
        let body = if body.is_null() { Bytes::new() } else { Bytes::from(body.to_string()) };
        (status, body)
    }

    fn route(state: &Backend, path: &str) -> (StatusCode, Value) {
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        match segments.as_slice() {
            ["vehicles"] => match &state.roster {
                Some(roster) => (StatusCode::OK, roster.clone()),
                None => (StatusCode::INTERNAL_SERVER_ERROR, json!({"message": "down"})),
            },
            ["gps", "trajectory", id, "active"] => {
                if state.active.contains(*id) {
                    (StatusCode::OK, json!({"id": format!("trip-{id}"), "vehiculoId": id}))
                } else {
                    (StatusCode::NOT_FOUND, Value::Null)
                }
            }
            ["gps", "last", id] => state
                .last
                .get(*id)
                .map_or((StatusCode::NOT_FOUND, Value::Null), |last| (StatusCode::OK, last.clone())),
            _ => (StatusCode::NOT_FOUND, Value::Null),
        }
    }
}

impl Provider for MockProvider {}

impl HttpRequest for MockProvider {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let path = request
            .uri()
            .path()
            .strip_prefix("/api")
            .ok_or_else(|| anyhow!("unexpected path: {}", request.uri()))?
            .to_string();
        if request.headers().get(http::header::AUTHORIZATION).is_none() {
            bail!("missing authorization");
        }

        let latency = self.state.lock().expect("lock").latency;
        let (status, body) = self.respond(&path);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Response::builder().status(status).body(body).context("failed to build response")
    }
}

impl realtime::Config for MockProvider {
    async fn get(&self, key: &str) -> Result<String> {
        match key {
            "TRACKING_API_URL" => Ok(API_URL.to_string()),
            _ => Err(anyhow!("unknown config key {key}")),
        }
    }
}

impl Identity for MockProvider {
    async fn access_token(&self) -> Result<String> {
        Ok("mock_access_token".to_string())
    }
}

enum Inbound {
    Frame(Frame),
    Hangup,
}

/// Push transport whose sessions are scripted by the test.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<Wire>>,
}

#[derive(Default)]
struct Wire {
    attempts: usize,
    refuse: usize,
    sessions: usize,
    current: Option<mpsc::UnboundedSender<Inbound>>,
    sent: Vec<(usize, Frame)>,
    tokens: Vec<Option<String>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` connection attempts.
    pub fn refuse(&self, count: usize) {
        self.state.lock().expect("lock").refuse = count;
    }

    /// Deliver a frame on the open session.
    pub fn push(&self, event: &str, payload: Value) {
        let state = self.state.lock().expect("lock");
        let session = state.current.as_ref().expect("open session");
        let _ = session.send(Inbound::Frame(Frame::new(event, payload)));
    }

    /// Drop the open session from the server side.
    pub fn hang_up(&self) {
        let mut state = self.state.lock().expect("lock");
        if let Some(session) = state.current.take() {
            let _ = session.send(Inbound::Hangup);
        }
    }

    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.lock().expect("lock").attempts
    }

    /// Sessions successfully opened.
    #[must_use]
    pub fn sessions(&self) -> usize {
        self.state.lock().expect("lock").sessions
    }

    /// Every frame sent, tagged with the 1-based session it went out on.
    #[must_use]
    pub fn sent(&self) -> Vec<(usize, Frame)> {
        self.state.lock().expect("lock").sent.clone()
    }

    /// Frames sent on one session.
    #[must_use]
    pub fn sent_on(&self, session: usize) -> Vec<Frame> {
        self.sent().into_iter().filter(|(s, _)| *s == session).map(|(_, f)| f).collect()
    }

    #[must_use]
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.state.lock().expect("lock").tokens.clone()
    }
}

impl PushTransport for MockTransport {
    async fn connect(&self, _url: &str, token: Option<&str>) -> Result<Box<dyn PushSession>> {
        let mut state = self.state.lock().expect("lock");
        state.attempts += 1;
        state.tokens.push(token.map(ToString::to_string));
        if state.refuse > 0 {
            state.refuse -= 1;
            bail!("connection refused");
        }

        state.sessions += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        state.current = Some(tx);
        Ok(Box::new(MockSession {
            session: state.sessions,
            inbound: rx,
            wire: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    session: usize,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    wire: Arc<Mutex<Wire>>,
}

#[async_trait]
impl PushSession for MockSession {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.wire.lock().expect("lock").sent.push((self.session, frame));
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        match self.inbound.recv().await? {
            Inbound::Frame(frame) => Some(Ok(frame)),
            Inbound::Hangup => None,
        }
    }
}

/// Map surface recording every call.
#[derive(Clone, Default)]
pub struct MockSurface {
    state: Arc<Mutex<Canvas>>,
}

#[derive(Default)]
pub struct Canvas {
    next: usize,
    pub markers: HashMap<usize, (VehicleId, MarkerSpec)>,
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub views: Vec<CameraCommand>,
    pub bounds: Vec<Bounds>,
}

impl MockSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inspect<T>(&self, f: impl FnOnce(&Canvas) -> T) -> T {
        f(&self.state.lock().expect("lock"))
    }

    /// Marker content currently shown for a vehicle.
    #[must_use]
    pub fn marker(&self, vehicle_id: &str) -> Option<MarkerSpec> {
        self.inspect(|canvas| {
            canvas
                .markers
                .values()
                .find(|(id, _)| id.as_str() == vehicle_id)
                .map(|(_, spec)| spec.clone())
        })
    }
}

impl MapSurface for MockSurface {
    type Marker = usize;

    fn place_marker(&mut self, vehicle_id: &VehicleId, spec: &MarkerSpec) -> usize {
        let mut canvas = self.state.lock().expect("lock");
        canvas.next += 1;
        canvas.created += 1;
        let marker = canvas.next;
        canvas.markers.insert(marker, (vehicle_id.clone(), spec.clone()));
        marker
    }

    fn update_marker(&mut self, marker: &mut usize, spec: &MarkerSpec) {
        let mut canvas = self.state.lock().expect("lock");
        canvas.updated += 1;
        if let Some(entry) = canvas.markers.get_mut(marker) {
            entry.1 = spec.clone();
        }
    }

    fn remove_marker(&mut self, marker: usize) {
        let mut canvas = self.state.lock().expect("lock");
        canvas.removed += 1;
        canvas.markers.remove(&marker);
    }

    fn set_view(&mut self, camera: CameraCommand) {
        self.state.lock().expect("lock").views.push(camera);
    }

    fn fit_bounds(&mut self, bounds: Bounds) {
        self.state.lock().expect("lock").bounds.push(bounds);
    }
}

/// Step the view until `done` holds.
pub async fn until<P, S>(view: &mut TrackingView<P, S>, done: impl Fn(&TrackingView<P, S>) -> bool)
where
    P: Provider,
    S: MapSurface,
{
    tokio::time::timeout(Duration::from_secs(120), async {
        while !done(view) {
            view.step().await;
        }
    })
    .await
    .expect("view should reach the expected state");
}

/// Wait, in virtual time, until `done` holds.
pub async fn eventually(done: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(120), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition should hold eventually");
}
