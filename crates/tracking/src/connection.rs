//! # Connection Manager
//!
//! Owns the persistent push-channel connection shared by every tracking view.
//! The handle is created once by the application root and cloned into views.
//!
//! A background driver task connects through a [`PushTransport`], reconnects
//! without limit using the configured backoff, and fans inbound frames out to
//! attached [`Listener`]s. Room membership is reference counted so one view's
//! teardown never leaves a room another view still needs. After every
//! successful connect the driver replays all joined rooms exactly once.
//!
//! Emits are tagged with the connection generation they were issued under.
//! Anything issued while disconnected is discarded instead of being queued,
//! because the replay on the next connect already covers it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, warn};

use crate::config::ReconnectPolicy;
use crate::model::VehicleId;
use crate::provider::Provider;
use crate::subscription::SubscriptionTracker;

pub const JOIN_VEHICLE: &str = "join:vehicle";
pub const LEAVE_VEHICLE: &str = "leave:vehicle";
pub const LOCATION_UPDATE: &str = "location:update";
pub const TRAJECTORY_ENDED: &str = "trajectory:ended";

const EVENT_CAPACITY: usize = 1024;

/// Named event with a JSON payload, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub event: String,
    pub payload: Value,
}

impl Frame {
    #[must_use]
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self { event: event.into(), payload }
    }

    /// `join:vehicle` command. The backend also reads the `vehiculoId` alias.
    #[must_use]
    pub fn join(vehicle_id: &VehicleId) -> Self {
        Self::new(JOIN_VEHICLE, room_payload(vehicle_id))
    }

    #[must_use]
    pub fn leave(vehicle_id: &VehicleId) -> Self {
        Self::new(LEAVE_VEHICLE, room_payload(vehicle_id))
    }
}

fn room_payload(vehicle_id: &VehicleId) -> Value {
    json!({ "vehicleId": vehicle_id, "vehiculoId": vehicle_id })
}

/// Lifecycle and message events delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Message(Frame),
    /// The listener fell behind and this many events were dropped.
    Lagged(u64),
}

/// An open push-channel session.
#[async_trait]
pub trait PushSession: Send {
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Next inbound frame, or `None` once the peer has gone away.
    async fn recv(&mut self) -> Option<Result<Frame>>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens push-channel sessions. Implemented by the host.
pub trait PushTransport: Send + Sync + 'static {
    fn connect(
        &self, url: &str, token: Option<&str>,
    ) -> impl Future<Output = Result<Box<dyn PushSession>>> + Send;
}

enum Command {
    Emit { generation: u64, frame: Frame },
    Close,
}

#[derive(Default)]
struct Rooms {
    tracker: SubscriptionTracker,
    generation: u64,
}

struct Shared {
    events: broadcast::Sender<ChannelEvent>,
    connected: watch::Sender<bool>,
    rooms: Mutex<Rooms>,
    listeners: AtomicUsize,
}

impl Shared {
    fn rooms(&self) -> MutexGuard<'_, Rooms> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle to the shared push channel. The driver stops once the
/// channel is closed or the last handle is dropped.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Connection {
    /// Create the channel and start connecting in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open<T: PushTransport>(
        transport: T, url: impl Into<String>, token: Option<String>, policy: ReconnectPolicy,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (connected, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            events,
            connected,
            rooms: Mutex::new(Rooms::default()),
            listeners: AtomicUsize::new(0),
        });

        let driver = Driver {
            transport,
            url: url.into(),
            token,
            policy,
            shared: Arc::clone(&shared),
            commands: command_rx,
        };
        tokio::spawn(driver.run());

        Self { shared, commands }
    }

    /// Attach a listener. Dropping it detaches.
    #[must_use]
    pub fn listen(&self) -> Listener {
        self.shared.listeners.fetch_add(1, Ordering::SeqCst);
        Listener { events: self.shared.events.subscribe(), shared: Arc::clone(&self.shared) }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.load(Ordering::SeqCst)
    }

    /// Observable connection state.
    #[must_use]
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.shared.connected.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    /// Hold the given vehicle rooms. Only rooms nobody held before are joined.
    pub fn join(&self, ids: &[VehicleId]) {
        let (generation, joined) = {
            let mut rooms = self.shared.rooms();
            let joined = rooms.tracker.acquire(ids);
            (rooms.generation, joined)
        };
        debug!(requested = ids.len(), joined = joined.len(), "joining vehicle rooms");
        self.emit(generation, joined.iter().map(Frame::join));
    }

    /// Release the given vehicle rooms. Rooms still held elsewhere stay joined.
    pub fn leave(&self, ids: &[VehicleId]) {
        let (generation, left) = {
            let mut rooms = self.shared.rooms();
            let left = rooms.tracker.release(ids);
            (rooms.generation, left)
        };
        debug!(requested = ids.len(), left = left.len(), "leaving vehicle rooms");
        self.emit(generation, left.iter().map(Frame::leave));
    }

    /// Vehicle rooms currently joined, once each.
    #[must_use]
    pub fn joined(&self) -> Vec<VehicleId> {
        self.shared.rooms().tracker.replay()
    }

    /// Shut the channel down for good. Views never call this; only the owner
    /// of the application root does.
    pub fn close(&self) {
        if self.commands.send(Command::Close).is_err() {
            debug!("push channel already closed");
        }
    }

    fn emit(&self, generation: u64, frames: impl IntoIterator<Item = Frame>) {
        for frame in frames {
            if self.commands.send(Command::Emit { generation, frame }).is_err() {
                debug!("push channel closed, dropping emit");
                return;
            }
        }
    }
}

/// Open a connection using the provider's settings. The bearer token is read
/// once, here; it is not refreshed for the life of the connection.
pub async fn connect<P, T>(provider: &P, transport: T, policy: ReconnectPolicy) -> Connection
where
    P: Provider,
    T: PushTransport,
{
    let url = socket_url(provider).await;
    let token = match provider.access_token().await {
        Ok(token) if !token.trim().is_empty() => Some(token),
        Ok(_) => None,
        Err(err) => {
            warn!(error = %err, "no session token, connecting anonymously");
            None
        }
    };
    info!(url = %url, authenticated = token.is_some(), "opening push channel");
    Connection::open(transport, url, token, policy)
}

async fn socket_url(provider: &impl Provider) -> String {
    if let Ok(url) = realtime::Config::get(provider, "TRACKING_SOCKET_URL").await {
        return url.trim_end_matches('/').to_string();
    }
    let api = crate::api::api_url(provider).await;
    api.strip_suffix("/api").unwrap_or(&api).to_string()
}

/// An attached listener on the shared channel.
pub struct Listener {
    events: broadcast::Receiver<ChannelEvent>,
    shared: Arc<Shared>,
}

impl Listener {
    /// Next channel event. A listener that fell behind gets a single
    /// [`ChannelEvent::Lagged`] before resuming with the oldest retained event.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        match self.events.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(monotonic_counter.channel_events_missed = missed, "listener lagged");
                Some(ChannelEvent::Lagged(missed))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shared.listeners.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Exit {
    Lost,
    Closed,
}

struct Driver<T> {
    transport: T,
    url: String,
    token: Option<String>,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl<T: PushTransport> Driver<T> {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            let connecting = self.transport.connect(&self.url, self.token.as_deref());
            match timeout(self.policy.connect_timeout, connecting).await {
                Ok(Ok(session)) => {
                    attempt = 0;
                    let exit = self.serve(session).await;
                    self.shared.connected.send_replace(false);
                    let _ = self.shared.events.send(ChannelEvent::Disconnected);
                    if exit == Exit::Closed {
                        break;
                    }
                    warn!(monotonic_counter.channel_disconnects = 1, "push channel disconnected");
                }
                Ok(Err(err)) => {
                    warn!(error = %err, attempt, "push channel connect failed");
                }
                Err(_) => {
                    warn!(
                        attempt,
                        timeout_ms = self.policy.connect_timeout.as_millis(),
                        "push channel connect timed out"
                    );
                }
            }

            attempt = attempt.saturating_add(1);
            if !self.wait(self.policy.backoff(attempt)).await {
                break;
            }
        }

        info!("push channel closed");
    }

    // Sleep out the backoff. Emits arriving meanwhile belong to a dead
    // generation and are discarded. Returns false when closed.
    async fn wait(&mut self, delay: std::time::Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                () = sleep_until(deadline) => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Emit { .. }) => debug!("dropping emit while disconnected"),
                    Some(Command::Close) | None => return false,
                },
            }
        }
    }

    async fn serve(&mut self, mut session: Box<dyn PushSession>) -> Exit {
        let (generation, replay) = {
            let mut rooms = self.shared.rooms();
            rooms.generation += 1;
            (rooms.generation, rooms.tracker.replay())
        };

        self.shared.connected.send_replace(true);
        let _ = self.shared.events.send(ChannelEvent::Connected);
        info!(generation, rooms = replay.len(), "push channel connected");

        for id in &replay {
            if let Err(err) = session.send(Frame::join(id)).await {
                warn!(error = %err, "replaying vehicle rooms failed");
                return Exit::Lost;
            }
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Emit { generation: issued, frame }) if issued == generation => {
                        if let Err(err) = session.send(frame).await {
                            warn!(error = %err, "push channel send failed");
                            return Exit::Lost;
                        }
                    }
                    Some(Command::Emit { .. }) => debug!("dropping emit from previous connection"),
                    Some(Command::Close) | None => {
                        if let Err(err) = session.close().await {
                            debug!(error = %err, "closing push session");
                        }
                        return Exit::Closed;
                    }
                },
                frame = session.recv() => match frame {
                    Some(Ok(frame)) => {
                        let _ = self.shared.events.send(ChannelEvent::Message(frame));
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "push channel receive failed");
                        return Exit::Lost;
                    }
                    None => return Exit::Lost,
                },
            }
        }
    }
}
