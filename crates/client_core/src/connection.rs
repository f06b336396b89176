use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::StreamExt;
use shared::protocol::WorkflowEventType;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use crate::{
    dispatcher::EventDispatcher,
    error::TransportError,
    transport::{FrameStream, RoomSubscription, Transport},
};

pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    /// Automatic retries gave up; stays set until `reconnect()` or a successful open.
    pub exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct ReconnectOptions {
    pub auto_reconnect: bool,
    pub reconnect_interval: Duration,
    pub manual_reconnect_delay: Duration,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_interval: Duration::from_millis(3000),
            manual_reconnect_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    attempts: u32,
    exhausted: bool,
    /// Tasks from an older generation must not touch state.
    generation: u64,
    session: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
    upstream: Option<mpsc::UnboundedSender<String>>,
    rooms: Vec<RoomSubscription>,
}

impl Inner {
    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            reconnect_attempts: self.attempts,
            exhausted: self.exhausted,
        }
    }

    fn retry_pending(&self) -> bool {
        self.retry.as_ref().is_some_and(|task| !task.is_finished())
    }
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    dispatcher: Arc<EventDispatcher>,
    options: ReconnectOptions,
    inner: Mutex<Inner>,
    status: watch::Sender<ConnectionStatus>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        dispatcher: Arc<EventDispatcher>,
        options: ReconnectOptions,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Arc::new(Self {
            transport,
            dispatcher,
            options,
            inner: Mutex::new(Inner::default()),
            status,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.status.send_replace(inner.status());
    }

    pub fn status(&self) -> ConnectionStatus {
        self.lock().status()
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().attempts
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// No-op unless the channel is fully idle.
    pub fn connect(self: &Arc<Self>) {
        let mut inner = self.lock();
        if inner.state != ConnectionState::Disconnected || inner.retry_pending() {
            debug!(state = ?inner.state, "connect ignored: channel already active");
            return;
        }
        inner.generation += 1;
        let generation = inner.generation;
        self.start_attempt(&mut inner, generation);
    }

    fn start_attempt(self: &Arc<Self>, inner: &mut Inner, generation: u64) {
        inner.state = ConnectionState::Connecting;
        inner.retry = None;
        self.publish(inner);
        debug!(
            transport = self.transport.name(),
            attempt = inner.attempts + 1,
            "opening event channel"
        );
        let manager = Arc::clone(self);
        inner.session = Some(tokio::spawn(async move {
            manager.run_session(generation).await;
        }));
    }

    async fn run_session(self: Arc<Self>, generation: u64) {
        let failure = match self.transport.open().await {
            Ok(channel) => {
                if !self.on_open(generation, channel.upstream) {
                    return;
                }
                self.pump(channel.frames).await
            }
            Err(err) => err,
        };
        self.on_failure(generation, failure);
    }

    fn on_open(&self, generation: u64, upstream: Option<mpsc::UnboundedSender<String>>) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        inner.state = ConnectionState::Connected;
        inner.attempts = 0;
        inner.exhausted = false;
        if let Some(upstream) = &upstream {
            for room in &inner.rooms {
                self.send_join(upstream, room);
            }
        }
        inner.upstream = upstream;
        self.publish(&inner);
        info!(transport = self.transport.name(), "event channel connected");
        true
    }

    fn send_join(&self, upstream: &mpsc::UnboundedSender<String>, room: &RoomSubscription) {
        if let Some(message) = self.transport.room_message(room) {
            if upstream.send(message).is_err() {
                debug!(?room, "room join not sent: writer closed");
            }
        }
    }

    async fn pump(&self, mut frames: FrameStream) -> TransportError {
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(text) => self.handle_frame(&text),
                Err(err) => return err,
            }
        }
        TransportError::Closed
    }

    fn handle_frame(&self, text: &str) {
        match self.transport.decode(text) {
            Ok(event) if event.event_type() == WorkflowEventType::Ping => {
                trace!("keep-alive ping");
            }
            Ok(event) => {
                self.dispatcher.dispatch(&event);
            }
            Err(err) => {
                warn!(transport = self.transport.name(), "dropping malformed event frame: {err}");
            }
        }
    }

    fn on_failure(self: &Arc<Self>, generation: u64, failure: TransportError) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        inner.state = ConnectionState::Disconnected;
        inner.session = None;
        inner.upstream = None;
        warn!(transport = self.transport.name(), "event channel failed: {failure}");

        if !self.options.auto_reconnect {
            self.publish(&inner);
            return;
        }
        inner.attempts = (inner.attempts + 1).min(MAX_RECONNECT_ATTEMPTS);
        if inner.attempts >= MAX_RECONNECT_ATTEMPTS {
            inner.exhausted = true;
            self.publish(&inner);
            warn!(
                attempts = inner.attempts,
                "giving up on event channel until reconnect is requested"
            );
            return;
        }

        let delay = self.options.reconnect_interval * inner.attempts;
        info!(attempt = inner.attempts, ?delay, "scheduling event channel retry");
        let manager = Arc::clone(self);
        inner.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = manager.lock();
            if inner.generation == generation && inner.state == ConnectionState::Disconnected {
                manager.start_attempt(&mut inner, generation);
            }
        }));
        self.publish(&inner);
    }

    /// Tears the channel down and cancels any scheduled retry.
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        if let Some(session) = inner.session.take() {
            session.abort();
        }
        if let Some(retry) = inner.retry.take() {
            retry.abort();
        }
        inner.upstream = None;
        let was = inner.state;
        inner.state = ConnectionState::Disconnected;
        self.publish(&inner);
        if was != ConnectionState::Disconnected {
            info!(transport = self.transport.name(), "event channel disconnected");
        }
    }

    /// Opens a fresh channel with the attempt counter reset.
    pub fn reconnect(self: &Arc<Self>) {
        self.disconnect();
        let mut inner = self.lock();
        inner.attempts = 0;
        inner.exhausted = false;
        self.publish(&inner);
        let generation = inner.generation;
        let delay = self.options.manual_reconnect_delay;
        let manager = Arc::clone(self);
        inner.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut inner = manager.lock();
                if inner.generation != generation {
                    return;
                }
                inner.retry = None;
            }
            manager.connect();
        }));
        info!(?delay, "manual reconnect requested");
    }

    /// Remembered across reconnects.
    pub fn join_room(&self, room: RoomSubscription) {
        let mut inner = self.lock();
        if inner.rooms.contains(&room) {
            return;
        }
        if let Some(upstream) = &inner.upstream {
            self.send_join(upstream, &room);
        }
        info!(?room, "joined room");
        inner.rooms.push(room);
    }

    pub fn rooms(&self) -> Vec<RoomSubscription> {
        self.lock().rooms.clone()
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
