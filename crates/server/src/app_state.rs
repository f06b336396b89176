use std::{sync::Arc, time::Duration};

use shared::protocol::WorkflowEvent;
use tokio::sync::broadcast;

use crate::api::WorkflowStore;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<WorkflowStore>,
    pub(crate) events: broadcast::Sender<WorkflowEvent>,
    pub(crate) ping_interval: Duration,
}

impl AppState {
    pub(crate) fn new(store: WorkflowStore, event_buffer: usize, ping_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            store: Arc::new(store),
            events,
            ping_interval,
        }
    }

    /// Fans an event out to every live stream; returns how many received it.
    pub(crate) fn publish(&self, event: WorkflowEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }
}
