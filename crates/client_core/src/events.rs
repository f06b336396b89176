use std::sync::Arc;

use shared::domain::CandidateId;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{board::BoardSnapshot, connection::ConnectionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// A user-visible message about something that happened to the board.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub candidate_id: Option<CandidateId>,
}

#[derive(Debug, Clone)]
pub enum BoardEvent {
    SnapshotReplaced(Arc<BoardSnapshot>),
    Notification(Notification),
    ConnectionChanged(ConnectionStatus),
}

/// Cloneable sender side of the board event feed.
#[derive(Clone)]
pub struct Notifier {
    events: broadcast::Sender<BoardEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self { events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: BoardEvent) {
        // Nobody listening is fine; the feed is advisory.
        if self.events.send(event).is_err() {
            debug!("board event dropped: no subscribers");
        }
    }

    pub fn notify(
        &self,
        level: NotificationLevel,
        message: impl Into<String>,
        candidate_id: Option<CandidateId>,
    ) {
        self.emit(BoardEvent::Notification(Notification {
            level,
            message: message.into(),
            candidate_id,
        }));
    }
}
