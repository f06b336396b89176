use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use shared::{
    domain::{BoardItemId, WorkflowId},
    protocol::{WorkflowEvent, WorkflowEventPayload, WorkflowEventType, WorkflowMetrics},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    api::{HttpWorkflowApi, WorkflowApi},
    board::{BoardSnapshot, BoardStore, SnapshotFailurePolicy},
    config::ClientSettings,
    connection::{ConnectionManager, ReconnectOptions},
    dispatcher::{EventDispatcher, Subscription},
    drag::{DragReconciler, DropTarget},
    error::{ClientError, DragError, TransitionError},
    events::{BoardEvent, NotificationLevel, Notifier},
    focus::{BoardKey, Cursor, FocusAction, FocusController, Overlay},
    transition::{MoveProposal, PhaseTransitions},
    transport::{RoomSubscription, Transport},
};

const EVENT_FEED_CAPACITY: usize = 256;

/// Event types whose arrival means the board may have changed shape.
pub const RELOAD_EVENT_TYPES: [WorkflowEventType; 4] = [
    WorkflowEventType::CandidateMoved,
    WorkflowEventType::CandidateUpdated,
    WorkflowEventType::PhaseCompleted,
    WorkflowEventType::WorkflowUpdated,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshReason {
    Event(WorkflowEventType),
    Requested,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub reconnect: ReconnectOptions,
    pub snapshot_failure: SnapshotFailurePolicy,
    pub workflow_room: Option<WorkflowId>,
}

pub struct BoardSession {
    api: Arc<dyn WorkflowApi>,
    board: Arc<BoardStore>,
    dispatcher: Arc<EventDispatcher>,
    connection: Arc<ConnectionManager>,
    transitions: Arc<PhaseTransitions>,
    notifier: Notifier,
    focus: Arc<Mutex<FocusController>>,
    drag: Mutex<DragReconciler>,
    refresh: mpsc::UnboundedSender<RefreshReason>,
    refresh_rx: Mutex<Option<mpsc::UnboundedReceiver<RefreshReason>>>,
    workflow_room: Option<WorkflowId>,
    subscriptions: Mutex<Vec<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BoardSession {
    pub fn new(
        api: Arc<dyn WorkflowApi>,
        transport: Arc<dyn Transport>,
        options: SessionOptions,
    ) -> Arc<Self> {
        let board = BoardStore::new(Arc::clone(&api), options.snapshot_failure);
        let dispatcher = EventDispatcher::new();
        let connection =
            ConnectionManager::new(transport, Arc::clone(&dispatcher), options.reconnect);
        let notifier = Notifier::new(EVENT_FEED_CAPACITY);
        let transitions =
            PhaseTransitions::new(Arc::clone(&api), Arc::clone(&board), notifier.clone());
        let (refresh, refresh_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            api,
            board,
            dispatcher,
            connection,
            transitions,
            notifier,
            focus: Arc::new(Mutex::new(FocusController::new())),
            drag: Mutex::new(DragReconciler::new()),
            refresh,
            refresh_rx: Mutex::new(Some(refresh_rx)),
            workflow_room: options.workflow_room,
            subscriptions: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn from_settings(settings: &ClientSettings) -> anyhow::Result<Arc<Self>> {
        let api = HttpWorkflowApi::new(&settings.server_url)
            .with_context(|| format!("invalid server url '{}'", settings.server_url))?;
        let transport = settings
            .build_transport()
            .context("failed to set up event transport")?;
        Ok(Self::new(
            Arc::new(api),
            transport,
            SessionOptions {
                reconnect: settings.reconnect_options(),
                snapshot_failure: settings.snapshot_failure,
                workflow_room: settings.workflow_room.as_deref().map(WorkflowId::new),
            },
        ))
    }

    pub fn board(&self) -> &Arc<BoardStore> {
        &self.board
    }

    pub fn snapshot(&self) -> Arc<BoardSnapshot> {
        self.board.snapshot()
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn transitions(&self) -> &Arc<PhaseTransitions> {
        &self.transitions
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<BoardEvent> {
        self.notifier.subscribe()
    }

    fn focus(&self) -> MutexGuard<'_, FocusController> {
        self.focus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drag(&self) -> MutexGuard<'_, DragReconciler> {
        self.drag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cursor(&self) -> Cursor {
        self.focus().cursor()
    }

    pub fn set_text_input_focused(&self, focused: bool) {
        self.focus().set_text_input_focused(focused);
    }

    /// Calling it again only reloads.
    pub async fn start(self: &Arc<Self>) -> Arc<BoardSnapshot> {
        let refresh_rx = self
            .refresh_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(refresh_rx) = refresh_rx {
            self.register_handlers();
            self.spawn_background(refresh_rx);
        }

        let snapshot = self.board.load_snapshot().await;
        if let Some(room) = &self.workflow_room {
            self.connection
                .join_room(RoomSubscription::Workflow(room.clone()));
        }
        self.connection.connect();
        snapshot
    }

    fn register_handlers(&self) {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        for event_type in RELOAD_EVENT_TYPES {
            let refresh = self.refresh.clone();
            let notifier = self.notifier.clone();
            subscriptions.push(self.dispatcher.on(event_type, move |event| {
                if let Some((level, message)) = describe(event) {
                    notifier.notify(level, message, event.candidate_id.clone());
                }
                refresh
                    .send(RefreshReason::Event(event.event_type()))
                    .context("refresh worker stopped")
            }));
        }

        for event_type in [
            WorkflowEventType::SlaWarning,
            WorkflowEventType::BottleneckDetected,
        ] {
            let notifier = self.notifier.clone();
            subscriptions.push(self.dispatcher.on(event_type, move |event| {
                if let Some((level, message)) = describe(event) {
                    notifier.notify(level, message, event.candidate_id.clone());
                }
                Ok(())
            }));
        }

        subscriptions.push(
            self.dispatcher
                .on(WorkflowEventType::Connected, |event| {
                    debug!(event_id = %event.id, "server acknowledged event channel");
                    Ok(())
                }),
        );
    }

    fn spawn_background(&self, mut refresh_rx: mpsc::UnboundedReceiver<RefreshReason>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        let board = Arc::clone(&self.board);
        tasks.push(tokio::spawn(async move {
            while let Some(reason) = refresh_rx.recv().await {
                let mut coalesced = 0usize;
                while refresh_rx.try_recv().is_ok() {
                    coalesced += 1;
                }
                debug!(?reason, coalesced, "reloading board snapshot");
                board.load_snapshot().await;
            }
        }));

        let mut snapshots = self.board.subscribe();
        let focus = Arc::clone(&self.focus);
        let notifier = self.notifier.clone();
        tasks.push(tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = Arc::clone(&snapshots.borrow_and_update());
                focus
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .reconcile(&snapshot.board);
                notifier.emit(BoardEvent::SnapshotReplaced(snapshot));
            }
        }));

        let mut status = self.connection.subscribe_status();
        let notifier = self.notifier.clone();
        tasks.push(tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = *status.borrow_and_update();
                notifier.emit(BoardEvent::ConnectionChanged(current));
                if current.exhausted {
                    notifier.notify(
                        NotificationLevel::Error,
                        "Live updates stopped; reconnect to resume",
                        None,
                    );
                }
            }
        }));
    }

    /// Queues a snapshot reload. Bursts of requests collapse into one fetch.
    pub fn refresh(&self) {
        if self.refresh.send(RefreshReason::Requested).is_err() {
            warn!("refresh requested after the session stopped");
        }
    }

    pub async fn fetch_metrics(&self) -> Result<WorkflowMetrics, ClientError> {
        self.api.fetch_metrics().await
    }

    pub fn handle_key(&self, key: BoardKey) -> Option<FocusAction> {
        let snapshot = self.board.snapshot();
        let action = self.focus().handle_key(key, &snapshot.board)?;
        match &action {
            FocusAction::ProposeMove(proposal) => {
                if let Err(err) = self.transitions.propose(proposal.clone()) {
                    self.focus().close_overlay();
                    self.notifier.notify(
                        NotificationLevel::Warning,
                        err.to_string(),
                        Some(proposal.candidate_id.clone()),
                    );
                }
            }
            FocusAction::Dismiss(Some(Overlay::MoveDialog(item_id))) => {
                self.cancel_move(item_id);
            }
            FocusAction::Refresh => self.refresh(),
            FocusAction::OpenDetail(_)
            | FocusAction::ComposeMail { .. }
            | FocusAction::Dismiss(_) => {}
        }
        Some(action)
    }

    pub fn begin_drag(&self, item_id: &BoardItemId) -> Result<(), DragError> {
        let snapshot = self.board.snapshot();
        self.drag().begin(&snapshot.board, item_id)
    }

    pub fn drop_on(&self, target: DropTarget) -> anyhow::Result<Option<MoveProposal>> {
        let snapshot = self.board.snapshot();
        let Some(proposal) = self.drag().release(&snapshot.board, target)? else {
            return Ok(None);
        };
        self.transitions.propose(proposal.clone())?;
        self.focus()
            .open_overlay(Overlay::MoveDialog(proposal.item_id.clone()));
        Ok(Some(proposal))
    }

    pub async fn confirm_move(&self, item_id: &BoardItemId) -> Result<(), TransitionError> {
        self.transitions.confirm(item_id).await?;
        let mut focus = self.focus();
        if matches!(focus.overlay(), Some(Overlay::MoveDialog(open)) if open == item_id) {
            focus.close_overlay();
        }
        Ok(())
    }

    pub fn cancel_move(&self, item_id: &BoardItemId) {
        match self.transitions.cancel(item_id) {
            Ok(proposal) => debug!(item_id = %proposal.item_id, "move proposal cancelled"),
            Err(TransitionError::NoProposal(_)) => {}
            Err(err) => warn!(item_id = %item_id, "cannot cancel move: {err}"),
        }
        let mut focus = self.focus();
        if matches!(focus.overlay(), Some(Overlay::MoveDialog(open)) if open == item_id) {
            focus.close_overlay();
        }
    }

    /// Disconnects, unregisters handlers and stops background tasks.
    pub fn shutdown(&self) {
        self.connection.disconnect();
        for subscription in self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            self.dispatcher.off(&subscription);
        }
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
        info!("board session stopped");
    }
}

/// User-facing text for an incoming workflow event, if it deserves any.
fn describe(event: &WorkflowEvent) -> Option<(NotificationLevel, String)> {
    let who = || {
        event
            .candidate_id
            .as_ref()
            .map_or_else(|| "a candidate".to_string(), |id| format!("candidate {id}"))
    };
    match &event.payload {
        WorkflowEventPayload::CandidateMoved(data) => {
            let name = data.candidate_name.clone().unwrap_or_else(who);
            let message = match data.to_phase {
                Some(to) => format!("{name} moved to {}", to.label()),
                None => format!("{name} moved"),
            };
            Some((NotificationLevel::Info, message))
        }
        WorkflowEventPayload::PhaseCompleted(data) => {
            let phase = data.phase.map_or("a phase", |phase| phase.label());
            Some((NotificationLevel::Info, format!("{} completed {phase}", who())))
        }
        WorkflowEventPayload::SlaWarning(data) => {
            let subject = match &data.candidate_name {
                Some(name) => format!("{name} ({})", who()),
                None => who(),
            };
            let detail = data.message.clone().unwrap_or_else(|| match data.hours_in_phase {
                Some(hours) => format!("{hours:.0}h in phase"),
                None => "phase SLA at risk".to_string(),
            });
            Some((NotificationLevel::Warning, format!("SLA warning for {subject}: {detail}")))
        }
        WorkflowEventPayload::BottleneckDetected(data) => {
            let message = data.message.clone().unwrap_or_else(|| {
                let phase = data.phase.map_or("a phase", |phase| phase.label());
                format!("Bottleneck detected in {phase}")
            });
            Some((NotificationLevel::Warning, message))
        }
        WorkflowEventPayload::CandidateUpdated(_)
        | WorkflowEventPayload::WorkflowUpdated(_)
        | WorkflowEventPayload::Connected(_)
        | WorkflowEventPayload::Ping => None,
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
