use super::*;
use crate::{
    board::SnapshotOrigin,
    connection::ConnectionState,
    error::TransportError,
    events::Notification,
    test_support::{eventually, FakeWorkflowApi},
    transport::OpenChannel,
};
use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{stream, Stream, StreamExt};
use shared::{
    domain::{CandidateId, Decision, Phase},
    protocol::{
        Board, CandidateMovedData, MoveCandidateRequest, MoveCandidateResponse, SlaWarningData,
    },
};
use std::{convert::Infallible, time::Duration};
use tokio::{net::TcpListener, sync::broadcast};
use tokio_stream::wrappers::BroadcastStream;

/// Opens a channel that never yields anything.
struct QuietTransport;

#[async_trait]
impl Transport for QuietTransport {
    fn name(&self) -> &'static str {
        "quiet"
    }

    async fn open(&self) -> Result<OpenChannel, TransportError> {
        Ok(OpenChannel {
            frames: Box::pin(stream::pending::<Result<String, TransportError>>()),
            upstream: None,
        })
    }
}

async fn started_session() -> (Arc<FakeWorkflowApi>, Arc<BoardSession>) {
    let api = Arc::new(FakeWorkflowApi::new());
    let session = BoardSession::new(api.clone(), Arc::new(QuietTransport), SessionOptions::default());
    session.start().await;
    (api, session)
}

fn drain_notifications(events: &mut broadcast::Receiver<BoardEvent>) -> Vec<Notification> {
    let mut notifications = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BoardEvent::Notification(notification) = event {
            notifications.push(notification);
        }
    }
    notifications
}

fn candidate_moved(id: &str, candidate: &str) -> WorkflowEvent {
    WorkflowEvent::new(
        id,
        WorkflowEventPayload::CandidateMoved(CandidateMovedData {
            to_phase: Some(Phase::TechnicalInterview),
            ..CandidateMovedData::default()
        }),
    )
    .with_candidate(CandidateId::new(candidate))
}

#[tokio::test]
async fn sla_warning_notifies_without_reloading() {
    let (api, session) = started_session().await;
    let mut events = session.subscribe_events();
    assert_eq!(api.fetch_calls(), 1);

    let warning = WorkflowEvent::new(
        "evt-sla",
        WorkflowEventPayload::SlaWarning(SlaWarningData {
            hours_in_phase: Some(50.0),
            threshold_hours: Some(48.0),
            ..SlaWarningData::default()
        }),
    )
    .with_candidate(CandidateId::new("cand-9"));
    assert_eq!(session.dispatcher().dispatch(&warning), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let notifications = drain_notifications(&mut events);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Warning);
    assert_eq!(notifications[0].candidate_id, Some(CandidateId::new("cand-9")));
    assert!(notifications[0].message.contains("cand-9"));
    assert_eq!(api.fetch_calls(), 1);
}

#[tokio::test]
async fn bursts_of_relevant_events_collapse_into_one_reload() {
    let (api, session) = started_session().await;
    let mut events = session.subscribe_events();

    for n in 0..3 {
        session
            .dispatcher()
            .dispatch(&candidate_moved(&format!("evt-{n}"), "cand-2"));
    }
    eventually(|| api.fetch_calls() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(api.fetch_calls(), 2);

    let mut replaced = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, BoardEvent::SnapshotReplaced(_)) {
            replaced += 1;
        }
    }
    assert!(replaced >= 1);
}

#[tokio::test]
async fn keyboard_proposal_is_opened_and_escape_cancels_it() {
    let (api, session) = started_session().await;
    let marco = BoardItemId::new("item-1");

    let action = session.handle_key(BoardKey::Space).expect("action");
    assert!(matches!(action, FocusAction::ProposeMove(_)));
    assert_eq!(session.transitions().open_proposals().len(), 1);

    // Shortcuts stay off while the dialog is up; Escape still closes it.
    assert_eq!(session.handle_key(BoardKey::Char('r')), None);
    session.handle_key(BoardKey::Escape);
    assert!(session.transitions().open_proposals().is_empty());
    assert_eq!(
        session.transitions().state(&marco),
        crate::transition::TransitionState::Idle
    );

    session.handle_key(BoardKey::Char('r'));
    eventually(|| api.fetch_calls() == 2).await;
    assert_eq!(api.move_calls(), 0);
}

#[tokio::test]
async fn drag_then_confirm_moves_only_after_server_accepts() {
    let (api, session) = started_session().await;
    let marco = BoardItemId::new("item-1");
    let before = session.snapshot();

    session.begin_drag(&marco).expect("begin");
    assert_eq!(session.drop_on(DropTarget::Column(0)).expect("same column"), None);

    session.begin_drag(&marco).expect("begin");
    let proposal = session
        .drop_on(DropTarget::Column(1))
        .expect("drop")
        .expect("proposal");
    assert_eq!(proposal.to_phase, Phase::PhoneScreening);
    assert_eq!(session.snapshot().revision, before.revision);
    assert_eq!(session.snapshot().board.locate(&marco), Some((0, 0)));

    session
        .transitions()
        .edit_form(&marco, |form| form.decision = Some(Decision::Passed))
        .expect("form");
    session.confirm_move(&marco).await.expect("confirm");
    assert_eq!(api.move_calls(), 1);
    assert_eq!(session.snapshot().board.locate(&marco).map(|(c, _)| c), Some(1));
    assert_eq!(session.handle_key(BoardKey::Char('r')), Some(FocusAction::Refresh));
}

#[tokio::test]
async fn cursor_is_clamped_when_a_refresh_shrinks_the_column() {
    let (api, session) = started_session().await;
    session.handle_key(BoardKey::Up);
    assert_eq!(session.cursor().row, 2);

    api.move_elsewhere(&CandidateId::new("cand-3"), 4);
    api.move_elsewhere(&CandidateId::new("cand-2"), 4);
    session.refresh();
    eventually(|| session.cursor().row == 0).await;
    assert_eq!(session.snapshot().board.columns[0].candidates.len(), 1);
}

#[tokio::test]
async fn shutdown_unregisters_handlers() {
    let (api, session) = started_session().await;
    session.shutdown();
    assert_eq!(
        session
            .dispatcher()
            .dispatch(&candidate_moved("late", "cand-1")),
        0
    );
    assert_eq!(session.connection().state(), ConnectionState::Disconnected);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(api.fetch_calls(), 1);
}

#[derive(Clone)]
struct BoardServer {
    api: Arc<FakeWorkflowApi>,
    events: broadcast::Sender<WorkflowEvent>,
}

async fn serve_kanban(State(server): State<BoardServer>) -> Json<Board> {
    Json(server.api.fetch_board().await.expect("fake board"))
}

async fn serve_move(
    State(server): State<BoardServer>,
    Json(request): Json<MoveCandidateRequest>,
) -> (StatusCode, Json<MoveCandidateResponse>) {
    match server.api.move_candidate(&request).await {
        Ok(()) => {
            let _ = server.events.send(
                WorkflowEvent::new(
                    "evt-move",
                    WorkflowEventPayload::CandidateMoved(CandidateMovedData {
                        from_phase: Some(request.from_phase),
                        to_phase: Some(request.to_phase),
                        ..CandidateMovedData::default()
                    }),
                )
                .with_candidate(request.candidate_id.clone()),
            );
            (
                StatusCode::OK,
                Json(MoveCandidateResponse {
                    success: true,
                    message: None,
                }),
            )
        }
        Err(err) => (
            StatusCode::CONFLICT,
            Json(MoveCandidateResponse {
                success: false,
                message: Some(err.to_string()),
            }),
        ),
    }
}

async fn serve_events(
    State(server): State<BoardServer>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let live = BroadcastStream::new(server.events.subscribe()).filter_map(|event| async move {
        let event = event.ok()?;
        Event::default().json_data(&event).ok().map(Ok)
    });
    let hello = stream::once(async {
        Ok(Event::default().data(r#"{"id":"hello","type":"connected","data":{}}"#))
    });
    Sse::new(hello.chain(live))
}

async fn spawn_board_server() -> anyhow::Result<(String, BoardServer)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (events, _) = broadcast::channel(16);
    let server = BoardServer {
        api: Arc::new(FakeWorkflowApi::new()),
        events,
    };
    let app = Router::new()
        .route("/api/workflow/kanban", get(serve_kanban))
        .route("/api/workflow/move-candidate", post(serve_move))
        .route("/api/workflow/events", get(serve_events))
        .with_state(server.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), server))
}

#[tokio::test]
async fn live_session_moves_candidate_and_follows_remote_changes() {
    let (server_url, server) = spawn_board_server().await.expect("spawn server");
    let session = BoardSession::from_settings(&ClientSettings {
        server_url: server_url.clone(),
        reconnect_interval_ms: 20,
        ..ClientSettings::default()
    })
    .expect("session");

    let first = session.start().await;
    assert_eq!(first.origin, SnapshotOrigin::Live);
    let mut status = session.connection().subscribe_status();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| s.state == ConnectionState::Connected),
    )
    .await
    .expect("connected in time")
    .expect("status");

    // Marco moves from CV review to phone screening with a passing score.
    let marco = BoardItemId::new("item-1");
    let snapshot = session.snapshot();
    let candidate = snapshot.board.candidate(&marco).expect("marco");
    assert_eq!(candidate.current_phase, Phase::CvReview);
    session
        .transitions()
        .propose(MoveProposal::new(candidate, Phase::CvReview, Phase::PhoneScreening).expect("proposal"))
        .expect("propose");
    session
        .transitions()
        .edit_form(&marco, |form| {
            form.decision = Some(Decision::Passed);
            form.score = Some(85);
        })
        .expect("form");
    session.confirm_move(&marco).await.expect("confirm");

    let reread = HttpWorkflowApi::new(&server_url)
        .expect("api")
        .fetch_board()
        .await
        .expect("board");
    assert_eq!(
        reread.candidate(&marco).map(|c| c.current_phase),
        Some(Phase::PhoneScreening)
    );
    assert_eq!(
        session.snapshot().board.candidate(&marco).map(|c| c.current_phase),
        Some(Phase::PhoneScreening)
    );

    // Another operator moves Giulia; the pushed event makes this client reload.
    server.api.move_elsewhere(&CandidateId::new("cand-2"), 2);
    server
        .events
        .send(candidate_moved("evt-remote", "cand-2"))
        .expect("subscriber");
    let giulia = BoardItemId::new("item-2");
    eventually(|| session.snapshot().board.locate(&giulia).map(|(c, _)| c) == Some(2)).await;

    session.shutdown();
}
