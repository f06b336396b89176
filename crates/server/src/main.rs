use std::{convert::Infallible, net::SocketAddr, path::Path, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::{future, stream, SinkExt, Stream, StreamExt};
use shared::{
    error::{ApiError, ErrorCode},
    fixtures::demo_board,
    protocol::{
        Board, ConnectedData, MoveCandidateRequest, MoveCandidateResponse, SocketClientMessage,
        WorkflowEvent, WorkflowEventPayload, WorkflowMetrics,
    },
};
use tokio::{
    sync::broadcast::error::RecvError,
    time::{interval_at, Instant},
};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream, IntervalStream};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod api;
mod app_state;
mod config;
mod rooms;

use api::{new_event, WorkflowStore};
use app_state::AppState;
use config::{load_settings, load_settings_from};
use rooms::Rooms;

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = match std::env::args().nth(1) {
        Some(path) => load_settings_from(Path::new(&path))?,
        None => load_settings(),
    };
    let board = initial_board(settings.seed_demo_board);
    info!(
        candidates = board.candidate_count(),
        columns = board.columns.len(),
        "board loaded"
    );
    let state = AppState::new(
        WorkflowStore::new(board),
        settings.event_buffer,
        settings.ping_interval(),
    );
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// One column per phase; candidates only when seeding is on.
fn initial_board(seed: bool) -> Board {
    let mut board = demo_board(Utc::now());
    if !seed {
        for column in &mut board.columns {
            column.candidates.clear();
        }
    }
    board
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/workflow/kanban", get(kanban))
        .route("/api/workflow/move-candidate", post(move_candidate))
        .route("/api/workflow/events", get(event_stream).post(publish_event))
        .route("/api/workflow/metrics", get(metrics))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

fn error_response(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn kanban(State(state): State<Arc<AppState>>) -> Json<Board> {
    Json(state.store.board().await)
}

async fn metrics(State(state): State<Arc<AppState>>) -> Json<WorkflowMetrics> {
    Json(state.store.metrics().await)
}

async fn move_candidate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MoveCandidateRequest>,
) -> Result<Json<MoveCandidateResponse>, (StatusCode, Json<ApiError>)> {
    let events = state.store.move_candidate(&request).await.map_err(|err| {
        warn!(candidate = %request.candidate_id, %err, "move rejected");
        error_response(err)
    })?;
    info!(
        candidate = %request.candidate_id,
        from = %request.from_phase,
        to = %request.to_phase,
        "candidate moved"
    );
    for event in events {
        state.publish(event);
    }
    Ok(Json(MoveCandidateResponse {
        success: true,
        message: Some(format!("moved to {}", request.to_phase.label())),
    }))
}

async fn publish_event(
    State(state): State<Arc<AppState>>,
    Json(mut event): Json<WorkflowEvent>,
) -> StatusCode {
    if event.id.is_empty() {
        event.id = Uuid::new_v4().to_string();
    }
    let event_type = event.event_type();
    let receivers = state.publish(event);
    debug!(?event_type, receivers, "event published");
    StatusCode::ACCEPTED
}

fn sse_event(event: &WorkflowEvent) -> Option<Result<Event, Infallible>> {
    match Event::default().json_data(event) {
        Ok(frame) => Some(Ok(frame)),
        Err(err) => {
            warn!(%err, "dropping unserialisable event");
            None
        }
    }
}

async fn event_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let client_id = Uuid::new_v4().to_string();
    info!(%client_id, "event stream opened");
    let connected = new_event(WorkflowEventPayload::Connected(ConnectedData {
        client_id: Some(client_id),
        message: Some("connected to workflow events".to_string()),
    }));

    let live = BroadcastStream::new(state.events.subscribe()).filter_map(|item| {
        future::ready(match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "event stream lagged");
                None
            }
        })
    });
    let period = state.ping_interval;
    let pings = IntervalStream::new(interval_at(Instant::now() + period, period))
        .map(|_| new_event(WorkflowEventPayload::Ping));

    let frames = stream::once(future::ready(connected))
        .chain(stream::select(live, pings))
        .filter_map(|event| future::ready(sse_event(&event)));
    Sse::new(frames)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();
    let mut rooms = Rooms::default();

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<SocketClientMessage>(&text) {
                        Ok(message) => {
                            debug!(?message, "socket joined room");
                            rooms.join(message);
                        }
                        Err(err) => warn!(%err, "ignoring unrecognised socket message"),
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            event = events_rx.recv() => match event {
                Ok(event) => {
                    let Some(message) = rooms.message_for(&event) else {
                        continue;
                    };
                    let Ok(text) = serde_json::to_string(&message) else {
                        continue;
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "socket client lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("socket closed");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
