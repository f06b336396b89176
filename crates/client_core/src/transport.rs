use std::pin::Pin;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{future, SinkExt, Stream, StreamExt};
use reqwest::{header, Client};
use shared::{
    domain::{CandidateId, WorkflowId},
    protocol::{
        CandidateUpdatedData, SocketChannel, SocketClientMessage, SocketServerMessage,
        WorkflowEvent, WorkflowEventPayload,
    },
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::{
    api::EVENTS_PATH,
    error::{FrameError, TransportError},
};

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An established channel: inbound frames plus an optional upstream sender.
pub struct OpenChannel {
    pub frames: FrameStream,
    pub upstream: Option<mpsc::UnboundedSender<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomSubscription {
    Workflow(WorkflowId),
    Candidate(CandidateId),
}

impl RoomSubscription {
    pub fn join_message(&self) -> SocketClientMessage {
        match self {
            RoomSubscription::Workflow(id) => SocketClientMessage::JoinWorkflow(id.clone()),
            RoomSubscription::Candidate(id) => SocketClientMessage::JoinCandidate(id.clone()),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn open(&self) -> Result<OpenChannel, TransportError>;

    fn decode(&self, frame: &str) -> Result<WorkflowEvent, FrameError> {
        Ok(serde_json::from_str(frame)?)
    }

    fn room_message(&self, _room: &RoomSubscription) -> Option<String> {
        None
    }
}

pub struct EventStreamTransport {
    http: Client,
    url: String,
}

impl EventStreamTransport {
    pub fn new(server_url: &str) -> Self {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: &str) -> Self {
        Self {
            http,
            url: format!("{}{EVENTS_PATH}", server_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl Transport for EventStreamTransport {
    fn name(&self) -> &'static str {
        "event_stream"
    }

    async fn open(&self) -> Result<OpenChannel, TransportError> {
        let connect_error = |reason: String| TransportError::Connect {
            endpoint: self.url.clone(),
            reason,
        };
        let response = self
            .http
            .get(&self.url)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|err| connect_error(err.to_string()))?
            .error_for_status()
            .map_err(|err| connect_error(err.to_string()))?;
        debug!(url = %self.url, "event stream opened");

        let frames = sse_frames(response.bytes_stream());

        Ok(OpenChannel {
            frames: Box::pin(frames),
            upstream: None,
        })
    }
}

/// Decodes an SSE byte stream into the `data` of each event.
pub fn sse_frames<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, TransportError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    bytes.eventsource().filter_map(|event| {
        future::ready(match event {
            Ok(event) if event.data.is_empty() => None,
            Ok(event) => Some(Ok(event.data)),
            Err(err) => Some(Err(TransportError::Receive(err.to_string()))),
        })
    })
}

pub struct SocketTransport {
    url: String,
}

impl SocketTransport {
    /// Derives `ws(s)://host/ws` from an `http(s)://` server url.
    pub fn from_server_url(server_url: &str) -> Result<Self, TransportError> {
        let server_url = server_url.trim_end_matches('/');
        let ws_url = if server_url.starts_with("https://") {
            server_url.replacen("https://", "wss://", 1)
        } else if server_url.starts_with("http://") {
            server_url.replacen("http://", "ws://", 1)
        } else {
            return Err(TransportError::Connect {
                endpoint: server_url.to_string(),
                reason: "server_url must start with http:// or https://".to_string(),
            });
        };
        Ok(Self {
            url: format!("{ws_url}/ws"),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn name(&self) -> &'static str {
        "socket"
    }

    async fn open(&self) -> Result<OpenChannel, TransportError> {
        let (ws_stream, _) =
            connect_async(self.url.as_str())
                .await
                .map_err(|err| TransportError::Connect {
                    endpoint: self.url.clone(),
                    reason: err.to_string(),
                })?;
        let (mut ws_writer, ws_reader) = ws_stream.split();

        let (upstream, mut upstream_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(text) = upstream_rx.recv().await {
                if ws_writer.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let frames = ws_reader.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
                Ok(_) => None,
                Err(err) => Some(Err(TransportError::Receive(err.to_string()))),
            }
        });

        Ok(OpenChannel {
            frames: Box::pin(frames),
            upstream: Some(upstream),
        })
    }

    fn decode(&self, frame: &str) -> Result<WorkflowEvent, FrameError> {
        decode_socket_frame(frame)
    }

    fn room_message(&self, room: &RoomSubscription) -> Option<String> {
        serde_json::to_string(&room.join_message()).ok()
    }
}

/// Bare candidate updates become `candidate_updated` events.
pub fn decode_socket_frame(frame: &str) -> Result<WorkflowEvent, FrameError> {
    let message: SocketServerMessage = serde_json::from_str(frame)?;
    let decode_error = match serde_json::from_value::<WorkflowEvent>(message.payload.clone()) {
        Ok(event) => return Ok(event),
        Err(err) => err,
    };

    let channel = match message.event {
        SocketChannel::CandidateUpdate => "candidate_update",
        SocketChannel::InterviewOutcomeUpdated => "interview_outcome_updated",
        SocketChannel::GlobalUpdate | SocketChannel::WorkflowUpdate => {
            return Err(decode_error.into())
        }
    };
    let candidate_id = message
        .payload
        .get("candidateId")
        .and_then(|value| value.as_str())
        .ok_or(FrameError::MissingCandidateId(channel))?;
    let outcome = message
        .payload
        .get("outcome")
        .and_then(|value| value.as_str())
        .map(str::to_string);
    let id = message
        .payload
        .get("id")
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(WorkflowEvent::new(
        id,
        WorkflowEventPayload::CandidateUpdated(CandidateUpdatedData {
            field: Some(channel.to_string()),
            outcome,
        }),
    )
    .with_candidate(CandidateId::new(candidate_id)))
}
