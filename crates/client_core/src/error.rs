use reqwest::StatusCode;
use shared::{
    domain::{Decision, Phase},
    error::ApiError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("server rejected request: {0}")]
    Rejected(String),
    #[error("invalid server url '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
}

impl ClientError {
    pub fn from_api_error(status: StatusCode, body: Option<ApiError>) -> Self {
        let message = body
            .map(|error| error.message)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
        Self::Status { status, message }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::CONFLICT)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("channel receive failed: {0}")]
    Receive(String),
    #[error("channel closed by peer")]
    Closed,
}

/// Inbound frame that could not be turned into a workflow event.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{0} frame without a candidateId")]
    MissingCandidateId(&'static str),
}

/// Local checks that block a transition before any network call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("a decision must be selected before submitting")]
    MissingDecision,
    #[error("decision {0:?} cannot confirm a move; choose passed or failed")]
    UnsupportedDecision(Decision),
    #[error("score {0} is outside 0..=100")]
    ScoreOutOfRange(i32),
    #[error("candidate is already in {0}")]
    SamePhase(Phase),
    #[error("candidate is in the terminal phase {0} and cannot move forward")]
    TerminalPhase(Phase),
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("transition request failed: {0}")]
    Remote(#[from] ClientError),
    #[error("no open move proposal for board item {0}")]
    NoProposal(String),
    #[error("move for board item {0} is already being submitted")]
    AlreadySubmitting(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DragError {
    #[error("board item {0} is not on the board")]
    UnknownItem(String),
    #[error("no drag in progress")]
    NotDragging,
}
