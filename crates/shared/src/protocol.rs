use std::{collections::HashSet, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    BoardItemId, CandidateId, CandidateStatus, ColumnId, Decision, FlagSeverity, Phase, Priority,
    UserId, WorkflowId,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub automated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFlag {
    #[serde(rename = "type")]
    pub flag_type: String,
    pub message: String,
    pub severity: FlagSeverity,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseHistoryEntry {
    pub phase_id: Phase,
    pub phase_name: String,
    pub entered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exited_at: Option<DateTime<Utc>>,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interviewer: Option<String>,
    /// Hours spent in the phase, once exited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default)]
    pub automated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_phase: Option<Phase>,
}

/// A candidate as it appears on the board. Only ever produced by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: BoardItemId,
    pub candidate_id: CandidateId,
    pub name: String,
    pub email: String,
    pub position: String,
    pub current_phase: Phase,
    #[serde(default)]
    pub status: CandidateStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_score: Option<u8>,
    #[serde(default)]
    pub days_in_phase: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<NextAction>,
    #[serde(default)]
    pub flags: Vec<CandidateFlag>,
    #[serde(default)]
    pub timeline: Vec<PhaseHistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: ColumnId,
    pub title: String,
    pub phase_id: Phase,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_warning_hours: Option<u32>,
}

/// Ordered list of columns. On the wire this is a bare JSON array.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board {
    pub columns: Vec<Column>,
}

impl Board {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column and row of a board item.
    pub fn locate(&self, item_id: &BoardItemId) -> Option<(usize, usize)> {
        self.columns.iter().enumerate().find_map(|(column_index, column)| {
            column
                .candidates
                .iter()
                .position(|candidate| &candidate.id == item_id)
                .map(|row| (column_index, row))
        })
    }

    pub fn candidate(&self, item_id: &BoardItemId) -> Option<&Candidate> {
        self.locate(item_id)
            .map(|(column, row)| &self.columns[column].candidates[row])
    }

    pub fn candidate_by_candidate_id(&self, candidate_id: &CandidateId) -> Option<&Candidate> {
        self.columns
            .iter()
            .flat_map(|column| column.candidates.iter())
            .find(|candidate| &candidate.candidate_id == candidate_id)
    }

    pub fn column_for_phase(&self, phase: Phase) -> Option<&Column> {
        self.columns.iter().find(|column| column.phase_id == phase)
    }

    pub fn column_index_for_phase(&self, phase: Phase) -> Option<usize> {
        self.columns.iter().position(|column| column.phase_id == phase)
    }

    pub fn candidate_count(&self) -> usize {
        self.columns.iter().map(|column| column.candidates.len()).sum()
    }

    /// Board item ids that occur in more than one place.
    pub fn duplicate_item_ids(&self) -> Vec<BoardItemId> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for candidate in self.columns.iter().flat_map(|column| column.candidates.iter()) {
            if !seen.insert(&candidate.id) && !duplicates.contains(&candidate.id) {
                duplicates.push(candidate.id.clone());
            }
        }
        duplicates
    }

    /// Drops every repeated occurrence of a board item, keeping the first one.
    pub fn dedupe_items(&mut self) -> usize {
        let mut seen = HashSet::new();
        let mut removed = 0;
        for column in &mut self.columns {
            column.candidates.retain(|candidate| {
                let keep = seen.insert(candidate.id.clone());
                if !keep {
                    removed += 1;
                }
                keep
            });
        }
        removed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveCandidateRequest {
    pub candidate_id: CandidateId,
    pub from_phase: Phase,
    pub to_phase: Phase,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveCandidateResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventType {
    CandidateMoved,
    CandidateUpdated,
    PhaseCompleted,
    SlaWarning,
    BottleneckDetected,
    WorkflowUpdated,
    Connected,
    Ping,
}

impl WorkflowEventType {
    pub const ALL: [WorkflowEventType; 8] = [
        WorkflowEventType::CandidateMoved,
        WorkflowEventType::CandidateUpdated,
        WorkflowEventType::PhaseCompleted,
        WorkflowEventType::SlaWarning,
        WorkflowEventType::BottleneckDetected,
        WorkflowEventType::WorkflowUpdated,
        WorkflowEventType::Connected,
        WorkflowEventType::Ping,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowEventType::CandidateMoved => "candidate_moved",
            WorkflowEventType::CandidateUpdated => "candidate_updated",
            WorkflowEventType::PhaseCompleted => "phase_completed",
            WorkflowEventType::SlaWarning => "sla_warning",
            WorkflowEventType::BottleneckDetected => "bottleneck_detected",
            WorkflowEventType::WorkflowUpdated => "workflow_updated",
            WorkflowEventType::Connected => "connected",
            WorkflowEventType::Ping => "ping",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for WorkflowEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CandidateMovedData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CandidateUpdatedData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PhaseCompletedData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SlaWarningData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours_in_phase: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BottleneckData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_days: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkflowUpdatedData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectedData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Event payload, one shape per event type.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEventPayload {
    CandidateMoved(CandidateMovedData),
    CandidateUpdated(CandidateUpdatedData),
    PhaseCompleted(PhaseCompletedData),
    SlaWarning(SlaWarningData),
    BottleneckDetected(BottleneckData),
    WorkflowUpdated(WorkflowUpdatedData),
    Connected(ConnectedData),
    Ping,
}

impl WorkflowEventPayload {
    pub fn event_type(&self) -> WorkflowEventType {
        match self {
            WorkflowEventPayload::CandidateMoved(_) => WorkflowEventType::CandidateMoved,
            WorkflowEventPayload::CandidateUpdated(_) => WorkflowEventType::CandidateUpdated,
            WorkflowEventPayload::PhaseCompleted(_) => WorkflowEventType::PhaseCompleted,
            WorkflowEventPayload::SlaWarning(_) => WorkflowEventType::SlaWarning,
            WorkflowEventPayload::BottleneckDetected(_) => WorkflowEventType::BottleneckDetected,
            WorkflowEventPayload::WorkflowUpdated(_) => WorkflowEventType::WorkflowUpdated,
            WorkflowEventPayload::Connected(_) => WorkflowEventType::Connected,
            WorkflowEventPayload::Ping => WorkflowEventType::Ping,
        }
    }

    fn decode(
        event_type: WorkflowEventType,
        data: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        // Missing payloads decode to the all-default shape.
        let data = if data.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            data
        };
        Ok(match event_type {
            WorkflowEventType::CandidateMoved => Self::CandidateMoved(serde_json::from_value(data)?),
            WorkflowEventType::CandidateUpdated => {
                Self::CandidateUpdated(serde_json::from_value(data)?)
            }
            WorkflowEventType::PhaseCompleted => Self::PhaseCompleted(serde_json::from_value(data)?),
            WorkflowEventType::SlaWarning => Self::SlaWarning(serde_json::from_value(data)?),
            WorkflowEventType::BottleneckDetected => {
                Self::BottleneckDetected(serde_json::from_value(data)?)
            }
            WorkflowEventType::WorkflowUpdated => {
                Self::WorkflowUpdated(serde_json::from_value(data)?)
            }
            WorkflowEventType::Connected => Self::Connected(serde_json::from_value(data)?),
            WorkflowEventType::Ping => Self::Ping,
        })
    }

    fn encode(&self) -> serde_json::Value {
        let encoded = match self {
            WorkflowEventPayload::CandidateMoved(data) => serde_json::to_value(data),
            WorkflowEventPayload::CandidateUpdated(data) => serde_json::to_value(data),
            WorkflowEventPayload::PhaseCompleted(data) => serde_json::to_value(data),
            WorkflowEventPayload::SlaWarning(data) => serde_json::to_value(data),
            WorkflowEventPayload::BottleneckDetected(data) => serde_json::to_value(data),
            WorkflowEventPayload::WorkflowUpdated(data) => serde_json::to_value(data),
            WorkflowEventPayload::Connected(data) => serde_json::to_value(data),
            WorkflowEventPayload::Ping => return serde_json::Value::Null,
        };
        encoded.unwrap_or(serde_json::Value::Null)
    }
}

/// A state-change notification pushed from server to clients.
///
/// The envelope is uniform on the wire (`type` + opaque `data`); the payload
/// is decoded into [`WorkflowEventPayload`] while parsing, so an unknown type
/// or a payload that does not fit its type fails deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawWorkflowEvent", into = "RawWorkflowEvent")]
pub struct WorkflowEvent {
    pub id: String,
    pub candidate_id: Option<CandidateId>,
    pub workflow_id: Option<WorkflowId>,
    pub phase_id: Option<Phase>,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<UserId>,
    pub payload: WorkflowEventPayload,
}

impl WorkflowEvent {
    pub fn new(id: impl Into<String>, payload: WorkflowEventPayload) -> Self {
        Self {
            id: id.into(),
            candidate_id: None,
            workflow_id: None,
            phase_id: None,
            timestamp: Utc::now(),
            user_id: None,
            payload,
        }
    }

    pub fn with_candidate(mut self, candidate_id: CandidateId) -> Self {
        self.candidate_id = Some(candidate_id);
        self
    }

    pub fn with_workflow(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase_id = Some(phase);
        self
    }

    pub fn event_type(&self) -> WorkflowEventType {
        self.payload.event_type()
    }
}

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("unknown workflow event type '{0}'")]
    UnknownType(String),
    #[error("invalid payload for {event_type} event: {source}")]
    Payload {
        event_type: WorkflowEventType,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWorkflowEvent {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    candidate_id: Option<CandidateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workflow_id: Option<WorkflowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    phase_id: Option<Phase>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    data: serde_json::Value,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<UserId>,
}

impl TryFrom<RawWorkflowEvent> for WorkflowEvent {
    type Error = EventDecodeError;

    fn try_from(raw: RawWorkflowEvent) -> Result<Self, Self::Error> {
        let event_type = WorkflowEventType::parse(&raw.event_type)
            .ok_or_else(|| EventDecodeError::UnknownType(raw.event_type.clone()))?;
        let payload = WorkflowEventPayload::decode(event_type, raw.data)
            .map_err(|source| EventDecodeError::Payload { event_type, source })?;
        Ok(Self {
            id: raw.id,
            candidate_id: raw.candidate_id,
            workflow_id: raw.workflow_id,
            phase_id: raw.phase_id,
            timestamp: raw.timestamp,
            user_id: raw.user_id,
            payload,
        })
    }
}

impl From<WorkflowEvent> for RawWorkflowEvent {
    fn from(event: WorkflowEvent) -> Self {
        Self {
            id: event.id,
            event_type: event.payload.event_type().as_str().to_string(),
            candidate_id: event.candidate_id,
            workflow_id: event.workflow_id,
            phase_id: event.phase_id,
            data: event.payload.encode(),
            timestamp: event.timestamp,
            user_id: event.user_id,
        }
    }
}

/// Room-scoping messages a socket client sends upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "room", rename_all = "kebab-case")]
pub enum SocketClientMessage {
    JoinWorkflow(WorkflowId),
    JoinCandidate(CandidateId),
}

/// Named server-to-socket channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketChannel {
    GlobalUpdate,
    WorkflowUpdate,
    CandidateUpdate,
    InterviewOutcomeUpdated,
}

/// Socket frame: a channel name plus an application event object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketServerMessage {
    pub event: SocketChannel,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseMetrics {
    pub phase_id: Phase,
    pub candidate_count: u32,
    pub average_days_in_phase: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_breaches: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottleneck_score: Option<f64>,
}

/// Read-only aggregate consumed from `GET /api/workflow/metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetrics {
    pub total_candidates: u32,
    #[serde(default)]
    pub phases: Vec<PhaseMetrics>,
    pub generated_at: DateTime<Utc>,
}
