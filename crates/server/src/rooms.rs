use std::collections::HashSet;

use shared::{
    domain::{CandidateId, WorkflowId},
    protocol::{
        SocketChannel, SocketClientMessage, SocketServerMessage, WorkflowEvent,
        WorkflowEventPayload,
    },
};

#[derive(Debug, Default)]
pub(crate) struct Rooms {
    workflows: HashSet<WorkflowId>,
    candidates: HashSet<CandidateId>,
}

impl Rooms {
    pub(crate) fn join(&mut self, message: SocketClientMessage) {
        match message {
            SocketClientMessage::JoinWorkflow(workflow) => {
                self.workflows.insert(workflow);
            }
            SocketClientMessage::JoinCandidate(candidate) => {
                self.candidates.insert(candidate);
            }
        }
    }

    /// Picks the channel an event travels on for this socket, if any.
    pub(crate) fn route_for(&self, event: &WorkflowEvent) -> Option<SocketChannel> {
        if let Some(workflow) = &event.workflow_id {
            return self
                .workflows
                .contains(workflow)
                .then_some(SocketChannel::WorkflowUpdate);
        }
        match &event.candidate_id {
            Some(candidate) if self.candidates.contains(candidate) => match &event.payload {
                WorkflowEventPayload::CandidateUpdated(data) if data.outcome.is_some() => {
                    Some(SocketChannel::InterviewOutcomeUpdated)
                }
                _ => Some(SocketChannel::CandidateUpdate),
            },
            _ => Some(SocketChannel::GlobalUpdate),
        }
    }

    pub(crate) fn message_for(&self, event: &WorkflowEvent) -> Option<SocketServerMessage> {
        let channel = self.route_for(event)?;
        let payload = match (channel, &event.payload) {
            (
                SocketChannel::InterviewOutcomeUpdated,
                WorkflowEventPayload::CandidateUpdated(data),
            ) => serde_json::json!({
                "id": event.id,
                "candidateId": event.candidate_id,
                "outcome": data.outcome,
            }),
            _ => serde_json::to_value(event).ok()?,
        };
        Some(SocketServerMessage {
            event: channel,
            payload,
        })
    }
}

#[cfg(test)]
#[path = "tests/rooms_tests.rs"]
mod tests;
