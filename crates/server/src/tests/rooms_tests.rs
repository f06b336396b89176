use super::*;
use shared::protocol::{CandidateMovedData, CandidateUpdatedData, WorkflowUpdatedData};

fn moved(candidate: &str) -> WorkflowEvent {
    WorkflowEvent::new(
        "evt-1",
        WorkflowEventPayload::CandidateMoved(CandidateMovedData::default()),
    )
    .with_candidate(CandidateId::new(candidate))
}

#[test]
fn unscoped_events_are_global() {
    let rooms = Rooms::default();
    assert_eq!(
        rooms.route_for(&moved("cand-1")),
        Some(SocketChannel::GlobalUpdate)
    );
}

#[test]
fn workflow_events_only_reach_members() {
    let event = WorkflowEvent::new(
        "evt-2",
        WorkflowEventPayload::WorkflowUpdated(WorkflowUpdatedData::default()),
    )
    .with_workflow(WorkflowId::new("wf-1"));

    let mut rooms = Rooms::default();
    assert_eq!(rooms.route_for(&event), None);
    rooms.join(SocketClientMessage::JoinWorkflow(WorkflowId::new("wf-2")));
    assert_eq!(rooms.route_for(&event), None);
    rooms.join(SocketClientMessage::JoinWorkflow(WorkflowId::new("wf-1")));
    assert_eq!(rooms.route_for(&event), Some(SocketChannel::WorkflowUpdate));
}

#[test]
fn followed_candidates_get_their_own_channel() {
    let mut rooms = Rooms::default();
    rooms.join(SocketClientMessage::JoinCandidate(CandidateId::new("cand-4")));
    assert_eq!(
        rooms.route_for(&moved("cand-4")),
        Some(SocketChannel::CandidateUpdate)
    );
    assert_eq!(
        rooms.route_for(&moved("cand-5")),
        Some(SocketChannel::GlobalUpdate)
    );

    let outcome = WorkflowEvent::new(
        "evt-3",
        WorkflowEventPayload::CandidateUpdated(CandidateUpdatedData {
            field: None,
            outcome: Some("passed".to_string()),
        }),
    )
    .with_candidate(CandidateId::new("cand-4"));
    let message = rooms.message_for(&outcome).expect("routed");
    assert_eq!(message.event, SocketChannel::InterviewOutcomeUpdated);
    assert_eq!(message.payload["candidateId"], "cand-4");
    assert_eq!(message.payload["outcome"], "passed");
}

#[test]
fn routed_events_carry_the_full_event() {
    let message = Rooms::default()
        .message_for(&moved("cand-1"))
        .expect("routed");
    assert_eq!(message.payload["type"], "candidate_moved");
    assert_eq!(message.payload["candidateId"], "cand-1");
}
