use super::*;
use crate::{
    board::{SnapshotFailurePolicy, SnapshotOrigin},
    events::BoardEvent,
    test_support::FakeWorkflowApi,
};
use reqwest::StatusCode;
use tokio::sync::broadcast;

struct Harness {
    api: Arc<FakeWorkflowApi>,
    board: Arc<BoardStore>,
    transitions: Arc<PhaseTransitions>,
    events: broadcast::Receiver<BoardEvent>,
}

async fn harness() -> Harness {
    let api = Arc::new(FakeWorkflowApi::new());
    let board = BoardStore::new(api.clone(), SnapshotFailurePolicy::Fallback);
    board.load_snapshot().await;
    let notifier = Notifier::new(16);
    let events = notifier.subscribe();
    let transitions = PhaseTransitions::new(api.clone(), Arc::clone(&board), notifier);
    Harness {
        api,
        board,
        transitions,
        events,
    }
}

fn marco_item() -> BoardItemId {
    BoardItemId::new("item-1")
}

fn propose_marco(h: &Harness, to_phase: Phase) -> MoveProposal {
    let snapshot = h.board.snapshot();
    let marco = snapshot.board.candidate(&marco_item()).expect("marco on board");
    let proposal = MoveProposal::new(marco, marco.current_phase, to_phase).expect("proposal");
    h.transitions.propose(proposal.clone()).expect("propose");
    proposal
}

fn fill(h: &Harness, decision: Option<Decision>, score: Option<i32>) {
    h.transitions
        .edit_form(&marco_item(), |form| {
            form.decision = decision;
            form.score = score;
            form.notes = Some("  strong systems background ".to_string());
        })
        .expect("edit form");
}

fn next_notification(events: &mut broadcast::Receiver<BoardEvent>) -> crate::events::Notification {
    loop {
        match events.try_recv().expect("board event") {
            BoardEvent::Notification(notification) => return notification,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn submit_requires_a_decision_and_issues_no_request_without_one() {
    let h = harness().await;
    propose_marco(&h, Phase::PhoneScreening);
    assert!(!h.transitions.can_submit(&marco_item()));

    let err = h.transitions.confirm(&marco_item()).await.expect_err("no decision");
    assert!(matches!(
        err,
        TransitionError::Validation(ValidationError::MissingDecision)
    ));
    assert_eq!(h.api.move_calls(), 0);
    assert!(matches!(
        h.transitions.state(&marco_item()),
        TransitionState::ProposingMove(_)
    ));
}

#[tokio::test]
async fn out_of_range_scores_are_rejected_locally() {
    let h = harness().await;
    propose_marco(&h, Phase::PhoneScreening);

    for score in [-1, 101] {
        fill(&h, Some(Decision::Passed), Some(score));
        assert!(!h.transitions.can_submit(&marco_item()));
        let err = h.transitions.confirm(&marco_item()).await.expect_err("bad score");
        assert!(matches!(
            err,
            TransitionError::Validation(ValidationError::ScoreOutOfRange(s)) if s == score
        ));
    }
    assert_eq!(h.api.move_calls(), 0);

    fill(&h, Some(Decision::Passed), Some(100));
    assert!(h.transitions.can_submit(&marco_item()));
}

#[test]
fn pending_and_skipped_cannot_confirm_a_move() {
    let proposal = MoveProposal {
        item_id: marco_item(),
        candidate_id: CandidateId::new("cand-1"),
        candidate_name: "Marco Rossi".to_string(),
        from_phase: Phase::CvReview,
        to_phase: Phase::PhoneScreening,
    };
    let form = TransitionForm {
        decision: Some(Decision::Pending),
        score: None,
        notes: None,
    };
    assert_eq!(
        form.validate(&proposal),
        Err(ValidationError::UnsupportedDecision(Decision::Pending))
    );

    let form = TransitionForm {
        decision: Some(Decision::Failed),
        score: Some(0),
        notes: Some("   ".to_string()),
    };
    let request = form.validate(&proposal).expect("valid");
    assert_eq!(request.score, Some(0));
    assert_eq!(request.notes, None);
}

#[tokio::test]
async fn successful_move_refreshes_board_and_announces_destination() {
    let mut h = harness().await;
    propose_marco(&h, Phase::PhoneScreening);
    fill(&h, Some(Decision::Passed), Some(85));
    let fetches_before = h.api.fetch_calls();

    h.transitions.confirm(&marco_item()).await.expect("confirm");

    let sent = h.api.moves.lock().expect("moves")[0].clone();
    assert_eq!(sent.candidate_id, CandidateId::new("cand-1"));
    assert_eq!(sent.from_phase, Phase::CvReview);
    assert_eq!(sent.to_phase, Phase::PhoneScreening);
    assert_eq!(sent.decision, Decision::Passed);
    assert_eq!(sent.score, Some(85));
    assert_eq!(sent.notes.as_deref(), Some("strong systems background"));

    assert_eq!(h.api.fetch_calls(), fetches_before + 1);
    let snapshot = h.board.snapshot();
    let phone = snapshot
        .board
        .column_index_for_phase(Phase::PhoneScreening)
        .expect("phone column");
    assert_eq!(snapshot.board.locate(&marco_item()).map(|(c, _)| c), Some(phone));
    assert_eq!(h.transitions.state(&marco_item()), TransitionState::Idle);

    let notification = next_notification(&mut h.events);
    assert_eq!(notification.level, NotificationLevel::Success);
    assert!(notification.message.contains("Marco Rossi"));
    assert!(notification.message.contains(Phase::PhoneScreening.label()));
}

#[tokio::test]
async fn failed_move_keeps_proposal_and_leaves_board_untouched() {
    let mut h = harness().await;
    propose_marco(&h, Phase::TechnicalInterview);
    fill(&h, Some(Decision::Passed), None);
    h.api.fail_moves_with(Some(StatusCode::INTERNAL_SERVER_ERROR));
    let before = h.board.snapshot();
    let fetches_before = h.api.fetch_calls();

    let err = h.transitions.confirm(&marco_item()).await.expect_err("server error");
    assert!(matches!(err, TransitionError::Remote(_)));
    assert_eq!(h.api.fetch_calls(), fetches_before);
    assert_eq!(h.board.snapshot().revision, before.revision);

    let TransitionState::ProposingMove(pending) = h.transitions.state(&marco_item()) else {
        panic!("proposal should be retained");
    };
    assert_eq!(pending.form.decision, Some(Decision::Passed));
    assert!(pending.last_error.is_some());
    assert_eq!(
        next_notification(&mut h.events).level,
        NotificationLevel::Error
    );

    // Retry without re-entering the form.
    h.api.fail_moves_with(None);
    h.transitions.confirm(&marco_item()).await.expect("retry");
    assert_eq!(h.api.move_calls(), 2);
}

#[tokio::test]
async fn cancel_discards_proposal_without_side_effects() {
    let h = harness().await;
    let proposal = propose_marco(&h, Phase::PhoneScreening);
    let revision = h.board.snapshot().revision;

    assert_eq!(h.transitions.cancel(&marco_item()).expect("cancel"), proposal);
    assert_eq!(h.transitions.state(&marco_item()), TransitionState::Idle);
    assert!(h.transitions.open_proposals().is_empty());
    assert_eq!(h.api.move_calls(), 0);
    assert_eq!(h.board.snapshot().revision, revision);
    assert!(matches!(
        h.transitions.cancel(&marco_item()),
        Err(TransitionError::NoProposal(_))
    ));
}

#[tokio::test]
async fn terminal_phase_has_no_next_move() {
    let h = harness().await;
    let snapshot = h.board.snapshot();
    let finalist = snapshot
        .board
        .column_for_phase(Phase::FinalDecision)
        .and_then(|column| column.candidates.first())
        .expect("finalist");

    let err = h
        .transitions
        .propose_next_phase(finalist)
        .expect_err("terminal");
    assert!(matches!(
        err,
        TransitionError::Validation(ValidationError::TerminalPhase(Phase::FinalDecision))
    ));
    assert_eq!(h.transitions.state(&finalist.id), TransitionState::Idle);

    let marco = snapshot.board.candidate(&marco_item()).expect("marco");
    let proposal = h.transitions.propose_next_phase(marco).expect("next");
    assert_eq!(proposal.to_phase, Phase::PhoneScreening);
}

#[tokio::test]
async fn refresh_during_proposal_shows_server_truth_and_stale_confirm_is_rejected_by_server() {
    let mut h = harness().await;
    propose_marco(&h, Phase::TechnicalInterview);
    fill(&h, Some(Decision::Passed), Some(70));

    // Another operator moves Marco to cultural fit; a refresh lands meanwhile.
    let marco_id = CandidateId::new("cand-1");
    let cultural = h
        .board
        .snapshot()
        .board
        .column_index_for_phase(Phase::CulturalFit)
        .expect("cultural column");
    h.api.move_elsewhere(&marco_id, cultural);
    let refreshed = h.board.load_snapshot().await;
    assert_eq!(refreshed.origin, SnapshotOrigin::Live);
    assert_eq!(refreshed.board.locate(&marco_item()).map(|(c, _)| c), Some(cultural));

    // The proposal is still open and cancellable.
    assert_eq!(h.transitions.open_proposals().len(), 1);

    let err = h.transitions.confirm(&marco_item()).await.expect_err("stale");
    let TransitionError::Remote(remote) = err else {
        panic!("expected a server-side rejection");
    };
    assert!(remote.is_conflict());
    let after = h.board.snapshot();
    assert_eq!(after.revision, refreshed.revision);
    assert_eq!(after.board.locate(&marco_item()).map(|(c, _)| c), Some(cultural));
    assert_eq!(
        next_notification(&mut h.events).level,
        NotificationLevel::Error
    );
    assert!(h.transitions.cancel(&marco_item()).is_ok());
}

#[tokio::test]
async fn proposal_cannot_be_replaced_or_cancelled_while_submitting() {
    let h = harness().await;
    let proposal = propose_marco(&h, Phase::PhoneScreening);
    let pending = match h.transitions.state(&marco_item()) {
        TransitionState::ProposingMove(pending) => pending,
        other => panic!("unexpected state {other:?}"),
    };
    h.transitions
        .moves()
        .insert(marco_item(), TransitionState::Submitting(pending));

    assert!(matches!(
        h.transitions.cancel(&marco_item()),
        Err(TransitionError::AlreadySubmitting(_))
    ));
    assert!(matches!(
        h.transitions.propose(proposal),
        Err(TransitionError::AlreadySubmitting(_))
    ));
    assert!(matches!(
        h.transitions.confirm(&marco_item()).await,
        Err(TransitionError::AlreadySubmitting(_))
    ));
}

/// Serves the board but never answers a move.
struct StalledMoves(FakeWorkflowApi);

#[async_trait::async_trait]
impl WorkflowApi for StalledMoves {
    async fn fetch_board(&self) -> Result<shared::protocol::Board, crate::error::ClientError> {
        self.0.fetch_board().await
    }

    async fn move_candidate(
        &self,
        _request: &MoveCandidateRequest,
    ) -> Result<(), crate::error::ClientError> {
        futures::future::pending().await
    }

    async fn fetch_metrics(
        &self,
    ) -> Result<shared::protocol::WorkflowMetrics, crate::error::ClientError> {
        self.0.fetch_metrics().await
    }
}

#[tokio::test]
async fn abandoned_submission_reopens_the_proposal() {
    let api = Arc::new(StalledMoves(FakeWorkflowApi::new()));
    let board = BoardStore::new(api.clone(), SnapshotFailurePolicy::Fallback);
    board.load_snapshot().await;
    let transitions = PhaseTransitions::new(api, Arc::clone(&board), Notifier::new(16));

    let snapshot = board.snapshot();
    let marco = snapshot.board.candidate(&marco_item()).expect("marco on board");
    let proposal = MoveProposal::new(marco, marco.current_phase, Phase::PhoneScreening)
        .expect("proposal");
    transitions.propose(proposal.clone()).expect("propose");
    transitions
        .edit_form(&marco_item(), |form| form.decision = Some(Decision::Passed))
        .expect("edit form");

    let timed_out = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        transitions.confirm(&marco_item()),
    )
    .await;
    assert!(timed_out.is_err());

    match transitions.state(&marco_item()) {
        TransitionState::ProposingMove(pending) => {
            assert_eq!(pending.last_error.as_deref(), Some(SUBMISSION_ABANDONED));
            assert_eq!(pending.form.decision, Some(Decision::Passed));
        }
        other => panic!("unexpected state {other:?}"),
    }
    assert_eq!(transitions.cancel(&marco_item()).expect("cancel"), proposal);
    transitions.propose(proposal).expect("propose again");
    assert_eq!(board.snapshot().board.locate(&marco_item()), Some((0, 0)));
}
