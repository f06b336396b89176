use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use shared::{
    domain::{BoardItemId, CandidateId, Decision, Phase},
    protocol::{Candidate, MoveCandidateRequest},
};
use tracing::{info, warn};

use crate::{
    api::WorkflowApi,
    board::BoardStore,
    error::{TransitionError, ValidationError},
    events::{NotificationLevel, Notifier},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveProposal {
    pub item_id: BoardItemId,
    pub candidate_id: CandidateId,
    pub candidate_name: String,
    pub from_phase: Phase,
    pub to_phase: Phase,
}

impl MoveProposal {
    pub fn new(candidate: &Candidate, from_phase: Phase, to_phase: Phase) -> Result<Self, ValidationError> {
        if from_phase == to_phase {
            return Err(ValidationError::SamePhase(to_phase));
        }
        Ok(Self {
            item_id: candidate.id.clone(),
            candidate_id: candidate.candidate_id.clone(),
            candidate_name: candidate.name.clone(),
            from_phase,
            to_phase,
        })
    }

    /// Proposal for the phase after the candidate's current one.
    pub fn to_next_phase(candidate: &Candidate) -> Result<Self, ValidationError> {
        let from_phase = candidate.current_phase;
        let to_phase = from_phase
            .next()
            .ok_or(ValidationError::TerminalPhase(from_phase))?;
        Self::new(candidate, from_phase, to_phase)
    }
}

/// What the operator fills in before confirming a move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionForm {
    pub decision: Option<Decision>,
    pub score: Option<i32>,
    pub notes: Option<String>,
}

pub const MAX_SCORE: i32 = 100;

impl TransitionForm {
    pub fn validate(&self, proposal: &MoveProposal) -> Result<MoveCandidateRequest, ValidationError> {
        let decision = match self.decision {
            Some(decision @ (Decision::Passed | Decision::Failed)) => decision,
            Some(other) => return Err(ValidationError::UnsupportedDecision(other)),
            None => return Err(ValidationError::MissingDecision),
        };
        let score = match self.score {
            Some(score) if (0..=MAX_SCORE).contains(&score) => u8::try_from(score).ok(),
            Some(score) => return Err(ValidationError::ScoreOutOfRange(score)),
            None => None,
        };
        let notes = self
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
            .map(str::to_string);
        Ok(MoveCandidateRequest {
            candidate_id: proposal.candidate_id.clone(),
            from_phase: proposal.from_phase,
            to_phase: proposal.to_phase,
            decision,
            score,
            notes,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    pub proposal: MoveProposal,
    pub form: TransitionForm,
    pub last_error: Option<String>,
}

impl PendingMove {
    pub fn can_submit(&self) -> bool {
        self.form.validate(&self.proposal).is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionState {
    Idle,
    ProposingMove(PendingMove),
    Submitting(PendingMove),
}

pub struct PhaseTransitions {
    api: Arc<dyn WorkflowApi>,
    board: Arc<BoardStore>,
    notifier: Notifier,
    moves: Mutex<HashMap<BoardItemId, TransitionState>>,
}

impl PhaseTransitions {
    pub fn new(api: Arc<dyn WorkflowApi>, board: Arc<BoardStore>, notifier: Notifier) -> Arc<Self> {
        Arc::new(Self {
            api,
            board,
            notifier,
            moves: Mutex::new(HashMap::new()),
        })
    }

    fn moves(&self) -> std::sync::MutexGuard<'_, HashMap<BoardItemId, TransitionState>> {
        self.moves.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self, item_id: &BoardItemId) -> TransitionState {
        self.moves()
            .get(item_id)
            .cloned()
            .unwrap_or(TransitionState::Idle)
    }

    pub fn open_proposals(&self) -> Vec<MoveProposal> {
        self.moves()
            .values()
            .filter_map(|state| match state {
                TransitionState::ProposingMove(pending) | TransitionState::Submitting(pending) => {
                    Some(pending.proposal.clone())
                }
                TransitionState::Idle => None,
            })
            .collect()
    }

    /// Opens (or replaces) the proposal for the candidate.
    pub fn propose(&self, proposal: MoveProposal) -> Result<(), TransitionError> {
        let mut moves = self.moves();
        if let Some(TransitionState::Submitting(_)) = moves.get(&proposal.item_id) {
            return Err(TransitionError::AlreadySubmitting(proposal.item_id.to_string()));
        }
        info!(
            item_id = %proposal.item_id,
            from = %proposal.from_phase,
            to = %proposal.to_phase,
            "move proposed"
        );
        moves.insert(
            proposal.item_id.clone(),
            TransitionState::ProposingMove(PendingMove {
                proposal,
                form: TransitionForm::default(),
                last_error: None,
            }),
        );
        Ok(())
    }

    pub fn propose_next_phase(&self, candidate: &Candidate) -> Result<MoveProposal, TransitionError> {
        let proposal = MoveProposal::to_next_phase(candidate)?;
        self.propose(proposal.clone())?;
        Ok(proposal)
    }

    pub fn edit_form<F>(&self, item_id: &BoardItemId, edit: F) -> Result<(), TransitionError>
    where
        F: FnOnce(&mut TransitionForm),
    {
        match self.moves().get_mut(item_id) {
            Some(TransitionState::ProposingMove(pending)) => {
                edit(&mut pending.form);
                Ok(())
            }
            Some(TransitionState::Submitting(_)) => {
                Err(TransitionError::AlreadySubmitting(item_id.to_string()))
            }
            Some(TransitionState::Idle) | None => Err(TransitionError::NoProposal(item_id.to_string())),
        }
    }

    pub fn can_submit(&self, item_id: &BoardItemId) -> bool {
        matches!(self.state(item_id), TransitionState::ProposingMove(pending) if pending.can_submit())
    }

    /// In-flight submissions cannot be cancelled.
    pub fn cancel(&self, item_id: &BoardItemId) -> Result<MoveProposal, TransitionError> {
        let mut moves = self.moves();
        match moves.get(item_id) {
            Some(TransitionState::ProposingMove(_)) => match moves.remove(item_id) {
                Some(TransitionState::ProposingMove(pending)) => Ok(pending.proposal),
                _ => Err(TransitionError::NoProposal(item_id.to_string())),
            },
            Some(TransitionState::Submitting(_)) => {
                Err(TransitionError::AlreadySubmitting(item_id.to_string()))
            }
            Some(TransitionState::Idle) | None => Err(TransitionError::NoProposal(item_id.to_string())),
        }
    }

    /// Remote failures keep the proposal open with `last_error` set.
    pub async fn confirm(&self, item_id: &BoardItemId) -> Result<(), TransitionError> {
        let (pending, request) = {
            let mut moves = self.moves();
            let pending = match moves.get(item_id) {
                Some(TransitionState::ProposingMove(pending)) => pending.clone(),
                Some(TransitionState::Submitting(_)) => {
                    return Err(TransitionError::AlreadySubmitting(item_id.to_string()))
                }
                Some(TransitionState::Idle) | None => {
                    return Err(TransitionError::NoProposal(item_id.to_string()))
                }
            };
            let request = pending.form.validate(&pending.proposal)?;
            moves.insert(item_id.clone(), TransitionState::Submitting(pending.clone()));
            (pending, request)
        };

        let mut guard = SubmissionGuard {
            transitions: self,
            item_id,
            pending: Some(pending.clone()),
        };
        let outcome = self.api.move_candidate(&request).await;
        guard.disarm();

        match outcome {
            Ok(()) => {
                info!(
                    item_id = %item_id,
                    candidate_id = %request.candidate_id,
                    to = %request.to_phase,
                    "candidate moved"
                );
                self.moves().remove(item_id);
                self.board.load_snapshot().await;
                self.notifier.notify(
                    NotificationLevel::Success,
                    format!(
                        "{} moved to {}",
                        pending.proposal.candidate_name,
                        request.to_phase.label()
                    ),
                    Some(request.candidate_id),
                );
                Ok(())
            }
            Err(err) => {
                warn!(item_id = %item_id, candidate_id = %request.candidate_id, "move failed: {err}");
                let message = err.to_string();
                let name = pending.proposal.candidate_name.clone();
                self.moves().insert(
                    item_id.clone(),
                    TransitionState::ProposingMove(PendingMove {
                        last_error: Some(message.clone()),
                        ..pending
                    }),
                );
                self.notifier.notify(
                    NotificationLevel::Error,
                    format!("Could not move {name}: {message}"),
                    Some(request.candidate_id),
                );
                Err(err.into())
            }
        }
    }
}

pub const SUBMISSION_ABANDONED: &str = "submission abandoned before the server answered";

/// Reopens the proposal if a `confirm` future is dropped mid-request.
struct SubmissionGuard<'a> {
    transitions: &'a PhaseTransitions,
    item_id: &'a BoardItemId,
    pending: Option<PendingMove>,
}

impl SubmissionGuard<'_> {
    fn disarm(&mut self) {
        self.pending = None;
    }
}

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        warn!(item_id = %self.item_id, "move submission abandoned");
        let mut moves = self.transitions.moves();
        if matches!(moves.get(self.item_id), Some(TransitionState::Submitting(_))) {
            moves.insert(
                self.item_id.clone(),
                TransitionState::ProposingMove(PendingMove {
                    last_error: Some(SUBMISSION_ABANDONED.to_string()),
                    ..pending
                }),
            );
        }
    }
}

#[cfg(test)]
#[path = "tests/transition_tests.rs"]
mod tests;
