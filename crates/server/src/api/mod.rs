use chrono::Utc;
use shared::{
    domain::Decision,
    error::ApiError,
    protocol::{
        Board, CandidateMovedData, MoveCandidateRequest, PhaseCompletedData, PhaseHistoryEntry,
        PhaseMetrics, WorkflowEvent, WorkflowEventPayload, WorkflowMetrics,
    },
};
use tokio::sync::RwLock;
use uuid::Uuid;

pub const MAX_SCORE: u8 = 100;

pub struct WorkflowStore {
    board: RwLock<Board>,
}

/// Stamps a fresh event id on a payload.
pub fn new_event(payload: WorkflowEventPayload) -> WorkflowEvent {
    WorkflowEvent::new(Uuid::new_v4().to_string(), payload)
}

impl WorkflowStore {
    pub fn new(board: Board) -> Self {
        Self {
            board: RwLock::new(board),
        }
    }

    pub async fn board(&self) -> Board {
        self.board.read().await.clone()
    }

    /// A stale `fromPhase` is a conflict.
    pub async fn move_candidate(
        &self,
        request: &MoveCandidateRequest,
    ) -> Result<Vec<WorkflowEvent>, ApiError> {
        validate_move(request)?;

        let mut board = self.board.write().await;
        let (column, row) = board
            .columns
            .iter()
            .enumerate()
            .find_map(|(c, column)| {
                column
                    .candidates
                    .iter()
                    .position(|candidate| candidate.candidate_id == request.candidate_id)
                    .map(|r| (c, r))
            })
            .ok_or_else(|| {
                ApiError::not_found(format!("candidate {} not found", request.candidate_id))
            })?;

        let current = board.columns[column].candidates[row].current_phase;
        if current != request.from_phase {
            return Err(ApiError::conflict(format!(
                "candidate {} is in {current}, not {}",
                request.candidate_id, request.from_phase
            )));
        }
        let target = board
            .column_index_for_phase(request.to_phase)
            .ok_or_else(|| ApiError::not_found(format!("no column for {}", request.to_phase)))?;

        let now = Utc::now();
        let mut candidate = board.columns[column].candidates.remove(row);
        if let Some(open) = candidate
            .timeline
            .iter_mut()
            .rev()
            .find(|entry| entry.exited_at.is_none())
        {
            let hours = (now - open.entered_at).num_hours().max(0);
            open.exited_at = Some(now);
            open.decision = request.decision;
            open.score = request.score;
            open.notes = request.notes.clone();
            open.duration = u32::try_from(hours).ok();
            open.next_phase = Some(request.to_phase);
        }
        candidate.timeline.push(PhaseHistoryEntry {
            phase_id: request.to_phase,
            phase_name: request.to_phase.label().to_string(),
            entered_at: now,
            exited_at: None,
            decision: Decision::Pending,
            score: None,
            notes: None,
            interviewer: None,
            duration: None,
            automated: false,
            next_phase: None,
        });
        candidate.current_phase = request.to_phase;
        candidate.days_in_phase = 0;
        let name = candidate.name.clone();
        board.columns[target].candidates.push(candidate);
        drop(board);

        let moved = new_event(WorkflowEventPayload::CandidateMoved(CandidateMovedData {
            from_phase: Some(request.from_phase),
            to_phase: Some(request.to_phase),
            decision: Some(request.decision),
            candidate_name: Some(name),
        }))
        .with_candidate(request.candidate_id.clone())
        .with_phase(request.to_phase);
        let completed = new_event(WorkflowEventPayload::PhaseCompleted(PhaseCompletedData {
            phase: Some(request.from_phase),
            decision: Some(request.decision),
            score: request.score,
        }))
        .with_candidate(request.candidate_id.clone())
        .with_phase(request.from_phase);
        Ok(vec![moved, completed])
    }

    pub async fn metrics(&self) -> WorkflowMetrics {
        let board = self.board.read().await;
        let phases = board
            .columns
            .iter()
            .map(|column| {
                let count = column.candidates.len();
                let days: u32 = column.candidates.iter().map(|c| c.days_in_phase).sum();
                PhaseMetrics {
                    phase_id: column.phase_id,
                    candidate_count: u32::try_from(count).unwrap_or(u32::MAX),
                    average_days_in_phase: if count == 0 {
                        0.0
                    } else {
                        f64::from(days) / count as f64
                    },
                    sla_breaches: None,
                    bottleneck_score: None,
                }
            })
            .collect();
        WorkflowMetrics {
            total_candidates: u32::try_from(board.candidate_count()).unwrap_or(u32::MAX),
            phases,
            generated_at: Utc::now(),
        }
    }
}

fn validate_move(request: &MoveCandidateRequest) -> Result<(), ApiError> {
    if request.from_phase == request.to_phase {
        return Err(ApiError::validation(format!(
            "candidate is already in {}",
            request.to_phase
        )));
    }
    if !matches!(request.decision, Decision::Passed | Decision::Failed) {
        return Err(ApiError::validation(format!(
            "decision must be passed or failed, got {}",
            request.decision.as_str()
        )));
    }
    if request.score.is_some_and(|score| score > MAX_SCORE) {
        return Err(ApiError::validation(format!(
            "score must be between 0 and {MAX_SCORE}"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
