//! In-memory workflow backend shared by the unit tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use shared::{
    domain::CandidateId,
    fixtures::demo_board,
    protocol::{Board, MoveCandidateRequest, WorkflowMetrics},
};

use crate::{api::WorkflowApi, error::ClientError};

/// Behaves like the server: moves are applied to its own board and rejected
/// with 409 when `fromPhase` no longer matches.
pub struct FakeWorkflowApi {
    pub board: Mutex<Board>,
    pub fail_fetch: Mutex<bool>,
    pub fail_moves: Mutex<Option<StatusCode>>,
    pub moves: Mutex<Vec<MoveCandidateRequest>>,
    pub fetches: AtomicUsize,
}

impl FakeWorkflowApi {
    pub fn new() -> Self {
        Self::with_board(demo_board(Utc::now()))
    }

    pub fn with_board(board: Board) -> Self {
        Self {
            board: Mutex::new(board),
            fail_fetch: Mutex::new(false),
            fail_moves: Mutex::new(None),
            moves: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn move_calls(&self) -> usize {
        self.moves.lock().expect("moves").len()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fail_moves_with(&self, status: Option<StatusCode>) {
        *self.fail_moves.lock().expect("fail_moves") = status;
    }

    /// Applies a move as another operator would, bypassing the client.
    pub fn move_elsewhere(&self, candidate_id: &CandidateId, to_column: usize) {
        let mut board = self.board.lock().expect("board");
        let (column, row) = board
            .columns
            .iter()
            .enumerate()
            .find_map(|(c, column)| {
                column
                    .candidates
                    .iter()
                    .position(|candidate| &candidate.candidate_id == candidate_id)
                    .map(|r| (c, r))
            })
            .expect("candidate on fake board");
        let mut candidate = board.columns[column].candidates.remove(row);
        candidate.current_phase = board.columns[to_column].phase_id;
        board.columns[to_column].candidates.push(candidate);
    }
}

#[async_trait]
impl WorkflowApi for FakeWorkflowApi {
    async fn fetch_board(&self) -> Result<Board, ClientError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if *self.fail_fetch.lock().expect("fail_fetch") {
            return Err(ClientError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: "board unavailable".to_string(),
            });
        }
        Ok(self.board.lock().expect("board").clone())
    }

    async fn move_candidate(&self, request: &MoveCandidateRequest) -> Result<(), ClientError> {
        self.moves.lock().expect("moves").push(request.clone());
        if let Some(status) = *self.fail_moves.lock().expect("fail_moves") {
            return Err(ClientError::Status {
                status,
                message: "move rejected".to_string(),
            });
        }
        let current = self
            .board
            .lock()
            .expect("board")
            .candidate_by_candidate_id(&request.candidate_id)
            .map(|candidate| candidate.current_phase);
        if current != Some(request.from_phase) {
            return Err(ClientError::Status {
                status: StatusCode::CONFLICT,
                message: "candidate is no longer in the source phase".to_string(),
            });
        }
        let to_column = self
            .board
            .lock()
            .expect("board")
            .column_index_for_phase(request.to_phase)
            .expect("target column");
        self.move_elsewhere(&request.candidate_id, to_column);
        Ok(())
    }

    async fn fetch_metrics(&self) -> Result<WorkflowMetrics, ClientError> {
        let board = self.board.lock().expect("board");
        Ok(WorkflowMetrics {
            total_candidates: board.candidate_count() as u32,
            phases: Vec::new(),
            generated_at: Utc::now(),
        })
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition within timeout");
}
