use shared::{
    domain::{BoardItemId, Phase},
    protocol::{Board, Candidate},
};
use tracing::debug;

use crate::{error::DragError, transition::MoveProposal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    Column(usize),
    Outside,
}

#[derive(Debug, Clone)]
struct ActiveDrag {
    candidate: Candidate,
    origin_phase: Phase,
}

#[derive(Debug, Default)]
pub struct DragReconciler {
    active: Option<ActiveDrag>,
}

impl DragReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks up one board item. A previous unfinished drag is dropped.
    pub fn begin(&mut self, board: &Board, item_id: &BoardItemId) -> Result<(), DragError> {
        let (column, row) = board
            .locate(item_id)
            .ok_or_else(|| DragError::UnknownItem(item_id.to_string()))?;
        let origin = &board.columns[column];
        self.active = Some(ActiveDrag {
            candidate: origin.candidates[row].clone(),
            origin_phase: origin.phase_id,
        });
        debug!(item_id = %item_id, origin = %origin.phase_id, "drag started");
        Ok(())
    }

    pub fn dragging(&self) -> Option<&BoardItemId> {
        self.active.as_ref().map(|drag| &drag.candidate.id)
    }

    pub fn cancel(&mut self) {
        self.active = None;
    }

    /// Ends the drag. Source phase is the column the drag started in.
    pub fn release(
        &mut self,
        board: &Board,
        target: DropTarget,
    ) -> Result<Option<MoveProposal>, DragError> {
        let drag = self.active.take().ok_or(DragError::NotDragging)?;
        let DropTarget::Column(index) = target else {
            return Ok(None);
        };
        let Some(column) = board.columns.get(index) else {
            return Ok(None);
        };
        if column.phase_id == drag.origin_phase {
            return Ok(None);
        }
        Ok(MoveProposal::new(&drag.candidate, drag.origin_phase, column.phase_id).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::fixtures::demo_board;

    fn marco() -> BoardItemId {
        BoardItemId::new("item-1")
    }

    #[test]
    fn drop_on_another_column_proposes_without_touching_the_board() {
        let board = demo_board(Utc::now());
        let before = board.clone();
        let mut drag = DragReconciler::new();
        drag.begin(&board, &marco()).expect("begin");
        assert_eq!(drag.dragging(), Some(&marco()));

        let proposal = drag
            .release(&board, DropTarget::Column(2))
            .expect("release")
            .expect("proposal");
        assert_eq!(proposal.from_phase, Phase::CvReview);
        assert_eq!(proposal.to_phase, Phase::TechnicalInterview);
        assert_eq!(proposal.candidate_name, "Marco Rossi");
        assert_eq!(board, before);
        assert!(drag.dragging().is_none());
    }

    #[test]
    fn drop_on_origin_column_or_outside_is_a_no_op() {
        let board = demo_board(Utc::now());
        let before = board.clone();
        let mut drag = DragReconciler::new();

        drag.begin(&board, &marco()).expect("begin");
        assert_eq!(drag.release(&board, DropTarget::Column(0)).expect("release"), None);

        drag.begin(&board, &marco()).expect("begin");
        assert_eq!(drag.release(&board, DropTarget::Outside).expect("release"), None);

        drag.begin(&board, &marco()).expect("begin");
        assert_eq!(drag.release(&board, DropTarget::Column(42)).expect("release"), None);
        assert_eq!(board, before);
    }

    #[test]
    fn unknown_item_and_release_without_drag_are_errors() {
        let board = demo_board(Utc::now());
        let mut drag = DragReconciler::new();
        assert_eq!(
            drag.begin(&board, &BoardItemId::new("ghost")),
            Err(DragError::UnknownItem("ghost".to_string()))
        );
        assert_eq!(
            drag.release(&board, DropTarget::Column(1)),
            Err(DragError::NotDragging)
        );
    }

    #[test]
    fn source_phase_is_taken_from_where_the_drag_started() {
        let board = demo_board(Utc::now());
        let mut drag = DragReconciler::new();
        drag.begin(&board, &marco()).expect("begin");

        // Another operator moves Marco while the pointer is still down.
        let mut refreshed = board.clone();
        let moved = refreshed.columns[0].candidates.remove(0);
        refreshed.columns[1].candidates.push(moved);

        let proposal = drag
            .release(&refreshed, DropTarget::Column(3))
            .expect("release")
            .expect("proposal");
        assert_eq!(proposal.from_phase, Phase::CvReview);
        assert_eq!(proposal.to_phase, Phase::CulturalFit);
    }
}
