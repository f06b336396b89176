use shared::{
    domain::BoardItemId,
    protocol::{Board, Candidate},
};
use tracing::{debug, warn};
use url::Url;

use crate::transition::MoveProposal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardKey {
    Left,
    Right,
    Up,
    Down,
    Enter,
    Space,
    Escape,
    Char(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Overlay {
    Detail(BoardItemId),
    MoveDialog(BoardItemId),
    Menu,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusAction {
    OpenDetail(BoardItemId),
    ProposeMove(MoveProposal),
    ComposeMail { to: String, url: Url },
    Refresh,
    Dismiss(Option<Overlay>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub column: usize,
    pub row: usize,
}

#[derive(Debug, Default)]
pub struct FocusController {
    cursor: Cursor,
    overlay: Option<Overlay>,
    text_input_focused: bool,
    selection: Option<BoardItemId>,
}

impl FocusController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_ref()
    }

    pub fn selection(&self) -> Option<&BoardItemId> {
        self.selection.as_ref()
    }

    pub fn open_overlay(&mut self, overlay: Overlay) {
        self.overlay = Some(overlay);
    }

    pub fn close_overlay(&mut self) -> Option<Overlay> {
        self.overlay.take()
    }

    pub fn set_text_input_focused(&mut self, focused: bool) {
        self.text_input_focused = focused;
    }

    fn suppressed(&self) -> bool {
        self.overlay.is_some() || self.text_input_focused
    }

    /// Item under the cursor, if the cursor points at one.
    pub fn focused_item<'a>(&self, board: &'a Board) -> Option<&'a Candidate> {
        board
            .columns
            .get(self.cursor.column)?
            .candidates
            .get(self.cursor.row)
    }

    /// Applies a key press. Returns what the surrounding view should do.
    pub fn handle_key(&mut self, key: BoardKey, board: &Board) -> Option<FocusAction> {
        if key == BoardKey::Escape {
            self.selection = None;
            return Some(FocusAction::Dismiss(self.overlay.take()));
        }
        if self.suppressed() {
            debug!(?key, "board shortcut suppressed");
            return None;
        }

        match key {
            BoardKey::Left => {
                self.move_column(board, -1);
                None
            }
            BoardKey::Right => {
                self.move_column(board, 1);
                None
            }
            BoardKey::Up => {
                self.move_row(board, false);
                None
            }
            BoardKey::Down => {
                self.move_row(board, true);
                None
            }
            BoardKey::Enter => {
                let item = self.focused_item(board)?.id.clone();
                self.selection = Some(item.clone());
                self.overlay = Some(Overlay::Detail(item.clone()));
                Some(FocusAction::OpenDetail(item))
            }
            BoardKey::Space => self.propose_next(board),
            BoardKey::Char(c) => match c.to_ascii_lowercase() {
                'm' => self.propose_next(board),
                'e' => self.compose_mail(board),
                'r' => Some(FocusAction::Refresh),
                _ => None,
            },
            BoardKey::Escape => None,
        }
    }

    fn move_column(&mut self, board: &Board, delta: isize) {
        let Some(last) = board.columns.len().checked_sub(1) else {
            return;
        };
        self.cursor.column = self.cursor.column.saturating_add_signed(delta).min(last);
        self.cursor.row = 0;
    }

    fn move_row(&mut self, board: &Board, forward: bool) {
        let len = board
            .columns
            .get(self.cursor.column)
            .map_or(0, |column| column.candidates.len());
        if len == 0 {
            return;
        }
        let row = self.cursor.row.min(len - 1);
        self.cursor.row = if forward {
            (row + 1) % len
        } else {
            (row + len - 1) % len
        };
    }

    fn propose_next(&mut self, board: &Board) -> Option<FocusAction> {
        let candidate = self.focused_item(board)?;
        match MoveProposal::to_next_phase(candidate) {
            Ok(proposal) => {
                self.selection = Some(candidate.id.clone());
                self.overlay = Some(Overlay::MoveDialog(candidate.id.clone()));
                Some(FocusAction::ProposeMove(proposal))
            }
            Err(err) => {
                debug!(item_id = %candidate.id, "move to next phase unavailable: {err}");
                None
            }
        }
    }

    fn compose_mail(&self, board: &Board) -> Option<FocusAction> {
        let candidate = self.focused_item(board)?;
        match Url::parse(&format!("mailto:{}", candidate.email)) {
            Ok(url) => Some(FocusAction::ComposeMail {
                to: candidate.email.clone(),
                url,
            }),
            Err(err) => {
                warn!(item_id = %candidate.id, "cannot build mail link: {err}");
                None
            }
        }
    }

    /// Re-clamps the cursor after the board was replaced and drops a
    /// selection whose item is gone.
    pub fn reconcile(&mut self, board: &Board) {
        let columns = board.columns.len();
        self.cursor.column = self.cursor.column.min(columns.saturating_sub(1));
        let rows = board
            .columns
            .get(self.cursor.column)
            .map_or(0, |column| column.candidates.len());
        self.cursor.row = self.cursor.row.min(rows.saturating_sub(1));
        if let Some(item) = &self.selection {
            if board.locate(item).is_none() {
                self.selection = None;
            }
        }
    }
}
