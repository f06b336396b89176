use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared::{fixtures::demo_board, protocol::Board};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::api::WorkflowApi;

/// What to show when a snapshot fetch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotFailurePolicy {
    /// Substitute the demonstration dataset, marked [`SnapshotOrigin::Fallback`].
    #[default]
    Fallback,
    /// Show an empty board.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    Empty,
    Live,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct BoardSnapshot {
    pub board: Board,
    pub origin: SnapshotOrigin,
    pub revision: u64,
    pub fetched_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl BoardSnapshot {
    fn initial() -> Self {
        Self {
            board: Board::default(),
            origin: SnapshotOrigin::Empty,
            revision: 0,
            fetched_at: Utc::now(),
            error: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.origin == SnapshotOrigin::Live
    }
}

pub struct BoardStore {
    api: Arc<dyn WorkflowApi>,
    policy: SnapshotFailurePolicy,
    issued: AtomicU64,
    applied: Mutex<u64>,
    current: watch::Sender<Arc<BoardSnapshot>>,
}

impl BoardStore {
    pub fn new(api: Arc<dyn WorkflowApi>, policy: SnapshotFailurePolicy) -> Arc<Self> {
        let (current, _) = watch::channel(Arc::new(BoardSnapshot::initial()));
        Arc::new(Self {
            api,
            policy,
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
            current,
        })
    }

    pub fn snapshot(&self) -> Arc<BoardSnapshot> {
        Arc::clone(&self.current.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<BoardSnapshot>> {
        self.current.subscribe()
    }

    pub fn policy(&self) -> SnapshotFailurePolicy {
        self.policy
    }

    /// The load issued last wins.
    pub async fn load_snapshot(&self) -> Arc<BoardSnapshot> {
        let request = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let (board, origin, error) = match self.api.fetch_board().await {
            Ok(mut board) => {
                let removed = board.dedupe_items();
                if removed > 0 {
                    warn!(removed, "snapshot listed board items more than once; kept first occurrence");
                }
                (board, SnapshotOrigin::Live, None)
            }
            Err(err) => {
                error!("failed to load board snapshot: {err}");
                match self.policy {
                    SnapshotFailurePolicy::Fallback => {
                        warn!("showing demonstration board in place of live data");
                        (demo_board(Utc::now()), SnapshotOrigin::Fallback, Some(err.to_string()))
                    }
                    SnapshotFailurePolicy::Empty => {
                        (Board::default(), SnapshotOrigin::Empty, Some(err.to_string()))
                    }
                }
            }
        };

        let mut applied = self.applied.lock().unwrap_or_else(PoisonError::into_inner);
        if request < *applied {
            info!(request, applied = *applied, "discarding out-of-order snapshot");
            return self.snapshot();
        }
        *applied = request;
        let snapshot = Arc::new(BoardSnapshot {
            board,
            origin,
            revision: request,
            fetched_at: Utc::now(),
            error,
        });
        self.current.send_replace(Arc::clone(&snapshot));
        snapshot
    }
}
