//! Real-time sync core for the interview pipeline board.

pub mod api;
pub mod board;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod drag;
pub mod error;
pub mod events;
pub mod focus;
pub mod session;
pub mod transition;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use api::{HttpWorkflowApi, WorkflowApi};
pub use board::{BoardSnapshot, BoardStore, SnapshotFailurePolicy, SnapshotOrigin};
pub use config::{load_settings, ClientSettings, TransportKind};
pub use connection::{
    ConnectionManager, ConnectionState, ConnectionStatus, ReconnectOptions, MAX_RECONNECT_ATTEMPTS,
};
pub use dispatcher::{EventDispatcher, Subscription};
pub use drag::{DragReconciler, DropTarget};
pub use error::{ClientError, DragError, TransitionError, TransportError, ValidationError};
pub use events::{BoardEvent, Notification, NotificationLevel, Notifier};
pub use focus::{BoardKey, FocusAction, FocusController, Overlay};
pub use session::{BoardSession, SessionOptions};
pub use transition::{MoveProposal, PhaseTransitions, TransitionForm, TransitionState};
pub use transport::{EventStreamTransport, RoomSubscription, SocketTransport, Transport};
