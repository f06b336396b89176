use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
};

use shared::protocol::{WorkflowEvent, WorkflowEventType};
use tracing::{error, trace};

pub type EventHandler = Arc<dyn Fn(&WorkflowEvent) -> anyhow::Result<()> + Send + Sync>;

pub struct HandlerSlot {
    current: RwLock<EventHandler>,
}

impl HandlerSlot {
    fn new(handler: EventHandler) -> Self {
        Self {
            current: RwLock::new(handler),
        }
    }

    fn get(&self) -> EventHandler {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn set(&self, handler: EventHandler) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Handle returned by [`EventDispatcher::on`].
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    event_type: WorkflowEventType,
    slot: Arc<HandlerSlot>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn event_type(&self) -> WorkflowEventType {
        self.event_type
    }

    /// Points the registration at a newer handler.
    pub fn replace<F>(&self, handler: F)
    where
        F: Fn(&WorkflowEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.slot.set(Arc::new(handler));
    }
}

#[derive(Default)]
pub struct EventDispatcher {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<WorkflowEventType, Vec<(SubscriptionId, Arc<HandlerSlot>)>>>,
}

impl EventDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on<F>(&self, event_type: WorkflowEventType, handler: F) -> Subscription
    where
        F: Fn(&WorkflowEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(HandlerSlot::new(Arc::new(handler)));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push((id, Arc::clone(&slot)));
        Subscription {
            id,
            event_type,
            slot,
        }
    }

    pub fn off(&self, subscription: &Subscription) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(registered) = handlers.get_mut(&subscription.event_type) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|(id, _)| *id != subscription.id);
        before != registered.len()
    }

    pub fn handler_count(&self, event_type: WorkflowEventType) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    /// Returns how many handlers completed successfully.
    pub fn dispatch(&self, event: &WorkflowEvent) -> usize {
        let event_type = event.event_type();
        let slots: Vec<(SubscriptionId, Arc<HandlerSlot>)> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event_type)
            .cloned()
            .unwrap_or_default();
        trace!(%event_type, handlers = slots.len(), "dispatching workflow event");

        let mut delivered = 0;
        for (id, slot) in slots {
            let handler = slot.get();
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    error!(%event_type, subscription = id.0, "event handler failed: {err:#}");
                }
                Err(_) => {
                    error!(%event_type, subscription = id.0, "event handler panicked");
                }
            }
        }
        delivered
    }
}
