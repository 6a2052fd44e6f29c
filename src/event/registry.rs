use super::{Event, HandlerSync, Topic};
use crate::agent::Agent;
use ahash::AHashMap;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// A callable subscribed to a topic. Runs on a dedicated worker thread with
/// the agent handle, the event being handled, and the worker's sync record.
pub type EventHandler = Arc<dyn Fn(&Agent, &Event, &HandlerSync) + Send + Sync>;

/// Topic → at-most-one-handler map.
///
/// Mutated from setup and plugin enable/disable; read lock-free by the EDT
/// every dispatch. Writers publish a fresh snapshot, readers load the
/// current one, so dispatcher reads never block on a subscriber.
pub struct HandlerRegistry {
    map: ArcSwap<AHashMap<Topic, EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            map: ArcSwap::from_pointee(AHashMap::new()),
        }
    }

    /// Install `handler` for `topic`, replacing any existing one.
    pub fn subscribe(&self, topic: Topic, handler: EventHandler) {
        let mut next = (**self.map.load()).clone();
        next.insert(topic, handler);
        self.map.store(Arc::new(next));
    }

    /// Clear the slot for `topic`. A no-op when nothing is subscribed.
    pub fn unsubscribe(&self, topic: Topic) {
        let mut next = (**self.map.load()).clone();
        next.remove(&topic);
        self.map.store(Arc::new(next));
    }

    pub fn get(&self, topic: Topic) -> Option<EventHandler> {
        self.map.load().get(&topic).cloned()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
