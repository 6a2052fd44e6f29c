pub(crate) use dispatch::CurrentWorker;
pub use queue::EventQueue;
pub use registry::{EventHandler, HandlerRegistry};
pub use sync::HandlerSync;
pub use timer::TimerTable;

pub(crate) mod dispatch;
mod queue;
mod registry;
mod sync;
mod timer;

use std::any::Any;
use std::fmt::Debug;

/// Tag categorizing an event; the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// A line of user text entering the agent.
    TextInput,
    /// Application-defined topics.
    Custom(u16),
}

/// Default priority for generated and timer-fired events.
pub const DEFAULT_PRIORITY: u8 = 0;

/// Typed event payload. Payloads cross threads (the dispatcher and the
/// handler worker share the event) and get deep-copied when a timer re-emits
/// them, so implementors supply `clone_args`; handlers get their concrete
/// type back through `as_any`.
pub trait EventArgs: Send + Sync + Debug + 'static {
    fn clone_args(&self) -> Box<dyn EventArgs>;
    fn as_any(&self) -> &dyn Any;
}

impl EventArgs for String {
    fn clone_args(&self) -> Box<dyn EventArgs> {
        Box::new(self.clone())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl EventArgs for serde_json::Value {
    fn clone_args(&self) -> Box<dyn EventArgs> {
        Box::new(self.clone())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl EventArgs for () {
    fn clone_args(&self) -> Box<dyn EventArgs> {
        Box::new(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Immutable message dispatched to at most one handler.
///
/// Owned by exactly one of: the queue, a handler context, or the timer fire
/// path. Transfers between them are by move.
#[derive(Debug)]
pub struct Event {
    pub topic: Topic,
    pub priority: u8,
    pub args: Box<dyn EventArgs>,
}

impl Event {
    pub fn new(topic: Topic, args: impl EventArgs) -> Box<Self> {
        Self::with_priority(topic, DEFAULT_PRIORITY, args)
    }

    pub fn with_priority(topic: Topic, priority: u8, args: impl EventArgs) -> Box<Self> {
        Box::new(Self {
            topic,
            priority,
            args: Box::new(args),
        })
    }

    /// Downcast the payload to a concrete type.
    pub fn args_as<T: 'static>(&self) -> Option<&T> {
        self.args.as_any().downcast_ref::<T>()
    }
}
