use super::Event;
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

struct Queued {
    event: Box<Event>,
    seq: u64,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: higher priority first, earlier push first among equals
        (self.event.priority, Reverse(self.seq)).cmp(&(other.event.priority, Reverse(other.seq)))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
}

/// Pending-event queue, ordered by priority (higher first).
///
/// Events pushed from one thread keep program order among equal priorities.
/// The dispatcher peeks the top and decides before popping, so an event it
/// declines stays queued.
#[derive(Default)]
pub struct EventQueue {
    inner: Mutex<Inner>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transfer ownership of `event` into the queue.
    pub fn push(&self, event: Box<Event>) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Queued { event, seq });
    }

    /// Inspect the top event; pop it only if `decide` accepts it.
    pub fn poll_top(&self, decide: impl FnOnce(&Event) -> bool) -> Option<Box<Event>> {
        let mut inner = self.inner.lock();
        let top = inner.heap.peek()?;
        if !decide(&top.event) {
            return None;
        }
        inner.heap.pop().map(|q| q.event)
    }

    /// Pop and hand back all remaining events, in priority order.
    pub fn drain(&self) -> Vec<Box<Event>> {
        let mut inner = self.inner.lock();
        let mut out = Vec::with_capacity(inner.heap.len());
        while let Some(q) = inner.heap.pop() {
            out.push(q.event);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
