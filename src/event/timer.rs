use super::{DEFAULT_PRIORITY, Event, EventArgs, EventQueue, Topic};
use crate::error::TimerError;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

struct Timer {
    period: Duration,
    last_fired: Instant,
    recurring: bool,
    topic: Topic,
    args: Box<dyn EventArgs>,
}

#[derive(Default)]
struct Inner {
    timers: AHashMap<i16, Timer>,
    next_id: i16,
}

impl Inner {
    // Monotonic ids over the whole i16 range; -1 stays reserved as the
    // schedule failure sentinel and wrap-around skips it along with any id
    // still present in the table.
    fn assign_id(&mut self) -> i16 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if id != -1 && !self.timers.contains_key(&id) {
                return id;
            }
        }
    }

    fn install(&mut self, period: Duration, topic: Topic, args: Box<dyn EventArgs>, recurring: bool) -> i16 {
        let id = self.assign_id();
        self.timers.insert(
            id,
            Timer {
                period,
                last_fired: Instant::now(),
                recurring,
                topic,
                args,
            },
        );
        id
    }
}

/// Table of one-shot and recurring timers.
///
/// Lock order is timers before queue: `fire` pushes emitted events while the
/// table lock is held. Nothing may take the table lock while holding the
/// queue lock.
#[derive(Default)]
pub struct TimerTable {
    inner: Mutex<Inner>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a one-shot timer firing after `period`.
    pub fn delay(&self, period: Duration, topic: Topic, args: Box<dyn EventArgs>) -> i16 {
        let id = self.inner.lock().install(period, topic, args, false);
        tracing::debug!(
            "scheduled a {:?} event to fire in {}ms (id = {})",
            topic,
            period.as_millis(),
            id
        );
        id
    }

    /// Install a recurring timer firing every `period`.
    pub fn add_recurring(&self, period: Duration, topic: Topic, args: Box<dyn EventArgs>) -> i16 {
        let id = self.inner.lock().install(period, topic, args, true);
        tracing::debug!(
            "scheduled a {:?} event to fire every {}ms (id = {})",
            topic,
            period.as_millis(),
            id
        );
        id
    }

    /// Install a one-shot timer firing at the given unix timestamp (seconds).
    /// Returns `-1` when the timestamp is not strictly in the future.
    pub fn schedule(&self, timestamp_secs: u64, topic: Topic, args: Box<dyn EventArgs>) -> i16 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        if now >= timestamp_secs {
            return -1;
        }
        self.delay(Duration::from_secs(timestamp_secs - now), topic, args)
    }

    /// Remove a timer and free its payload.
    pub fn remove(&self, id: i16) -> Result<(), TimerError> {
        let mut inner = self.inner.lock();
        if inner.timers.remove(&id).is_none() {
            return Err(TimerError::NoSuchTimer(id));
        }
        drop(inner);
        tracing::debug!("removed timer ID {}", id);
        Ok(())
    }

    /// Snapshot of current timer ids.
    pub fn list(&self) -> Vec<i16> {
        let mut ids: Vec<i16> = self.inner.lock().timers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Emit an event for every timer whose deadline has passed. One-shot
    /// timers are removed on fire; recurring timers advance `last_fired`.
    pub fn fire(&self, now: Instant, queue: &EventQueue) {
        let mut inner = self.inner.lock();
        let due: Vec<i16> = inner
            .timers
            .iter()
            .filter(|(_, t)| t.last_fired + t.period <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            let timer = inner.timers.get_mut(&id).expect("due id present");
            let event = Box::new(Event {
                topic: timer.topic,
                priority: DEFAULT_PRIORITY,
                args: timer.args.clone_args(),
            });
            queue.push(event);
            tracing::debug!("fired timer {}", id);
            if timer.recurring {
                timer.last_fired = now;
            } else {
                inner.timers.remove(&id);
                tracing::debug!("completed and removed timer {}", id);
            }
        }
    }

    /// Drop every timer (shutdown path).
    pub fn clear(&self) {
        self.inner.lock().timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Box<dyn EventArgs> {
        Box::new(s.to_string())
    }

    #[test]
    fn ids_are_monotonic_and_listed() {
        let table = TimerTable::new();
        let a = table.delay(Duration::from_secs(10), Topic::TextInput, args("a"));
        let b = table.add_recurring(Duration::from_secs(10), Topic::TextInput, args("b"));
        assert!(b > a);
        assert_eq!(table.list(), vec![a, b]);
    }

    #[test]
    fn id_not_reused_after_remove() {
        let table = TimerTable::new();
        let a = table.delay(Duration::from_secs(10), Topic::TextInput, args("a"));
        table.remove(a).unwrap();
        let b = table.delay(Duration::from_secs(10), Topic::TextInput, args("b"));
        assert_ne!(a, b);
    }

    #[test]
    fn id_wraps_through_negative_range_and_skips_sentinel() {
        let table = TimerTable::new();

        table.inner.lock().next_id = i16::MAX;
        let a = table.delay(Duration::from_secs(10), Topic::TextInput, args("a"));
        let b = table.delay(Duration::from_secs(10), Topic::TextInput, args("b"));
        assert_eq!(a, i16::MAX);
        assert_eq!(b, i16::MIN);
        assert!(table.list().contains(&b));
        table.remove(b).unwrap();

        // approaching the sentinel: -1 is never assigned
        table.inner.lock().next_id = -2;
        let c = table.delay(Duration::from_secs(10), Topic::TextInput, args("c"));
        let d = table.delay(Duration::from_secs(10), Topic::TextInput, args("d"));
        assert_eq!(c, -2);
        assert_eq!(d, 0);
    }

    #[test]
    fn wrapped_id_skips_occupied_slots() {
        let table = TimerTable::new();
        let zero = table.delay(Duration::from_secs(10), Topic::TextInput, args("z"));
        assert_eq!(zero, 0);

        // wrap lands on the still-live id 0 and must pass over it
        table.inner.lock().next_id = -1;
        let next = table.delay(Duration::from_secs(10), Topic::TextInput, args("n"));
        assert_eq!(next, 1);
    }

    #[test]
    fn remove_unknown_is_logic_error() {
        let table = TimerTable::new();
        assert_eq!(table.remove(42), Err(TimerError::NoSuchTimer(42)));
    }

    #[test]
    fn remove_round_trip() {
        let table = TimerTable::new();
        let id = table.add_recurring(Duration::from_millis(5), Topic::TextInput, args("t"));
        assert!(table.list().contains(&id));
        table.remove(id).unwrap();
        assert!(!table.list().contains(&id));
    }

    #[test]
    fn schedule_past_returns_sentinel() {
        let table = TimerTable::new();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert_eq!(table.schedule(now, Topic::TextInput, args("x")), -1);
        assert_eq!(table.schedule(now - 100, Topic::TextInput, args("x")), -1);
        assert!(table.list().is_empty());
    }

    #[test]
    fn schedule_future_installs() {
        let table = TimerTable::new();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let id = table.schedule(now + 3600, Topic::TextInput, args("x"));
        assert!(id >= 0);
        assert!(table.list().contains(&id));
    }

    #[test]
    fn one_shot_fires_once_and_leaves_table() {
        let table = TimerTable::new();
        let queue = EventQueue::new();
        let id = table.delay(Duration::from_millis(1), Topic::Custom(1), args("p"));

        std::thread::sleep(Duration::from_millis(5));
        table.fire(Instant::now(), &queue);
        assert_eq!(queue.len(), 1);
        assert!(!table.list().contains(&id));

        // firing again emits nothing
        table.fire(Instant::now(), &queue);
        assert_eq!(queue.len(), 1);

        let e = queue.poll_top(|_| true).unwrap();
        assert_eq!(e.topic, Topic::Custom(1));
        assert_eq!(e.priority, DEFAULT_PRIORITY);
        assert_eq!(e.args_as::<String>().map(String::as_str), Some("p"));
    }

    #[test]
    fn recurring_fires_every_pass_and_stays() {
        let table = TimerTable::new();
        let queue = EventQueue::new();
        let id = table.add_recurring(Duration::from_millis(1), Topic::Custom(2), args("p"));

        for _ in 0..3 {
            std::thread::sleep(Duration::from_millis(3));
            table.fire(Instant::now(), &queue);
        }
        assert_eq!(queue.len(), 3);
        assert!(table.list().contains(&id));
    }

    #[test]
    fn not_due_does_not_fire() {
        let table = TimerTable::new();
        let queue = EventQueue::new();
        table.delay(Duration::from_secs(3600), Topic::Custom(3), args("p"));
        table.fire(Instant::now(), &queue);
        assert!(queue.is_empty());
    }
}
