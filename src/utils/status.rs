use crossbeam::utils::CachePadded;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of an agent instance.
///
/// `Created` until the EDT is live, `Running` while the tick loop spins,
/// `StopRequested` once any party asks for quit, `Stopped` after cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AgentStatus {
    Created = 0,
    Running = 1,
    StopRequested = 2,
    Stopped = 3,
}

impl AgentStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => AgentStatus::Created,
            1 => AgentStatus::Running,
            2 => AgentStatus::StopRequested,
            _ => AgentStatus::Stopped,
        }
    }
}

/// Cheaply clonable cell holding the agent status.
///
/// Wraps an `AtomicU8` in `Arc<CachePadded<...>>` to avoid false sharing;
/// read from the EDT every pass and from embedder threads at will.
#[derive(Clone)]
#[repr(transparent)]
pub struct StatusCell(Arc<CachePadded<AtomicU8>>);

impl StatusCell {
    #[inline]
    pub fn new() -> Self {
        Self(Arc::new(CachePadded::new(AtomicU8::new(
            AgentStatus::Created as u8,
        ))))
    }

    #[inline(always)]
    pub fn get(&self) -> AgentStatus {
        AgentStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline(always)]
    pub fn set(&self, s: AgentStatus) {
        self.0.store(s as u8, Ordering::Release)
    }

    /// Transition only if the current status matches `from`.
    #[inline]
    pub fn transition(&self, from: AgentStatus, to: AgentStatus) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StatusCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusCell").field("status", &self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_created() {
        let cell = StatusCell::new();
        assert_eq!(cell.get(), AgentStatus::Created);
    }

    #[test]
    fn transition_guards_current_value() {
        let cell = StatusCell::new();
        assert!(cell.transition(AgentStatus::Created, AgentStatus::Running));
        assert!(!cell.transition(AgentStatus::Created, AgentStatus::Running));
        cell.set(AgentStatus::StopRequested);
        assert_eq!(cell.get(), AgentStatus::StopRequested);
    }

    #[test]
    fn clones_share_state() {
        let cell = StatusCell::new();
        let other = cell.clone();
        cell.set(AgentStatus::Stopped);
        assert_eq!(other.get(), AgentStatus::Stopped);
    }
}
