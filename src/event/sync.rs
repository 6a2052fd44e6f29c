use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Flags {
    suspend_requested: bool,
    suspended: bool,
    resume_requested: bool,
    syscall_origin: bool,
}

/// Per-handler coordination primitive.
///
/// The dispatcher asks a running handler to yield with [`request_suspend`];
/// the handler polls [`should_suspend`] at cooperative checkpoints and parks
/// itself in [`confirm_suspended`], which blocks until the dispatcher calls
/// [`resume`]. Suspension is cooperative only; a handler that never polls
/// delays preemption indefinitely.
///
/// The `syscall_origin` bit marks that an engine call (notably quit) was made
/// from inside this handler, so the dispatcher must not wait on it during
/// cleanup. It must be set before the stop request becomes visible.
///
/// [`request_suspend`]: HandlerSync::request_suspend
/// [`should_suspend`]: HandlerSync::should_suspend
/// [`confirm_suspended`]: HandlerSync::confirm_suspended
/// [`resume`]: HandlerSync::resume
#[derive(Debug, Default)]
pub struct HandlerSync {
    flags: Mutex<Flags>,
    cond: Condvar,
}

impl HandlerSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher side: ask the handler to park at its next checkpoint.
    pub fn request_suspend(&self) {
        let mut f = self.flags.lock();
        f.suspend_requested = true;
    }

    /// Handler side: poll at cooperative checkpoints.
    pub fn should_suspend(&self) -> bool {
        self.flags.lock().suspend_requested
    }

    /// Handler side: park until resumed. Clears the request/suspended bits
    /// on wakeup so the next suspension cycle starts clean.
    pub fn confirm_suspended(&self) {
        let mut f = self.flags.lock();
        f.suspended = true;
        self.cond.notify_all();
        while !f.resume_requested {
            self.cond.wait(&mut f);
        }
        f.suspended = false;
        f.suspend_requested = false;
        f.resume_requested = false;
        self.cond.notify_all();
    }

    /// Dispatcher side: has the handler parked yet?
    pub fn is_suspended(&self) -> bool {
        self.flags.lock().suspended
    }

    /// Dispatcher side: wake a parked handler.
    pub fn resume(&self) {
        let mut f = self.flags.lock();
        f.resume_requested = true;
        self.cond.notify_all();
    }

    pub fn set_syscall_origin(&self) {
        let mut f = self.flags.lock();
        f.syscall_origin = true;
    }

    pub fn is_syscall_origin(&self) -> bool {
        self.flags.lock().syscall_origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn suspend_request_is_observable() {
        let sync = HandlerSync::new();
        assert!(!sync.should_suspend());
        sync.request_suspend();
        assert!(sync.should_suspend());
        assert!(!sync.is_suspended());
    }

    #[test]
    fn confirm_blocks_until_resume() {
        let sync = Arc::new(HandlerSync::new());
        let resumed = Arc::new(AtomicBool::new(false));

        let worker = {
            let sync = sync.clone();
            let resumed = resumed.clone();
            thread::spawn(move || {
                sync.confirm_suspended();
                resumed.store(true, Ordering::SeqCst);
            })
        };

        // worker must reach the parked state
        let deadline = Instant::now() + Duration::from_secs(2);
        while !sync.is_suspended() {
            assert!(Instant::now() < deadline, "handler never parked");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!resumed.load(Ordering::SeqCst));

        sync.resume();
        worker.join().unwrap();
        assert!(resumed.load(Ordering::SeqCst));
        // bits are cleared for the next cycle
        assert!(!sync.is_suspended());
        assert!(!sync.should_suspend());
    }

    #[test]
    fn syscall_origin_bit() {
        let sync = HandlerSync::new();
        assert!(!sync.is_syscall_origin());
        sync.set_syscall_origin();
        assert!(sync.is_syscall_origin());
    }
}
