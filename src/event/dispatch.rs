use super::{Event, HandlerSync, registry::EventHandler};
use crate::agent::Agent;
use crate::utils::AgentStatus;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// How often the interrupt wait repeats its stalled-handler warning.
const SUSPEND_WARN_INTERVAL: Duration = Duration::from_secs(1);

/// Dispatcher-side record of a live or suspended handler.
///
/// The event and sync are shared with the worker thread via `Arc`; whichever
/// side drops its clones last frees them, so the reap protocol only decides
/// who *observes* completion, never who frees memory.
struct HandlerContext {
    event: Arc<Event>,
    sync: Arc<HandlerSync>,
    running: Arc<AtomicBool>,
    reap_in_handler: Arc<AtomicBool>,
    thread_id: ThreadId,
}

/// Identity of the worker currently executing a handler. Published by the
/// EDT so `Agent::quit` can tell when it is being called from inside the
/// current handler and mark the syscall origin before requesting stop.
pub struct CurrentWorker {
    pub thread_id: ThreadId,
    pub sync: Arc<HandlerSync>,
}

/// Clears `running` when the handler returns, even by panic. A handler that
/// panics terminates only its worker; the EDT reaps it like a normal finish.
struct CompletionGuard {
    running: Arc<AtomicBool>,
    reap_in_handler: Arc<AtomicBool>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.reap_in_handler.load(Ordering::Acquire) {
            self.running.store(false, Ordering::Release);
        }
        // with reap transferred, nobody is watching: the worker's Arc clones
        // drop right after this guard and take the context with them
    }
}

/// The event dispatch thread: single owner of the queue-poll / preempt /
/// reap / resume / tick cycle.
pub(crate) struct Edt {
    agent: Agent,
    idle_sleep: Duration,
    tick_resolution: Duration,
    current: Option<HandlerContext>,
    interrupted: Vec<HandlerContext>,
    last_tick: Instant,
}

impl Edt {
    pub(crate) fn new(agent: Agent, idle_sleep: Duration, tick_resolution: Duration) -> Self {
        let now = Instant::now();
        Self {
            agent,
            idle_sleep,
            tick_resolution,
            current: None,
            interrupted: Vec::new(),
            // fire timers on the very first pass
            last_tick: now.checked_sub(tick_resolution).unwrap_or(now),
        }
    }

    pub(crate) fn run(mut self) {
        let term_flag = Arc::new(AtomicBool::new(false));
        for sig in TERM_SIGNALS {
            let _ = flag::register(*sig, term_flag.clone());
        }

        // a stop requested before the loop is live must not be overwritten
        self.agent
            .shared()
            .status
            .transition(AgentStatus::Created, AgentStatus::Running);

        while self.agent.shared().status.get() != AgentStatus::StopRequested {
            if term_flag.load(Ordering::Relaxed) {
                tracing::warn!("termination signal received");
                self.agent.shared().status.set(AgentStatus::StopRequested);
                break;
            }
            self.pass();
            thread::sleep(self.idle_sleep);
        }

        self.cleanup();
        self.agent.shared().status.set(AgentStatus::Stopped);
        tracing::trace!("EDT finished cleanup");
    }

    /// One dispatch pass: poll-and-decide, reap, resume, tick.
    fn pass(&mut self) {
        // dispatch iff there is no current handler or the queued event's
        // priority is strictly greater; equal priority never preempts
        let cur_priority = self.current.as_ref().map(|c| c.event.priority);
        let next = self.agent.shared().queue.poll_top(|e| match cur_priority {
            None => true,
            Some(p) => e.priority > p,
        });
        if let Some(event) = next {
            tracing::debug!("dispatching {:?} event", event.topic);
            self.dispatch(event);
        }

        // reap a finished handler
        if self
            .current
            .as_ref()
            .is_some_and(|c| !c.running.load(Ordering::Acquire))
        {
            self.current = None;
            self.clear_current_worker();
        }

        // with the current slot clear, resume the most recently interrupted
        if self.current.is_none()
            && let Some(ctx) = self.interrupted.pop()
        {
            ctx.sync.resume();
            self.install_current(ctx);
        }

        // timing tasks on the tick boundary
        let now = Instant::now();
        if self.last_tick + self.tick_resolution <= now {
            self.last_tick = now;
            let shared = self.agent.shared();
            shared.timers.fire(now, &shared.queue);
        }
    }

    fn dispatch(&mut self, event: Box<Event>) {
        if self.current.is_some() && !self.interrupt_current() {
            // the current handler is blocked in a shutdown syscall and will
            // never park; requeue and let cleanup take over
            self.agent.shared().queue.push(event);
            return;
        }
        let handler = self.agent.shared().registry.get(event.topic);
        match handler {
            Some(handler) => self.spawn_handler(event, handler),
            // no subscriber: the event is dropped without side effect
            None => drop(event),
        }
    }

    /// Ask the current handler to park and wait until it confirms, then push
    /// its context onto the interrupted stack. The shared worker slot stays
    /// published until the handler actually parks, so a quit issued from the
    /// handler in this window still lands on its sync. Returns whether the
    /// current slot was cleared: false means the handler is inside a
    /// shutdown syscall, joined on this thread, and stays installed.
    fn interrupt_current(&mut self) -> bool {
        let ctx = self.current.take().expect("caller checked current");
        ctx.sync.request_suspend();
        let wait_start = Instant::now();
        let mut next_warn = wait_start + SUSPEND_WARN_INTERVAL;
        loop {
            if ctx.sync.is_suspended() {
                self.clear_current_worker();
                self.interrupted.push(ctx);
                return true;
            }
            if !ctx.running.load(Ordering::Acquire) {
                // ran to completion instead of confirming; nothing to resume
                self.clear_current_worker();
                return true;
            }
            if ctx.sync.is_syscall_origin() {
                self.current = Some(ctx);
                return false;
            }
            // preemption stays blocked until the handler cooperates; there
            // is no forced stop, so at least make the stall visible
            let now = Instant::now();
            if now >= next_warn {
                next_warn = now + SUSPEND_WARN_INTERVAL;
                tracing::warn!(
                    "{:?} handler has not confirmed suspension after {}ms",
                    ctx.event.topic,
                    wait_start.elapsed().as_millis()
                );
            }
            thread::sleep(self.idle_sleep);
        }
    }

    fn spawn_handler(&mut self, event: Box<Event>, handler: EventHandler) {
        let event: Arc<Event> = Arc::from(event);
        let sync = Arc::new(HandlerSync::new());
        let running = Arc::new(AtomicBool::new(true));
        let reap_in_handler = Arc::new(AtomicBool::new(false));

        let spawned = {
            let agent = self.agent.clone();
            let event = event.clone();
            let sync = sync.clone();
            let guard = CompletionGuard {
                running: running.clone(),
                reap_in_handler: reap_in_handler.clone(),
            };
            thread::Builder::new()
                .name("handler".to_string())
                .spawn(move || {
                    let _guard = guard;
                    handler(&agent, &event, &sync);
                })
        };

        match spawned {
            Ok(join) => {
                let thread_id = join.thread().id();
                // detached: completion is observed through `running`
                drop(join);
                self.install_current(HandlerContext {
                    event,
                    sync,
                    running,
                    reap_in_handler,
                    thread_id,
                });
            }
            Err(e) => {
                tracing::error!("failed to start event handler thread: {}", e);
            }
        }
    }

    fn install_current(&mut self, ctx: HandlerContext) {
        *self.agent.shared().current_worker.lock() = Some(CurrentWorker {
            thread_id: ctx.thread_id,
            sync: ctx.sync.clone(),
        });
        self.current = Some(ctx);
    }

    fn clear_current_worker(&self) {
        *self.agent.shared().current_worker.lock() = None;
    }

    /// Shutdown path: dispose handlers (skipping the wait for a handler that
    /// itself requested stop), then drain queue and timers.
    fn cleanup(&mut self) {
        if let Some(ctx) = self.current.take() {
            // the slot stays published while disposing, so a quit arriving
            // from this handler mid-cleanup still marks its sync
            let wait = !ctx.sync.is_syscall_origin();
            Self::dispose_handler_context(ctx, wait);
            self.clear_current_worker();
        }
        while let Some(ctx) = self.interrupted.pop() {
            Self::dispose_handler_context(ctx, true);
        }

        let dropped = self.agent.shared().queue.drain().len();
        if dropped > 0 {
            tracing::debug!("dropped {} undispatched events at shutdown", dropped);
        }
        self.agent.shared().timers.clear();
    }

    fn dispose_handler_context(ctx: HandlerContext, wait: bool) {
        if ctx.running.load(Ordering::Acquire) {
            if ctx.sync.is_suspended() {
                ctx.sync.resume();
            }
            if wait {
                // let the current event run through; a shutdown syscall from
                // the handler turns the wait into a detached reap
                while ctx.running.load(Ordering::Acquire) {
                    if ctx.sync.is_syscall_origin() {
                        ctx.reap_in_handler.store(true, Ordering::Release);
                        return;
                    }
                    crate::utils::sleep_milli(10);
                }
            } else {
                ctx.reap_in_handler.store(true, Ordering::Release);
            }
        }
    }
}
