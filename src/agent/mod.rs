use crate::cmd::{self, Command, CommandRegistry};
use crate::config::EngineConfig;
use crate::error::{EngineError, PluginError, TimerError};
use crate::event::dispatch::Edt;
use crate::event::{
    CurrentWorker, Event, EventArgs, EventQueue, HandlerRegistry, HandlerSync, TimerTable, Topic,
};
use crate::plugin::{PluginManager, SharedObjectLoader};
use crate::utils::{AgentStatus, StatusCell, sleep_milli, try_pin_core};
use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One line of agent speech, as handed to the embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutput {
    pub text: String,
}

pub(crate) struct AgentShared {
    pub(crate) status: StatusCell,
    pub(crate) queue: EventQueue,
    pub(crate) timers: TimerTable,
    pub(crate) registry: HandlerRegistry,
    pub(crate) commands: CommandRegistry,
    pub(crate) plugins: Mutex<PluginManager>,
    pub(crate) current_worker: Mutex<Option<CurrentWorker>>,
    edt: Mutex<Option<JoinHandle<()>>>,
    output_tx: Sender<AgentOutput>,
    output_rx: Mutex<Option<Receiver<AgentOutput>>>,
    user_title: String,
    idle_sleep: Duration,
    _log_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Handle to one agent instance. Clones are cheap and share the instance;
/// handlers receive a clone and may call any method on it, including
/// [`quit`](Agent::quit).
#[derive(Clone)]
pub struct Agent {
    shared: Arc<AgentShared>,
}

impl Agent {
    /// Create an agent and start its dispatch thread.
    ///
    /// Fails on invalid configuration or when the thread (or requested core
    /// pin) cannot be provided.
    pub fn init(cfg: EngineConfig) -> Result<Self, EngineError> {
        cfg.validate()?;

        let log_guard = match &cfg.log {
            Some(log_cfg) => log_cfg
                .init()
                .map_err(|e| EngineError::Resource(io::Error::other(e)))?,
            None => None,
        };

        if let Some(core_id) = cfg.core_id {
            let available = core_affinity::get_core_ids().map_or(0, |ids| ids.len());
            if core_id >= available {
                return Err(EngineError::CorePin(core_id));
            }
        }

        let (output_tx, output_rx) = bounded(cfg.agent.output_capacity);
        let shared = Arc::new(AgentShared {
            status: StatusCell::new(),
            queue: EventQueue::new(),
            timers: TimerTable::new(),
            registry: HandlerRegistry::new(),
            commands: CommandRegistry::new(),
            plugins: Mutex::new(PluginManager::new(Box::new(SharedObjectLoader))),
            current_worker: Mutex::new(None),
            edt: Mutex::new(None),
            output_tx,
            output_rx: Mutex::new(Some(output_rx)),
            user_title: cfg.agent.user_title.clone(),
            idle_sleep: cfg.idle_sleep(),
            _log_guard: log_guard,
        });
        let agent = Agent { shared };

        let idle_sleep = cfg.idle_sleep();
        let tick_resolution = cfg.tick_resolution();
        let core_id = cfg.core_id;
        let edt_agent = agent.clone();
        let join = thread::Builder::new()
            .name("edt".to_string())
            .spawn(move || {
                if let Some(core_id) = core_id {
                    match try_pin_core(core_id) {
                        Ok(core_id) => tracing::info!("EDT pinned to core {}", core_id),
                        Err(e) => tracing::error!("cannot pin EDT core: {}", e),
                    }
                }
                Edt::new(edt_agent, idle_sleep, tick_resolution).run();
            })
            .map_err(EngineError::Resource)?;
        *agent.shared.edt.lock() = Some(join);

        // setup phase: builtin commands and the text-command dispatch handler
        for command in cmd::builtins::commands() {
            agent.shared.commands.register(command);
        }
        agent.subscribe(Topic::TextInput, cmd::dispatch_text);

        if let Some(dir) = &cfg.plugin.dir {
            agent.shared.plugins.lock().autoload(dir);
        }

        Ok(agent)
    }

    /// Request stop and wait for the dispatch thread to finish cleanup.
    ///
    /// Callable from inside a handler: the current worker is detected and
    /// its syscall-origin bit set *before* the stop request becomes visible,
    /// so the dispatcher will not wait on the caller.
    pub fn quit(&self) -> Result<(), EngineError> {
        if self.shared.status.get() == AgentStatus::Stopped {
            return Ok(());
        }

        {
            let current = self.shared.current_worker.lock();
            if let Some(worker) = current.as_ref()
                && worker.thread_id == thread::current().id()
            {
                worker.sync.set_syscall_origin();
            }
        }
        self.shared.status.set(AgentStatus::StopRequested);

        tracing::trace!("joining on EDT");
        let join = self.shared.edt.lock().take();
        match join {
            Some(join) => {
                let _ = join.join();
            }
            // another caller is joining; wait for cleanup to land
            None => {
                while self.shared.status.get() != AgentStatus::Stopped {
                    sleep_milli(self.shared.idle_sleep.as_millis().max(1) as u64);
                }
            }
        }
        tracing::trace!("EDT joined");
        Ok(())
    }

    /// Verify the agent was quit. The handle's memory is released when the
    /// last clone drops; this surfaces the logic error of dropping a live
    /// agent.
    pub fn dispose(&self) -> Result<(), EngineError> {
        match self.shared.status.get() {
            AgentStatus::Stopped => Ok(()),
            status => Err(EngineError::NotStopped(status)),
        }
    }

    pub fn status(&self) -> AgentStatus {
        self.shared.status.get()
    }

    /// Install `handler` for `topic`, replacing any existing subscription.
    pub fn subscribe<F>(&self, topic: Topic, handler: F)
    where
        F: Fn(&Agent, &Event, &HandlerSync) + Send + Sync + 'static,
    {
        self.shared.registry.subscribe(topic, Arc::new(handler));
    }

    pub fn unsubscribe(&self, topic: Topic) {
        self.shared.registry.unsubscribe(topic);
    }

    /// Transfer `event` into the dispatch queue.
    pub fn push_event(&self, event: Box<Event>) {
        self.shared.queue.push(event);
    }

    /// Construct an event with default priority and push it.
    pub fn generate(&self, topic: Topic, args: impl EventArgs) {
        tracing::debug!("pushed a {:?} event", topic);
        self.push_event(Event::new(topic, args));
    }

    /// One-shot timer at an absolute unix timestamp (seconds); `-1` when the
    /// timestamp is not strictly in the future.
    pub fn schedule(&self, timestamp_secs: u64, topic: Topic, args: impl EventArgs) -> i16 {
        self.shared
            .timers
            .schedule(timestamp_secs, topic, Box::new(args))
    }

    /// One-shot timer firing after `delay`.
    pub fn delay(&self, delay: Duration, topic: Topic, args: impl EventArgs) -> i16 {
        self.shared.timers.delay(delay, topic, Box::new(args))
    }

    /// Recurring timer firing every `period`.
    pub fn add_timer(&self, period: Duration, topic: Topic, args: impl EventArgs) -> i16 {
        self.shared
            .timers
            .add_recurring(period, topic, Box::new(args))
    }

    pub fn remove_timer(&self, id: i16) -> Result<(), TimerError> {
        self.shared.timers.remove(id)
    }

    pub fn get_timers(&self) -> Vec<i16> {
        self.shared.timers.list()
    }

    /// Render a line on the speech surface. `$USER_TITLE` is substituted
    /// from configuration; a full output channel drops the line rather than
    /// blocking a handler or the EDT.
    pub fn say(&self, text: &str) {
        let line = text.replace("$USER_TITLE", &self.shared.user_title);
        tracing::debug!("say: {}", line);
        if let Err(TrySendError::Full(out)) = self.shared.output_tx.try_send(AgentOutput { text: line }) {
            tracing::debug!("output channel full; dropped: {}", out.text);
        }
    }

    /// Take the speech-surface receiver. Returns `None` after the first call.
    pub fn take_output(&self) -> Option<Receiver<AgentOutput>> {
        self.shared.output_rx.lock().take()
    }

    pub fn register_command(&self, command: Command) {
        self.shared.commands.register(command);
    }

    pub fn unregister_command(&self, name: &str) {
        self.shared.commands.unregister(name);
    }

    /// Load a plugin library; returns its id, or [`BAD_PLUGIN_ID`] on any
    /// failure.
    ///
    /// Plugin entry points run while the plugin manager is held, so they must
    /// not call back into the plugin surface of this agent.
    ///
    /// [`BAD_PLUGIN_ID`]: crate::plugin::BAD_PLUGIN_ID
    pub fn load_plugin(&self, path: &Path) -> String {
        self.shared.plugins.lock().load(path)
    }

    pub fn unload_plugin(&self, id: &str) {
        self.shared.plugins.lock().unload(self, id);
    }

    pub fn enable_plugin(&self, id: &str) -> Result<(), PluginError> {
        self.shared.plugins.lock().enable(self, id)
    }

    pub fn disable_plugin(&self, id: &str) {
        self.shared.plugins.lock().disable(self, id);
    }

    pub fn plugin_is_loaded(&self, id: &str) -> bool {
        self.shared.plugins.lock().is_loaded(id)
    }

    pub fn plugin_is_enabled(&self, id: &str) -> bool {
        self.shared.plugins.lock().is_enabled(id)
    }

    pub fn loaded_plugins(&self) -> Vec<String> {
        self.shared.plugins.lock().get_loaded()
    }

    /// Look up a registered command by keyword.
    pub fn lookup_command(&self, name: &str) -> Option<Command> {
        self.shared.commands.lookup(name)
    }

    pub(crate) fn shared(&self) -> &AgentShared {
        &self.shared
    }

    #[cfg(test)]
    pub(crate) fn with_plugin_loader(&self, loader: Box<dyn crate::plugin::LibraryLoader>) {
        *self.shared.plugins.lock() = PluginManager::new(loader);
    }
}
