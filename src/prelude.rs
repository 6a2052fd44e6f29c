pub use crate::agent::{Agent, AgentOutput};
pub use crate::cmd::{Command, CommandFn, ParamList};
pub use crate::config::{AgentConfig, EngineConfig, EventConfig, PluginConfig};
pub use crate::error::{ConfigError, EngineError, PluginError, TimerError};
pub use crate::event::{DEFAULT_PRIORITY, Event, EventArgs, HandlerSync, Topic};
pub use crate::plugin::{
    BAD_PLUGIN_ID, FunctionTable, LibraryLoader, PluginEnv, PluginInfo, PluginLibrary,
};
pub use crate::utils::{AgentStatus, LoggerConfig};
