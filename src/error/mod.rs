use std::{error::Error, fmt, io};

use crate::utils::AgentStatus;

const ERR_MSG_NOT_STOPPED: &str = "agent subsystems have not been quit";
const ERR_MSG_NO_TIMER: &str = "no timer with ID";

/// Configuration value rejected at init.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Integer key outside its allowed range.
    OutOfRange {
        key: &'static str,
        min: i64,
        max: i64,
        value: i64,
    },
    /// Key present but unusable for the stated reason.
    Invalid { key: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::OutOfRange {
                key,
                min,
                max,
                value,
            } => {
                write!(f, "{key} must be in [{min}, {max}], got {value}")
            }
            ConfigError::Invalid { key, reason } => write!(f, "{key}: {reason}"),
        }
    }
}

impl Error for ConfigError {}

/// Failures surfaced by the embedding API.
#[derive(Debug)]
pub enum EngineError {
    /// A config value failed validation (init fails).
    Config(ConfigError),
    /// A thread or other OS resource could not be created (init fails).
    Resource(io::Error),
    /// The EDT could not be pinned to the requested core.
    CorePin(usize),
    /// `dispose` called before the agent reached `Stopped`.
    NotStopped(AgentStatus),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config(e) => write!(f, "config error: {e}"),
            EngineError::Resource(e) => write!(f, "resource creation failed: {e}"),
            EngineError::CorePin(id) => write!(f, "cannot pin dispatch thread to core {id}"),
            EngineError::NotStopped(s) => write!(f, "{ERR_MSG_NOT_STOPPED} (status: {s:?})"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EngineError::Config(e) => Some(e),
            EngineError::Resource(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}

/// Caller precondition violations on the timer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    NoSuchTimer(i16),
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::NoSuchTimer(id) => write!(f, "{ERR_MSG_NO_TIMER}: {id}"),
        }
    }
}

impl Error for TimerError {}

/// Caller precondition violations on the plugin manager.
///
/// Failures *inside* a plugin (non-zero status, panic) are not errors to the
/// caller; they are logged and contained per the enable/disable policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    NotLoaded(String),
    AlreadyEnabled(String),
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginError::NotLoaded(id) => write!(f, "plugin not loaded: {id}"),
            PluginError::AlreadyEnabled(id) => write!(f, "plugin already enabled: {id}"),
        }
    }
}

impl Error for PluginError {}
