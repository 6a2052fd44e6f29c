use crate::error::ConfigError;
use crate::utils::LoggerConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Dispatch-loop knobs. Both values are milliseconds; the tick resolution
/// may never undercut the idle sleep.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventConfig {
    /// Dispatcher idle sleep between passes, 1–1000 ms.
    #[serde(
        default = "default_idle_sleep",
        alias = "IDLE_SLEEP_TIME",
        alias = "idle_sleep_time"
    )]
    pub idle_sleep_ms: u64,

    /// Timer tick boundary, `idle_sleep_ms`–1000 ms.
    #[serde(
        default = "default_tick_resolution",
        alias = "TICK_RESOLUTION",
        alias = "tick_resolution"
    )]
    pub tick_resolution_ms: u64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            idle_sleep_ms: default_idle_sleep(),
            tick_resolution_ms: default_tick_resolution(),
        }
    }
}

fn default_idle_sleep() -> u64 {
    10
}

fn default_tick_resolution() -> u64 {
    10
}

/// Plugin manager section.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PluginConfig {
    /// Directory to autoload `.so` / `.dll` plugins from. Absent means no
    /// autoloading.
    #[serde(default, alias = "DIR")]
    pub dir: Option<PathBuf>,
}

/// Speech-surface section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Substituted for `$USER_TITLE` in agent output.
    #[serde(default = "default_user_title", alias = "USER_TITLE")]
    pub user_title: String,

    /// Bound of the output channel the embedder drains.
    #[serde(default = "default_output_capacity")]
    pub output_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            user_title: default_user_title(),
            output_capacity: default_output_capacity(),
        }
    }
}

fn default_user_title() -> String {
    "friend".to_string()
}

fn default_output_capacity() -> usize {
    64
}

/// Full configuration of one agent instance.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub event: EventConfig,

    #[serde(default)]
    pub plugin: PluginConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    /// Logical CPU core to pin the EDT to (`None` = no pinning).
    pub core_id: Option<usize>,

    /// Logging sinks; `None` leaves the global subscriber untouched.
    pub log: Option<LoggerConfig>,
}

impl EngineConfig {
    /// Load from any file format the `config` crate understands.
    pub fn from_file(path: impl AsRef<str>) -> anyhow::Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from(PathBuf::from(path.as_ref())))
            .build()
            .with_context(|| format!("failed to read engine config from {}", path.as_ref()))?;

        let engine: Self = cfg
            .try_deserialize()
            .with_context(|| format!("failed to deserialize engine config from {}", path.as_ref()))?;

        Ok(engine)
    }

    /// Range-check all values; called before init creates any resource.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("IDLE_SLEEP_TIME", self.event.idle_sleep_ms, 1, 1000)?;
        check_range(
            "TICK_RESOLUTION",
            self.event.tick_resolution_ms,
            self.event.idle_sleep_ms,
            1000,
        )?;
        if self.agent.output_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "output_capacity",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.event.idle_sleep_ms)
    }

    pub fn tick_resolution(&self) -> Duration {
        Duration::from_millis(self.event.tick_resolution_ms)
    }
}

fn check_range(key: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            key,
            min: min as i64,
            max: max as i64,
            value: value as i64,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.event.idle_sleep_ms, 10);
        assert_eq!(cfg.event.tick_resolution_ms, 10);
        assert!(cfg.plugin.dir.is_none());
    }

    #[test]
    fn idle_sleep_bounds() {
        let mut cfg = EngineConfig::default();
        cfg.event.idle_sleep_ms = 0;
        assert!(cfg.validate().is_err());
        cfg.event.idle_sleep_ms = 1001;
        assert!(cfg.validate().is_err());
        cfg.event.idle_sleep_ms = 1;
        cfg.event.tick_resolution_ms = 1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn tick_resolution_cannot_undercut_idle_sleep() {
        let mut cfg = EngineConfig::default();
        cfg.event.idle_sleep_ms = 50;
        cfg.event.tick_resolution_ms = 10;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange {
                key: "TICK_RESOLUTION",
                ..
            })
        ));
    }

    #[test]
    fn loads_uppercase_key_aliases_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[event]\nIDLE_SLEEP_TIME = 5\nTICK_RESOLUTION = 20\n\n[plugin]\nDIR = \"/opt/plugins\"\n"
        )
        .unwrap();

        let cfg = EngineConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.event.idle_sleep_ms, 5);
        assert_eq!(cfg.event.tick_resolution_ms, 20);
        assert_eq!(cfg.plugin.dir, Some(PathBuf::from("/opt/plugins")));
        assert!(cfg.validate().is_ok());
    }
}
