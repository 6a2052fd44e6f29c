pub use loader::{LibraryLoader, PLUGIN_INFO_SYMBOL, PluginInfoFn, PluginLibrary, SharedObjectLoader};

mod loader;

use crate::agent::Agent;
use crate::cmd::Command;
use crate::error::PluginError;
use ahash::AHashMap;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

/// Sentinel id returned when a load is rejected.
pub const BAD_PLUGIN_ID: &str = "";

/// Opaque per-plugin state, created by the plugin's `init` and handed back
/// to every later entry point.
pub type PluginEnv = Option<Box<dyn Any + Send>>;

/// Lifecycle / registration entry point.
/// A non-zero return is a failure status; a panic unloads the plugin.
pub type LifecycleFn = fn(&Agent, &mut PluginEnv) -> i32;

/// Entry point collecting command definitions for the command registry.
pub type AddCommandsFn = fn(&Agent, &mut PluginEnv, &mut Vec<Command>) -> i32;

/// Optional entry points a plugin may export. Missing entries are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct FunctionTable {
    pub init: Option<LifecycleFn>,
    pub quit: Option<LifecycleFn>,
    pub add_input_devices: Option<LifecycleFn>,
    pub add_output_devices: Option<LifecycleFn>,
    pub add_agent_props: Option<LifecycleFn>,
    pub add_commands: Option<AddCommandsFn>,
}

/// The record a plugin's info getter resolves to.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub functions: FunctionTable,
}

struct PluginEntry {
    info: PluginInfo,
    env: PluginEnv,
    // keeps the library open while its function pointers are reachable
    _lib: Box<dyn PluginLibrary>,
}

enum CallOutcome {
    Ok,
    Failed(i32),
    Panicked,
}

/// Tracks loaded and enabled plugins and drives their entry points.
///
/// A plugin may never take down the agent: non-zero statuses abort the
/// current step with a log, panics are caught and unload the plugin.
pub struct PluginManager {
    loaded: AHashMap<String, PluginEntry>,
    enabled: HashSet<String>,
    loader: Box<dyn LibraryLoader>,
}

impl PluginManager {
    pub fn new(loader: Box<dyn LibraryLoader>) -> Self {
        Self {
            loaded: AHashMap::new(),
            enabled: HashSet::new(),
            loader,
        }
    }

    /// Open a plugin library and register it under its info name. Returns
    /// [`BAD_PLUGIN_ID`] when the library cannot be opened, exports no usable
    /// info, or collides with an already-loaded name.
    pub fn load(&mut self, path: &Path) -> String {
        tracing::info!("loading plugin library {}", path.display());
        let lib = match self.loader.open(path) {
            Ok(lib) => lib,
            Err(e) => {
                tracing::error!("loading library failed: {e:#}");
                return BAD_PLUGIN_ID.to_string();
            }
        };
        let info = match lib.info() {
            Ok(info) => info,
            Err(e) => {
                tracing::error!("plugin info lookup failed: {e:#}");
                return BAD_PLUGIN_ID.to_string();
            }
        };
        let id = info.name.to_string();
        if self.is_loaded(&id) {
            tracing::warn!("plugin ID is already loaded: {id}");
            return BAD_PLUGIN_ID.to_string();
        }
        self.loaded.insert(
            id.clone(),
            PluginEntry {
                info,
                env: None,
                _lib: lib,
            },
        );
        tracing::info!("loaded plugin with ID: {id}");
        id
    }

    /// Close and forget a plugin, disabling it first if needed.
    pub fn unload(&mut self, agent: &Agent, id: &str) {
        tracing::info!("unloading plugin with ID: {id}");
        if !self.is_loaded(id) {
            tracing::warn!("no plugin with ID; not unloading: {id}");
            return;
        }
        if self.is_enabled(id) {
            self.disable(agent, id);
            // a failing quit already unloads
            if !self.is_loaded(id) {
                return;
            }
        }
        // dropping the entry closes the library
        self.loaded.remove(id);
        tracing::info!("successfully unloaded plugin");
    }

    /// Run the plugin's `init`, mark it enabled, then its registration entry
    /// points in order, forwarding collected commands to the registry.
    pub fn enable(&mut self, agent: &Agent, id: &str) -> Result<(), PluginError> {
        tracing::info!("enabling plugin '{id}'");
        if !self.is_loaded(id) {
            return Err(PluginError::NotLoaded(id.to_string()));
        }
        if self.is_enabled(id) {
            return Err(PluginError::AlreadyEnabled(id.to_string()));
        }

        let entry = self.loaded.get_mut(id).expect("checked loaded");
        entry.env = None;
        if let Some(init) = entry.info.functions.init {
            match call_lifecycle(agent, init, &mut entry.env) {
                CallOutcome::Ok => {}
                CallOutcome::Failed(status) => {
                    tracing::error!("plugin '{id}': init function failed");
                    tracing::debug!("{id}'s init return code is {status}");
                    return Ok(());
                }
                CallOutcome::Panicked => {
                    tracing::error!("plugin '{id}' init panicked; plugin will be unloaded");
                    self.unload(agent, id);
                    return Ok(());
                }
            }
        } else {
            tracing::warn!("plugin '{id}' does not define init; skipping");
        }
        self.enabled.insert(id.to_string());

        let funcs = self
            .loaded
            .get(id)
            .map(|entry| entry.info.functions)
            .expect("checked loaded");
        let steps: [(&str, Option<LifecycleFn>); 3] = [
            ("add_input_devices", funcs.add_input_devices),
            ("add_output_devices", funcs.add_output_devices),
            ("add_agent_props", funcs.add_agent_props),
        ];
        for (name, func) in steps {
            if !self.call_step(agent, id, name, func) {
                return Ok(());
            }
        }
        self.call_add_commands(agent, id);
        Ok(())
    }

    /// Remove from the enabled set and run the plugin's `quit`. A no-op for
    /// a plugin that is not enabled.
    pub fn disable(&mut self, agent: &Agent, id: &str) {
        tracing::info!("disabling plugin '{id}'...");
        if !self.enabled.remove(id) {
            return;
        }
        let entry = self.loaded.get_mut(id).expect("enabled implies loaded");
        if let Some(quit) = entry.info.functions.quit {
            match call_lifecycle(agent, quit, &mut entry.env) {
                CallOutcome::Ok => {}
                CallOutcome::Failed(status) => {
                    tracing::error!("plugin '{id}': quit function failed");
                    tracing::debug!("{id}'s quit return code is {status}");
                    self.unload(agent, id);
                }
                CallOutcome::Panicked => {
                    tracing::error!("plugin '{id}' quit panicked; plugin will be unloaded");
                    self.unload(agent, id);
                }
            }
        } else {
            tracing::info!("plugin '{id}' does not define quit; skipping");
        }
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.loaded.contains_key(id)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.enabled.contains(id)
    }

    pub fn get_loaded(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.loaded.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Load every `.so` / `.dll` in `dir`. Failures are logged and skipped.
    pub fn autoload(&mut self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("cannot list plugin dir {}: {e}", dir.display());
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_plugin = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".so") || n.ends_with(".dll"));
            if is_plugin {
                self.load(&path);
            }
        }
    }

    /// Run one optional registration step; returns whether to keep going.
    fn call_step(
        &mut self,
        agent: &Agent,
        id: &str,
        func_name: &str,
        func: Option<LifecycleFn>,
    ) -> bool {
        let Some(func) = func else {
            tracing::warn!("plugin '{id}' does not define {func_name}; skipping execution");
            return true;
        };
        let entry = self.loaded.get_mut(id).expect("caller checked loaded");
        match call_lifecycle(agent, func, &mut entry.env) {
            CallOutcome::Ok => true,
            CallOutcome::Failed(status) => {
                tracing::error!("plugin '{id}': {func_name} failed");
                tracing::debug!("plugin '{id}': {func_name} return code is {status}");
                false
            }
            CallOutcome::Panicked => {
                tracing::error!("plugin '{id}' {func_name} panicked; plugin will be unloaded");
                self.unload(agent, id);
                false
            }
        }
    }

    fn call_add_commands(&mut self, agent: &Agent, id: &str) {
        let entry = self.loaded.get_mut(id).expect("caller checked loaded");
        let Some(func) = entry.info.functions.add_commands else {
            tracing::info!("plugin '{id}' does not define add_commands; skipping execution");
            return;
        };
        let mut new_commands: Vec<Command> = Vec::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            func(agent, &mut entry.env, &mut new_commands)
        }));
        match outcome {
            Ok(0) => {
                for command in new_commands {
                    agent.shared().commands.register(command);
                }
            }
            Ok(status) => {
                tracing::error!("plugin '{id}': add_commands failed");
                tracing::debug!("plugin '{id}': add_commands return code is {status}");
            }
            Err(_) => {
                tracing::error!("plugin '{id}' add_commands panicked; plugin will be unloaded");
                self.unload(agent, id);
            }
        }
    }
}

fn call_lifecycle(agent: &Agent, func: LifecycleFn, env: &mut PluginEnv) -> CallOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| func(agent, env))) {
        Ok(0) => CallOutcome::Ok,
        Ok(status) => CallOutcome::Failed(status),
        Err(_) => CallOutcome::Panicked,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process loader so lifecycle tests run without shared objects.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    pub struct StaticLibrary {
        pub info: PluginInfo,
    }

    impl PluginLibrary for StaticLibrary {
        fn info(&self) -> anyhow::Result<PluginInfo> {
            Ok(self.info.clone())
        }
    }

    /// Maps path strings to canned infos; `open` fails for unknown paths.
    #[derive(Default)]
    pub struct StaticLoader {
        pub libs: Arc<Mutex<AHashMap<String, PluginInfo>>>,
    }

    impl StaticLoader {
        pub fn with(infos: &[PluginInfo]) -> Self {
            let mut libs = AHashMap::new();
            for info in infos {
                libs.insert(format!("{}.so", info.name), info.clone());
                libs.insert(format!("{}.dll", info.name), info.clone());
            }
            Self {
                libs: Arc::new(Mutex::new(libs)),
            }
        }
    }

    impl LibraryLoader for StaticLoader {
        fn open(&self, path: &Path) -> anyhow::Result<Box<dyn PluginLibrary>> {
            let key = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            match self.libs.lock().get(key) {
                Some(info) => Ok(Box::new(StaticLibrary {
                    info: info.clone(),
                })),
                None => anyhow::bail!("no such library: {}", path.display()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StaticLoader;
    use super::*;

    fn info(name: &'static str) -> PluginInfo {
        PluginInfo {
            name,
            version: "1.0",
            functions: FunctionTable::default(),
        }
    }

    fn manager(infos: &[PluginInfo]) -> PluginManager {
        PluginManager::new(Box::new(StaticLoader::with(infos)))
    }

    #[test]
    fn load_registers_under_info_name() {
        let mut mgr = manager(&[info("alpha")]);
        let id = mgr.load(Path::new("alpha.so"));
        assert_eq!(id, "alpha");
        assert!(mgr.is_loaded("alpha"));
        assert_eq!(mgr.get_loaded(), vec!["alpha".to_string()]);
    }

    #[test]
    fn load_unknown_path_is_bad() {
        let mut mgr = manager(&[]);
        assert_eq!(mgr.load(Path::new("missing.so")), BAD_PLUGIN_ID);
        assert!(mgr.get_loaded().is_empty());
    }

    #[test]
    fn load_name_collision_is_bad() {
        let mut mgr = manager(&[info("alpha")]);
        assert_eq!(mgr.load(Path::new("alpha.so")), "alpha");
        assert_eq!(mgr.load(Path::new("alpha.so")), BAD_PLUGIN_ID);
        assert_eq!(mgr.get_loaded().len(), 1);
    }

    #[test]
    fn autoload_picks_shared_objects_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["alpha.so", "beta.dll", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let mut mgr = manager(&[info("alpha"), info("beta")]);
        mgr.autoload(dir.path());
        assert_eq!(
            mgr.get_loaded(),
            vec!["alpha".to_string(), "beta".to_string()]
        );
    }
}
