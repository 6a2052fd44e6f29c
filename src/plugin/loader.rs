use super::PluginInfo;
use anyhow::{Context, bail};
use std::path::Path;

/// Symbol every plugin shared object must export.
pub const PLUGIN_INFO_SYMBOL: &[u8] = b"agentrt_plugin_info";

/// Signature of the exported info getter.
pub type PluginInfoFn = unsafe extern "C" fn() -> *const PluginInfo;

/// An opened plugin library. The handle must stay alive for as long as any
/// function pointer from its info table may be called; dropping it closes
/// the library.
pub trait PluginLibrary: Send {
    /// Resolve the info record. Fails when the info symbol is missing or
    /// returns null.
    fn info(&self) -> anyhow::Result<PluginInfo>;
}

/// Opens plugin libraries. The production implementation loads shared
/// objects; tests substitute an in-process loader.
pub trait LibraryLoader: Send + Sync {
    fn open(&self, path: &Path) -> anyhow::Result<Box<dyn PluginLibrary>>;
}

/// `libloading`-backed loader for `.so` / `.dll` plugins.
pub struct SharedObjectLoader;

struct SharedObjectLibrary {
    lib: libloading::Library,
}

impl LibraryLoader for SharedObjectLoader {
    fn open(&self, path: &Path) -> anyhow::Result<Box<dyn PluginLibrary>> {
        // Safety: loading a library runs its initializers; a plugin is
        // trusted code by the time the embedder points the engine at it.
        let lib = unsafe { libloading::Library::new(path) }
            .with_context(|| format!("failed to open plugin library {}", path.display()))?;
        Ok(Box::new(SharedObjectLibrary { lib }))
    }
}

impl PluginLibrary for SharedObjectLibrary {
    fn info(&self) -> anyhow::Result<PluginInfo> {
        // Safety: the symbol contract is part of the plugin ABI; the library
        // outlives this call.
        let get_info = unsafe { self.lib.get::<PluginInfoFn>(PLUGIN_INFO_SYMBOL) }
            .context("plugin does not export an info symbol")?;
        let raw = unsafe { get_info() };
        if raw.is_null() {
            bail!("plugin info getter returned null");
        }
        Ok(unsafe { (*raw).clone() })
    }
}
