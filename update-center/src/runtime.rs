// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Contracts of the two host-process collaborators.
//!
//! The update center downloads and places files; activating a plugin inside
//! the live process and rewriting or restarting the host binary belong to
//! the controller. Both collaborators are traits so the controller wires in
//! its real implementations; in-memory implementations live here for tests
//! and development, the same way the artifact fetch path ships a mock
//! transport.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// One plugin currently known to the running controller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstalledPlugin {
    pub name: String,
    pub version: String,
    pub enabled: bool,
    /// Shipped inside the host binary; pinned after a user-initiated install
    /// so later host upgrades do not overwrite it.
    pub bundled: bool,
}

/// Outcome of asking the runtime to activate a plugin without a restart.
#[derive(Debug, Error)]
pub enum DynamicLoadError {
    /// Not an error: the plugin was installed but needs a restart to take
    /// effect.
    #[error("{0}")]
    RestartRequired(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The live-process plugin runtime.
pub trait PluginRuntime: fmt::Debug + Send + Sync {
    /// Directory holding the active plugin files.
    fn plugin_dir(&self) -> Utf8PathBuf;

    fn installed_plugin(&self, name: &str) -> Option<InstalledPlugin>;

    fn installed_plugins(&self) -> Vec<InstalledPlugin>;

    /// Enable a previously disabled plugin.
    fn enable_plugin(&self, name: &str) -> anyhow::Result<()>;

    /// Pin a bundled plugin so the next host upgrade keeps the installed
    /// version.
    fn pin_plugin(&self, name: &str) -> anyhow::Result<()>;

    /// Load a plugin file into the running process. `batch` names sibling
    /// plugins installed in the same wave whose activation is deferred to
    /// [`PluginRuntime::start_batch`].
    fn dynamic_load(
        &self,
        path: &Utf8Path,
        strict: bool,
        batch: Option<&[String]>,
    ) -> Result<(), DynamicLoadError>;

    /// Activate a wave of plugins previously loaded with a `batch`.
    fn start_batch(&self, batch: &[String]) -> anyhow::Result<()>;
}

/// The host-process lifecycle.
pub trait Lifecycle: fmt::Debug + Send + Sync {
    /// Path of the live host binary.
    fn core_path(&self) -> Utf8PathBuf;

    /// Whether this running mode supports swapping the host binary.
    fn can_rewrite_core(&self) -> bool;

    /// Replace the host binary with `src`, keeping a `.bak` of the previous
    /// one. Takes effect on the next restart.
    fn rewrite_core(&self, src: &Utf8Path) -> anyhow::Result<()>;

    /// Restart the host once running jobs quiesce, on behalf of the named
    /// principal.
    fn safe_restart(&self, authentication: &str) -> Result<(), RestartNotSupported>;
}

#[derive(Clone, Copy, Debug, Error)]
#[error("restart not supported in this running mode")]
pub struct RestartNotSupported;

/// In-memory plugin runtime. Records the calls made against it so tests can
/// assert on installer behavior.
#[derive(Debug, Default)]
pub struct InMemoryPluginRuntime {
    plugin_dir: Utf8PathBuf,
    inner: Mutex<InMemoryRuntimeState>,
    /// When set, `dynamic_load` reports restart-required with this message.
    restart_required_on_load: Mutex<Option<String>>,
}

#[derive(Debug, Default)]
struct InMemoryRuntimeState {
    plugins: BTreeMap<String, InstalledPlugin>,
    dynamic_loads: Vec<Utf8PathBuf>,
    started_batches: Vec<Vec<String>>,
    pinned: Vec<String>,
}

impl InMemoryPluginRuntime {
    pub fn new(plugin_dir: impl Into<Utf8PathBuf>) -> Self {
        Self { plugin_dir: plugin_dir.into(), ..Default::default() }
    }

    pub fn insert_plugin(&self, plugin: InstalledPlugin) {
        let mut inner = self.inner.lock().unwrap();
        inner.plugins.insert(plugin.name.clone(), plugin);
    }

    pub fn set_restart_required_on_load(&self, message: &str) {
        *self.restart_required_on_load.lock().unwrap() =
            Some(message.to_string());
    }

    pub fn dynamic_loads(&self) -> Vec<Utf8PathBuf> {
        self.inner.lock().unwrap().dynamic_loads.clone()
    }

    pub fn started_batches(&self) -> Vec<Vec<String>> {
        self.inner.lock().unwrap().started_batches.clone()
    }

    pub fn pinned(&self) -> Vec<String> {
        self.inner.lock().unwrap().pinned.clone()
    }
}

impl PluginRuntime for InMemoryPluginRuntime {
    fn plugin_dir(&self) -> Utf8PathBuf {
        self.plugin_dir.clone()
    }

    fn installed_plugin(&self, name: &str) -> Option<InstalledPlugin> {
        self.inner.lock().unwrap().plugins.get(name).cloned()
    }

    fn installed_plugins(&self) -> Vec<InstalledPlugin> {
        self.inner.lock().unwrap().plugins.values().cloned().collect()
    }

    fn enable_plugin(&self, name: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.plugins.get_mut(name) {
            Some(plugin) => {
                plugin.enabled = true;
                Ok(())
            }
            None => anyhow::bail!("plugin '{name}' is not installed"),
        }
    }

    fn pin_plugin(&self, name: &str) -> anyhow::Result<()> {
        self.inner.lock().unwrap().pinned.push(name.to_string());
        Ok(())
    }

    fn dynamic_load(
        &self,
        path: &Utf8Path,
        _strict: bool,
        _batch: Option<&[String]>,
    ) -> Result<(), DynamicLoadError> {
        if let Some(message) = self.restart_required_on_load.lock().unwrap().clone()
        {
            return Err(DynamicLoadError::RestartRequired(message));
        }
        let mut inner = self.inner.lock().unwrap();
        inner.dynamic_loads.push(path.to_owned());
        let name = path
            .file_stem()
            .unwrap_or(path.as_str())
            .to_string();
        inner.plugins.insert(
            name.clone(),
            InstalledPlugin {
                name,
                version: String::new(),
                enabled: true,
                bundled: false,
            },
        );
        Ok(())
    }

    fn start_batch(&self, batch: &[String]) -> anyhow::Result<()> {
        self.inner.lock().unwrap().started_batches.push(batch.to_vec());
        Ok(())
    }
}

/// Lifecycle implementation backed by a file on disk. Restart is recorded
/// rather than performed, which is what tests and the development daemon
/// want; a production controller supplies its own.
#[derive(Debug)]
pub struct FileLifecycle {
    core_path: Utf8PathBuf,
    can_rewrite: bool,
    restarts: Mutex<Vec<String>>,
}

impl FileLifecycle {
    pub fn new(core_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            core_path: core_path.into(),
            can_rewrite: true,
            restarts: Mutex::new(Vec::new()),
        }
    }

    pub fn read_only(core_path: impl Into<Utf8PathBuf>) -> Self {
        Self { can_rewrite: false, ..Self::new(core_path) }
    }

    pub fn restarts(&self) -> Vec<String> {
        self.restarts.lock().unwrap().clone()
    }
}

impl Lifecycle for FileLifecycle {
    fn core_path(&self) -> Utf8PathBuf {
        self.core_path.clone()
    }

    fn can_rewrite_core(&self) -> bool {
        self.can_rewrite
    }

    fn rewrite_core(&self, src: &Utf8Path) -> anyhow::Result<()> {
        let backup = Utf8PathBuf::from(format!("{}.bak", self.core_path));
        // A downgrade stages from the backup itself; don't clobber it.
        if src != backup && self.core_path.exists() {
            std::fs::copy(&self.core_path, &backup)?;
        }
        std::fs::rename(src, &self.core_path).or_else(|_| {
            // Cross-device fallback.
            std::fs::copy(src, &self.core_path).map(|_| ())?;
            std::fs::remove_file(src)
        })?;
        Ok(())
    }

    fn safe_restart(&self, authentication: &str) -> Result<(), RestartNotSupported> {
        self.restarts.lock().unwrap().push(authentication.to_string());
        Ok(())
    }
}
