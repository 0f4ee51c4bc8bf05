//! Per-connection project state
//!
//! Holds the active file, the directory relative paths resolve against, and
//! the current property values. The property map is fully populated from
//! the registry on construction, so a property is never read unset.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::properties::{CompilerFlags, PropertyRegistry};

#[derive(Debug)]
pub struct ProjectState {
    file_path: Option<PathBuf>,
    working_directory: Option<PathBuf>,
    properties: BTreeMap<String, String>,
    registry: Arc<PropertyRegistry>,
    flags: Arc<CompilerFlags>,
}

impl ProjectState {
    /// Create a state with every registered property at its default.
    pub fn new(registry: Arc<PropertyRegistry>, flags: Arc<CompilerFlags>) -> Self {
        let mut state = Self {
            file_path: None,
            working_directory: None,
            properties: BTreeMap::new(),
            registry,
            flags,
        };
        state.reset_properties();
        state
    }

    pub fn flags(&self) -> &CompilerFlags {
        &self.flags
    }

    /// Clear the map, then store and apply every registered default.
    pub fn reset_properties(&mut self) {
        self.properties.clear();
        let registry = Arc::clone(&self.registry);
        for descriptor in registry.iter() {
            self.properties.insert(
                descriptor.name.to_string(),
                descriptor.default_value.to_string(),
            );
            descriptor.apply(descriptor.default_value, self);
        }
    }

    /// Store `value` under `name`, then run the matching applier if any.
    ///
    /// Names with no descriptor are kept without side effects.
    pub fn set_property(&mut self, name: &str, value: &str) {
        self.properties.insert(name.to_string(), value.to_string());
        let registry = Arc::clone(&self.registry);
        match registry.get(name) {
            Some(descriptor) => descriptor.apply(value, self),
            None => tracing::debug!("Stored property {} without a registered applier", name),
        }
    }

    /// Apply a saved property set on top of the current values.
    pub fn restore_properties(&mut self, saved: &BTreeMap<String, String>) {
        for (name, value) in saved {
            self.set_property(name, value);
        }
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    /// Associate a file with the session; its parent becomes the working
    /// directory.
    pub fn set_file_path(&mut self, path: impl Into<PathBuf>) {
        let path = self.resolve(&path.into());
        self.working_directory = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf);
        self.file_path = Some(path);
    }

    /// Forget the active file. Returns whether one was open.
    pub fn close_file(&mut self) -> bool {
        self.working_directory = None;
        self.file_path.take().is_some()
    }

    /// Resolve `path` against the working directory, falling back to the
    /// process directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match &self.working_directory {
            Some(dir) => dir.join(path),
            None => std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf()),
        }
    }
}
