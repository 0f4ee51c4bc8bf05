//! Property descriptors and process-wide compiler flags
//!
//! The registry is fixed at process start and consulted by name. Each
//! descriptor's applier pushes a property value into [`CompilerFlags`].
//!
//! # Shared flags
//!
//! `CompilerFlags` is one struct shared by every connection. A connection
//! setting `debug` changes the flag for all of them; the last writer wins.
//! Compiler invocations take a [`FlagSnapshot`] so a single run sees one
//! consistent set of values.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::Serialize;

use super::project::ProjectState;

pub const DEBUG: &str = "debug";
pub const DECORATE: &str = "decorate";
pub const EXPORT_ALL: &str = "export_all";

/// Compiler behavior toggles shared across connections.
#[derive(Debug, Default)]
pub struct CompilerFlags {
    debug: AtomicBool,
    decorate: AtomicBool,
    export_all: AtomicBool,
}

/// Point-in-time copy of [`CompilerFlags`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlagSnapshot {
    pub debug: bool,
    pub decorate: bool,
    pub export_all: bool,
}

impl CompilerFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_debug(&self, on: bool) {
        self.debug.store(on, Ordering::SeqCst);
    }

    pub fn set_decorate(&self, on: bool) {
        self.decorate.store(on, Ordering::SeqCst);
    }

    pub fn set_export_all(&self, on: bool) {
        self.export_all.store(on, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> FlagSnapshot {
        FlagSnapshot {
            debug: self.debug.load(Ordering::SeqCst),
            decorate: self.decorate.load(Ordering::SeqCst),
            export_all: self.export_all.load(Ordering::SeqCst),
        }
    }
}

/// Interpret a property string as a boolean switch.
pub fn parse_switch(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

pub type ApplyFn = Box<dyn Fn(&str, &ProjectState) + Send + Sync>;

/// A named property with a default and a side-effecting applier.
pub struct PropertyDescriptor {
    pub name: &'static str,
    pub default_value: &'static str,
    apply: ApplyFn,
}

impl PropertyDescriptor {
    pub fn new(
        name: &'static str,
        default_value: &'static str,
        apply: impl Fn(&str, &ProjectState) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            default_value,
            apply: Box::new(apply),
        }
    }

    pub fn apply(&self, value: &str, state: &ProjectState) {
        (self.apply)(value, state);
    }
}

impl std::fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("name", &self.name)
            .field("default_value", &self.default_value)
            .finish_non_exhaustive()
    }
}

/// Read-only, ordered list of descriptors.
#[derive(Debug)]
pub struct PropertyRegistry {
    descriptors: Vec<PropertyDescriptor>,
}

static BUILTIN: Lazy<Arc<PropertyRegistry>> = Lazy::new(|| {
    Arc::new(PropertyRegistry::new(vec![
        PropertyDescriptor::new(DEBUG, "false", |value, state| {
            state.flags().set_debug(parse_switch(value));
        }),
        PropertyDescriptor::new(DECORATE, "false", |value, state| {
            state.flags().set_decorate(parse_switch(value));
        }),
        PropertyDescriptor::new(EXPORT_ALL, "false", |value, state| {
            state.flags().set_export_all(parse_switch(value));
        }),
    ]))
});

impl PropertyRegistry {
    pub fn new(descriptors: Vec<PropertyDescriptor>) -> Self {
        Self { descriptors }
    }

    /// The registry every connection uses.
    pub fn builtin() -> Arc<Self> {
        Arc::clone(&BUILTIN)
    }

    pub fn get(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
