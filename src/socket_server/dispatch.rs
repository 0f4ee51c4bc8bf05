//! Message dispatcher
//!
//! Decodes a JSON envelope into a [`ClientAction`] and runs its handler.
//! Handler failures that are not fatal to the connection are reported back
//! to the client as notifications; `lint` and `compile` always end with a
//! `busy: false` message. `save` and `load` run on detached worker threads
//! so a modal file dialog never stalls the receive loop.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use super::connection::{ConnectionContext, Flow, PROTOCOL_VERSION};
use super::project::ProjectState;
use super::project_file::ProjectFile;
use super::properties::{CompilerFlags, PropertyRegistry};
use super::protocol::{decode_b64, encode_b64, ClientAction, Color, ServerMessage};
use crate::compiler::{CompileOutcome, CompileRequest, Compiler};
use crate::config::{OutputConfig, ServerConfig};
use crate::desktop::{FileDialog, FolderOpener};
use crate::error::{Result, ServerError};

/// Routes client actions to handlers.
///
/// Cheap to clone; one copy is handed to every connection and every
/// save/load worker.
#[derive(Clone)]
pub struct Dispatcher {
    compiler: Arc<dyn Compiler>,
    dialog: Arc<dyn FileDialog>,
    opener: Arc<dyn FolderOpener>,
    output: Arc<OutputConfig>,
    compiler_command: String,
    max_payload: u64,
    registry: Arc<PropertyRegistry>,
    /// Shared by every connection; last writer wins
    flags: Arc<CompilerFlags>,
}

impl Dispatcher {
    pub fn new(
        compiler: Arc<dyn Compiler>,
        dialog: Arc<dyn FileDialog>,
        opener: Arc<dyn FolderOpener>,
    ) -> Self {
        let defaults = ServerConfig::default();
        Self {
            compiler,
            dialog,
            opener,
            output: Arc::new(defaults.output),
            compiler_command: defaults.compiler.command,
            max_payload: defaults.server.max_payload_size,
            registry: PropertyRegistry::builtin(),
            flags: Arc::new(CompilerFlags::new()),
        }
    }

    /// Take output directories and `info` details from `config`.
    pub fn with_config(mut self, config: &ServerConfig) -> Self {
        self.output = Arc::new(config.output.clone());
        self.compiler_command = config.compiler.command.clone();
        self.max_payload = config.server.max_payload_size;
        self
    }

    pub fn with_registry(mut self, registry: Arc<PropertyRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn flags(&self) -> &Arc<CompilerFlags> {
        &self.flags
    }

    /// Fresh project state with every property at its default.
    pub fn new_state(&self) -> ProjectState {
        ProjectState::new(Arc::clone(&self.registry), Arc::clone(&self.flags))
    }

    /// Handle one envelope.
    ///
    /// Only fatal errors (a broken socket) are returned; everything else has
    /// already been reported to the client.
    pub fn dispatch(&self, text: &str, ctx: &ConnectionContext) -> Result<Flow> {
        let action = match ClientAction::from_json(text) {
            Ok(action) => action,
            Err(e) => {
                self.report(ctx, &e)?;
                return Ok(Flow::Continue);
            }
        };
        tracing::debug!("Dispatching {}", action.name());

        let result = match action {
            ClientAction::Ping => ctx
                .sender
                .send(&ServerMessage::notify("pong", Color::Info))
                .map(|_| Flow::Continue),
            ClientAction::Property { name, value } => self.set_property(&name, &value, ctx),
            ClientAction::Info => self.info(ctx),
            ClientAction::OpenFolder { folder } => self.open_folder(&folder, ctx),
            ClientAction::Lint { code } => {
                let result = decode_b64("code", &code).and_then(|code| self.run_lint(&code, ctx));
                self.finish_busy(ctx, result)
            }
            ClientAction::Compile { code, project } => {
                let result = self.run_compile(&code, project.as_deref(), ctx);
                self.finish_busy(ctx, result)
            }
            ClientAction::Save { code, meta } => self.save(&code, meta.as_deref(), ctx),
            ClientAction::Load => self.spawn_worker("load", ctx, |this, ctx| this.load(ctx)),
            ClientAction::Close => Ok(Flow::Close),
            ClientAction::Unknown(name) => {
                tracing::info!("Ignoring envelope with unknown action {:?}", name);
                Ok(Flow::Continue)
            }
        };

        match result {
            Ok(flow) => Ok(flow),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.report(ctx, &e)?;
                Ok(Flow::Continue)
            }
        }
    }

    fn report(&self, ctx: &ConnectionContext, err: &ServerError) -> Result<()> {
        tracing::warn!("{}", err);
        ctx.sender.send(&ServerMessage::failure(err))
    }

    /// Report `result` if it failed, then send the terminal `busy: false`.
    fn finish_busy(&self, ctx: &ConnectionContext, result: Result<()>) -> Result<Flow> {
        if let Err(e) = result {
            if e.is_fatal() {
                return Err(e);
            }
            self.report(ctx, &e)?;
        }
        ctx.sender.send(&ServerMessage::Busy { busy: false })?;
        Ok(Flow::Continue)
    }

    fn set_property(&self, name: &str, value: &str, ctx: &ConnectionContext) -> Result<Flow> {
        let name = decode_b64("name", name)?;
        let value = decode_b64("value", value)?;
        tracing::debug!("Property {} = {}", name, value);
        ctx.state.lock().set_property(&name, &value);
        Ok(Flow::Continue)
    }

    fn info(&self, ctx: &ConnectionContext) -> Result<Flow> {
        let folder = |dir: &Option<PathBuf>| {
            dir.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(not set)".to_string())
        };
        let properties: Vec<&str> = self.registry.iter().map(|d| d.name).collect();
        let body = format!(
            "Version: {}\n\
             Protocol: {}\n\
             Compiler: {}\n\
             Behavior pack: {}\n\
             Resource pack: {}\n\
             Install directory: {}\n\
             Max message size: {} bytes\n\
             Properties: {}",
            env!("CARGO_PKG_VERSION"),
            PROTOCOL_VERSION,
            self.compiler_command,
            folder(&self.output.behavior_pack),
            folder(&self.output.resource_pack),
            folder(&self.output.install_dir),
            self.max_payload,
            properties.join(", "),
        );
        ctx.sender.send(&ServerMessage::Menu {
            title: encode_b64(concat!("bedrock-devserver ", env!("CARGO_PKG_VERSION"))),
            body: encode_b64(&body),
        })?;
        Ok(Flow::Continue)
    }

    fn open_folder(&self, key: &str, ctx: &ConnectionContext) -> Result<Flow> {
        let path = match key {
            "current" => ctx
                .state
                .lock()
                .working_directory()
                .map(Path::to_path_buf)
                .or_else(|| std::env::current_dir().ok()),
            "user" => dirs::home_dir(),
            "behavior" => self.output.behavior_pack.clone(),
            "resource" => self.output.resource_pack.clone(),
            "install" => self.output.install_dir.clone(),
            other => {
                tracing::debug!("Ignoring unknown folder key {}", other);
                return Ok(Flow::Continue);
            }
        };

        match path {
            Some(path) => {
                tracing::info!("Opening {}", path.display());
                self.opener.open(&path)?;
            }
            None => ctx.sender.send(&ServerMessage::notify(
                &format!("No {} folder is configured", key),
                Color::Warning,
            ))?,
        }
        Ok(Flow::Continue)
    }

    /// Lint `code` and send `seterrors` plus the symbol listing on success.
    fn run_lint(&self, code: &str, ctx: &ConnectionContext) -> Result<()> {
        let (flags, working_dir) = {
            let state = ctx.state.lock();
            (
                state.flags().snapshot(),
                state.working_directory().map(Path::to_path_buf),
            )
        };

        match self.compiler.lint(code, flags, working_dir.as_deref())? {
            CompileOutcome::Success(listing) => {
                ctx.sender.send(&ServerMessage::errors(&[]))?;
                ctx.sender.send(&ServerMessage::Lint(listing))
            }
            CompileOutcome::Failed(diagnostics) => {
                tracing::debug!("Lint found {} error(s)", diagnostics.len());
                ctx.sender.send(&ServerMessage::errors(&diagnostics))
            }
        }
    }

    fn run_compile(&self, code: &str, project: Option<&str>, ctx: &ConnectionContext) -> Result<()> {
        let code = decode_b64("code", code)?;
        let project = project.map(|p| decode_b64("project", p)).transpose()?;
        let (flags, working_dir) = {
            let state = ctx.state.lock();
            (
                state.flags().snapshot(),
                state.working_directory().map(Path::to_path_buf),
            )
        };

        let request = CompileRequest {
            code: &code,
            project: project.as_deref(),
            flags,
            output: &self.output,
            working_dir: working_dir.as_deref(),
        };
        match self.compiler.compile(&request)? {
            CompileOutcome::Success(summary) => {
                tracing::info!("Compiled {} file(s)", summary.files.len());
                ctx.sender.send(&ServerMessage::errors(&[]))?;
                ctx.sender
                    .send(&ServerMessage::notify("Compilation completed", Color::Success))
            }
            CompileOutcome::Failed(diagnostics) => {
                ctx.sender.send(&ServerMessage::errors(&diagnostics))?;
                let text = match diagnostics.first() {
                    Some(first) if first.line > 0 => {
                        format!("Compilation failed at line {}: {}", first.line, first.describe())
                    }
                    Some(first) => format!("Compilation failed: {}", first.describe()),
                    None => "Compilation failed".to_string(),
                };
                ctx.sender.send(&ServerMessage::notify(&text, Color::Error))
            }
        }
    }

    fn save(&self, code: &str, meta: Option<&str>, ctx: &ConnectionContext) -> Result<Flow> {
        let code = decode_b64("code", code)?;
        let meta = match meta.filter(|m| !m.is_empty()) {
            Some(encoded) => {
                let json = decode_b64("meta", encoded)?;
                Some(serde_json::from_str(&json).map_err(|e| {
                    ServerError::action(format!("field meta is not JSON: {}", e))
                })?)
            }
            None => None,
        };
        self.spawn_worker("save", ctx, move |this, ctx| this.save_file(ctx, code, meta))
    }

    fn save_file(
        &self,
        ctx: &ConnectionContext,
        code: String,
        meta: Option<serde_json::Value>,
    ) -> Result<()> {
        let (existing, properties) = {
            let state = ctx.state.lock();
            (state.file_path().map(Path::to_path_buf), state.properties().clone())
        };
        let path = match existing {
            Some(path) => path,
            None => {
                let suggested = std::env::current_dir().ok();
                self.dialog
                    .pick_save_path(suggested.as_deref())
                    .ok_or_else(|| ServerError::state("Save canceled"))?
            }
        };

        let file = ProjectFile {
            code,
            meta,
            properties: Some(properties),
        };
        fs::write(&path, file.render()).map_err(|e| {
            ServerError::action(format!("Failed to write {}: {}", path.display(), e))
        })?;

        let path = {
            let mut state = ctx.state.lock();
            state.set_file_path(&path);
            state.file_path().map(Path::to_path_buf).unwrap_or(path)
        };
        tracing::info!("Saved {}", path.display());

        ctx.sender.send(&ServerMessage::Saved {
            path: path.display().to_string(),
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        ctx.sender
            .send(&ServerMessage::notify(&format!("Saved {}", name), Color::Success))
    }

    /// Run `job` on a detached thread inside the connection's span.
    ///
    /// Failures are reported to the client from the worker.
    fn spawn_worker<F>(&self, name: &'static str, ctx: &ConnectionContext, job: F) -> Result<Flow>
    where
        F: FnOnce(&Dispatcher, &ConnectionContext) -> Result<()> + Send + 'static,
    {
        let this = self.clone();
        let ctx = ctx.clone();
        let span = tracing::Span::current();
        thread::Builder::new()
            .name(format!("devserver-{}", name))
            .spawn(move || {
                let _enter = span.enter();
                if let Err(e) = job(&this, &ctx) {
                    if let Err(send_err) = this.report(&ctx, &e) {
                        tracing::debug!("Could not report {} failure: {}", name, send_err);
                    }
                }
            })
            .map_err(|e| ServerError::action(format!("Failed to start {}: {}", name, e)))?;
        Ok(Flow::Continue)
    }

    fn load(&self, ctx: &ConnectionContext) -> Result<()> {
        let start = ctx
            .state
            .lock()
            .working_directory()
            .map(Path::to_path_buf);
        let path = self
            .dialog
            .pick_open_path(start.as_deref())
            .ok_or_else(|| ServerError::state("Load canceled"))?;

        let text = fs::read_to_string(&path)
            .map_err(|e| ServerError::action(format!("Failed to read {}: {}", path.display(), e)))?;
        let (file, warning) = ProjectFile::parse_with_warning(&text);
        if let Some(reason) = warning {
            ctx.sender.send(&ServerMessage::notify(
                &format!("Ignored malformed metadata header: {}", reason),
                Color::Warning,
            ))?;
        }

        let (path, properties) = {
            let mut state = ctx.state.lock();
            state.set_file_path(&path);
            if let Some(saved) = &file.properties {
                state.reset_properties();
                state.restore_properties(saved);
            }
            let path = state.file_path().map(Path::to_path_buf).unwrap_or(path);
            (path, state.properties().clone())
        };
        tracing::info!("Loaded {}", path.display());

        ctx.sender.send(&ServerMessage::Load {
            code: encode_b64(&file.code),
            meta: file.meta,
            path: path.display().to_string(),
        })?;
        ctx.sender.send(&ServerMessage::Properties { properties })?;

        let result = self.run_lint(&file.code, ctx);
        self.finish_busy(ctx, result).map(|_| ())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("compiler_command", &self.compiler_command)
            .field("output", &self.output)
            .field("registry", &self.registry.len())
            .finish()
    }
}
